use crate::LightningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidQuery,
    MissingColumn,
    UnsupportedSchema,
    MissingUpdatedAt,
    TransientDatabase,
    Cancelled,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidQuery => "LIGHTNING_ERROR_INVALID_QUERY",
            Self::MissingColumn => "LIGHTNING_ERROR_MISSING_COLUMN",
            Self::UnsupportedSchema => "LIGHTNING_ERROR_UNSUPPORTED_SCHEMA",
            Self::MissingUpdatedAt => "LIGHTNING_ERROR_MISSING_UPDATED_AT",
            Self::TransientDatabase => "LIGHTNING_ERROR_TRANSIENT_DATABASE",
            Self::Cancelled => "LIGHTNING_ERROR_CANCELLED",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::InvalidQuery,
            Self::MissingColumn,
            Self::UnsupportedSchema,
            Self::MissingUpdatedAt,
            Self::TransientDatabase,
            Self::Cancelled,
        ]
    }
}

fn build_error(code: ErrorCode, title: &str, description: &str) -> LightningError {
    LightningError::new(code.as_str(), title, description)
}

pub(crate) fn invalid_query_error(reason: &str) -> LightningError {
    build_error(
        ErrorCode::InvalidQuery,
        "Query is not materializable",
        &format!("query: {reason}. Supported shape: SELECT over a single base table with bare group-by columns, SUM(col) / COUNT(*) aggregates, and an optional WHERE over base-table columns."),
    )
}

pub(crate) fn missing_column_error(table: &str, column: &str) -> LightningError {
    build_error(
        ErrorCode::MissingColumn,
        "Column not found on base table",
        &format!("schema: column `{column}` does not exist on `{table}`."),
    )
}

pub(crate) fn unsupported_schema_error(table: &str, reason: &str) -> LightningError {
    build_error(
        ErrorCode::UnsupportedSchema,
        "Base table schema is not supported",
        &format!("schema: `{table}`: {reason}. The base table must have exactly one integer primary-key column."),
    )
}

pub(crate) fn missing_updated_at_error(table: &str) -> LightningError {
    build_error(
        ErrorCode::MissingUpdatedAt,
        "Base table lacks an `updated_at` column",
        &format!("schema: `{table}` has no `updated_at` column; backfill needs a last-modification timestamp to separate historical rows from trigger-driven ones."),
    )
}

pub(crate) fn transient_database_error(context: &str, cause: &str) -> LightningError {
    build_error(
        ErrorCode::TransientDatabase,
        "Database operation failed",
        &format!("{context}: {cause}"),
    )
}

pub(crate) fn cancelled_error(context: &str) -> LightningError {
    build_error(
        ErrorCode::Cancelled,
        "Operation cancelled",
        &format!("{context}: cancellation observed before completion; already-applied deltas are harmless and a re-run converges."),
    )
}
