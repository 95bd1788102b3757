use crate::backend::Backend;
use crate::errors::{missing_column_error, unsupported_schema_error};
use crate::{LightningError, Value};

/// One base-table column as reported by `INFORMATION_SCHEMA.COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    /// Exact SQL type, e.g. `decimal(10,2)` or `int unsigned`.
    pub column_type: String,
    pub nullable: bool,
}

impl ColumnProfile {
    /// Whether the type is in the MySQL integer family (signed or unsigned).
    pub fn is_integer(&self) -> bool {
        let base = self
            .column_type
            .split(|c: char| c == '(' || c == ' ')
            .next()
            .unwrap_or("");
        matches!(
            base.to_ascii_lowercase().as_str(),
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint"
        )
    }
}

/// Reads column metadata for the current schema (`DATABASE()`).
pub struct SchemaProbe<'a> {
    backend: &'a dyn Backend,
}

impl<'a> SchemaProbe<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    /// Profiles for the requested columns, in request order.
    /// Fails if any requested column is absent from the table.
    pub async fn column_profiles(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<ColumnProfile>, LightningError> {
        let all = self.all_columns(table).await?;
        columns
            .iter()
            .map(|wanted| {
                all.iter()
                    .find(|profile| profile.name.eq_ignore_ascii_case(wanted))
                    .cloned()
                    .ok_or_else(|| missing_column_error(table, wanted))
            })
            .collect()
    }

    pub async fn has_column(&self, table: &str, column: &str) -> Result<bool, LightningError> {
        let all = self.all_columns(table).await?;
        Ok(all
            .iter()
            .any(|profile| profile.name.eq_ignore_ascii_case(column)))
    }

    /// The table's single primary-key column.
    /// Fails when the key is absent or spans multiple columns.
    pub async fn primary_key_column(
        &self,
        table: &str,
    ) -> Result<ColumnProfile, LightningError> {
        let result = self
            .backend
            .execute(
                "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE \
                 FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_KEY = 'PRI' \
                 ORDER BY ORDINAL_POSITION",
                &[Value::Text(table.to_string())],
            )
            .await?;

        let mut profiles = rows_to_profiles(&result.rows, table)?;
        match profiles.len() {
            0 => Err(unsupported_schema_error(table, "no primary key")),
            1 => Ok(profiles.remove(0)),
            n => Err(unsupported_schema_error(
                table,
                &format!("composite primary key ({n} columns)"),
            )),
        }
    }

    async fn all_columns(&self, table: &str) -> Result<Vec<ColumnProfile>, LightningError> {
        let result = self
            .backend
            .execute(
                "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE \
                 FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                &[Value::Text(table.to_string())],
            )
            .await?;
        rows_to_profiles(&result.rows, table)
    }
}

fn rows_to_profiles(
    rows: &[Vec<Value>],
    table: &str,
) -> Result<Vec<ColumnProfile>, LightningError> {
    rows.iter()
        .map(|row| {
            let [name, column_type, is_nullable] = row.as_slice() else {
                return Err(LightningError::unknown(format!(
                    "schema: malformed INFORMATION_SCHEMA row for `{table}`"
                )));
            };
            let (Some(name), Some(column_type), Some(is_nullable)) =
                (name.as_text(), column_type.as_text(), is_nullable.as_text())
            else {
                return Err(LightningError::unknown(format!(
                    "schema: non-text INFORMATION_SCHEMA row for `{table}`"
                )));
            };
            Ok(ColumnProfile {
                name: name.to_string(),
                column_type: column_type.to_string(),
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
            })
        })
        .collect()
}
