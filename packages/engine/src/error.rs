use crate::errors::ErrorCode;

/// Engine-wide error surface. `code` is one of the catalog codes from
/// [`crate::errors`] (or the raw-database fallback), and `description` is a
/// single line naming the offending component and the underlying cause,
/// surfaced without masking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightningError {
    pub code: String,
    pub title: String,
    pub description: String,
}

impl LightningError {
    pub fn new(
        code: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            title: title.into(),
            description: description.into(),
        }
    }

    /// A database or driver failure that maps to no catalog kind. The
    /// original error text is kept verbatim.
    pub fn unknown(description: impl Into<String>) -> Self {
        Self::new("LIGHTNING_ERROR_UNKNOWN", "Unknown error", description)
    }

    pub fn matches_code(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }

    /// Tags the description with the component that observed the failure
    /// (`query`, `schema`, `backfill chunk #3`). Catalog constructors tag
    /// themselves; this is for raw statement errors bubbling up from a
    /// backend.
    pub fn in_component(mut self, component: &str) -> Self {
        self.description = format!("{component}: {}", self.description);
        self
    }
}

impl std::fmt::Display for LightningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.title, self.code, self.description)
    }
}

impl std::error::Error for LightningError {}
