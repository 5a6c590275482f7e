/// Error kinds raised by the identity and reconciliation engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("missing category mapping for: {}", .names.join(", "))]
    MissingCategory { names: Vec<String> },

    #[error("failed to persist {document}: {source}")]
    Persistence {
        document: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt ledger entry for {user}/{code}: {detail}")]
    CorruptLedgerEntry {
        user: String,
        code: String,
        detail: String,
    },

    #[error(
        "ambiguous identity {name} ({first_category}/{second_category}) shared by {}",
        .codes.join(", ")
    )]
    AmbiguousIdentity {
        name: String,
        first_category: String,
        second_category: String,
        codes: Vec<String>,
    },

    #[error("unknown achievement code: {0}")]
    UnknownAchievement(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("user already exists: {0}")]
    DuplicateUser(String),

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("category {name} is still used by {count} achievement(s)")]
    CategoryInUse { name: String, count: usize },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn persistence(document: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Persistence {
            document: document.into(),
            source,
        }
    }

    /// Soft kinds are reported and logged but never abort a transaction.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            EngineError::CorruptLedgerEntry { .. } | EngineError::AmbiguousIdentity { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_category_lists_every_name() {
        let err = EngineError::MissingCategory {
            names: vec!["未知分类".to_string(), "Other".to_string()],
        };
        assert_eq!(err.to_string(), "missing category mapping for: 未知分类, Other");
        assert!(!err.is_soft());
    }

    #[test]
    fn soft_kinds() {
        let err = EngineError::CorruptLedgerEntry {
            user: "Default".to_string(),
            code: "10100001".to_string(),
            detail: "expected object".to_string(),
        };
        assert!(err.is_soft());
    }
}
