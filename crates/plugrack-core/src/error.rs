//! Error types for the plugin runtime.
//!
//! Messages name the category and the configured type string only. Module
//! paths go to the log, not to the operator-facing error.

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Plugin runtime errors.
///
/// `Clone` so a failed context can hand the same error to every later caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// No type configured for the category.
    #[error("no {category} plugin configured")]
    NotConfigured { category: String },

    /// The configured type string is malformed.
    #[error("invalid plugin type '{value}': {reason}")]
    InvalidType { value: String, reason: String },

    /// No module provides the requested type.
    #[error("{category} plugin '{full_type}' not found")]
    NotFound { category: String, full_type: String },

    /// A module named after the requested type declares something else.
    #[error("{category} plugin '{full_type}' declares type '{declared}'")]
    TypeMismatch {
        category: String,
        full_type: String,
        declared: String,
    },

    /// The module exists but does not accept this host.
    #[error("{category} plugin '{full_type}' is incompatible: {reason}")]
    Incompatible {
        category: String,
        full_type: String,
        reason: String,
    },

    /// The dynamic linker refused the module.
    #[error("{category} plugin '{full_type}' failed to load: {reason}")]
    LoadFailed {
        category: String,
        full_type: String,
        reason: String,
    },

    /// The module is missing one or more contracted symbols.
    #[error(
        "incomplete {category} plugin '{full_type}': {} of {expected} symbols missing ({})",
        .missing.len(),
        .missing.join(", ")
    )]
    Incomplete {
        category: String,
        full_type: String,
        missing: Vec<String>,
        expected: usize,
    },

    /// Teardown refused because modules are still referenced.
    #[error("{category} plugin rack is busy: {} still in use", .in_use.join(", "))]
    RackBusy {
        category: String,
        in_use: Vec<String>,
    },

    /// Two simultaneously active modules claim the same identifier.
    #[error(
        "{category} plugins '{first}' and '{second}' share plugin id {plugin_id}; refusing to start"
    )]
    DuplicatePluginId {
        category: String,
        plugin_id: u32,
        first: String,
        second: String,
    },

    /// A bound operation returned a failure status.
    #[error("{category} plugin '{full_type}' operation {operation} failed with status {code}")]
    OperationFailed {
        category: String,
        full_type: String,
        operation: &'static str,
        code: i32,
    },

    /// A symbol contract is malformed.
    #[error("invalid {category} symbol contract: {reason}")]
    InvalidContract { category: String, reason: String },

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PluginError {
    /// Errors after which the process must not continue starting up.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PluginError::DuplicatePluginId { .. })
    }

    /// The category this error concerns, when there is one.
    pub fn category(&self) -> Option<&str> {
        match self {
            PluginError::NotConfigured { category }
            | PluginError::NotFound { category, .. }
            | PluginError::TypeMismatch { category, .. }
            | PluginError::Incompatible { category, .. }
            | PluginError::LoadFailed { category, .. }
            | PluginError::Incomplete { category, .. }
            | PluginError::RackBusy { category, .. }
            | PluginError::DuplicatePluginId { category, .. }
            | PluginError::OperationFailed { category, .. }
            | PluginError::InvalidContract { category, .. } => Some(category),
            PluginError::InvalidType { .. } | PluginError::Config(_) => None,
        }
    }
}

impl From<toml::de::Error> for PluginError {
    fn from(err: toml::de::Error) -> Self {
        PluginError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_category_and_type() {
        let err = PluginError::NotFound {
            category: "checkpoint".into(),
            full_type: "checkpoint/nope".into(),
        };
        assert_eq!(err.to_string(), "checkpoint plugin 'checkpoint/nope' not found");
        assert_eq!(err.category(), Some("checkpoint"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_incomplete_lists_missing() {
        let err = PluginError::Incomplete {
            category: "checkpoint".into(),
            full_type: "checkpoint/blcr".into(),
            missing: vec!["checkpoint_restart".into()],
            expected: 4,
        };
        assert_eq!(
            err.to_string(),
            "incomplete checkpoint plugin 'checkpoint/blcr': 1 of 4 symbols missing (checkpoint_restart)"
        );
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let err = PluginError::DuplicatePluginId {
            category: "job_submit".into(),
            plugin_id: 9,
            first: "job_submit/lua".into(),
            second: "job_submit/pbs".into(),
        };
        assert!(err.is_fatal());
    }
}
