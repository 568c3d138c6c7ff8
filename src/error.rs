//! Error types for the presenter layer
//!
//! Configuration and rendering errors are programmer errors: they are surfaced
//! at definition time or on first use and are not meant to be recovered from.
//! Malformed request parameters never reach this type; they are normalised in
//! [`crate::params`].

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// No presenter is registered for the class (or any of its STI bases).
    #[error("no presenter registered for `{class}` in namespace `{namespace}`")]
    PresenterNotFound { class: String, namespace: String },

    /// A resource or class name did not resolve to a registered model class.
    #[error("unknown model class `{0}`")]
    UnknownModel(String),

    /// A configuration key holding a nested node or array was assigned a scalar.
    #[error("configuration key `{0}` holds a nested configuration or array and cannot be overwritten")]
    ConfigurationOverwrite(String),

    /// A field, association, filter or sort order was declared inconsistently.
    #[error("invalid declaration for `{name}`: {reason}")]
    InvalidDeclaration { name: String, reason: String },

    /// The presenter declares neither fields nor a custom present hook.
    #[error("presenter for `{0}` does not define any fields or a present hook")]
    PresentNotImplemented(String),

    /// A field or association references a conditional that was never declared.
    #[error("unknown conditional `{0}`")]
    UnknownConditional(String),

    /// A dynamic block called a helper that was never declared.
    #[error("unknown helper `{0}`")]
    UnknownHelper(String),

    /// A column or table name is not a plain SQL identifier.
    #[error("invalid SQL identifier `{0}`")]
    InvalidIdentifier(String),

    /// Presenter validation found one or more problems.
    #[error("presenter validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    // ========================================================================
    // Capability errors
    // ========================================================================
    /// The search backend signalled it cannot answer right now.
    #[error("search is currently unavailable")]
    SearchUnavailable,

    /// The search backend failed.
    #[error("search failed: {0}")]
    Search(#[source] anyhow::Error),

    /// The data source does not implement an optional capability.
    #[error("data source does not support {0}")]
    UnsupportedCapability(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // ========================================================================
    // Rendering errors
    // ========================================================================
    /// A lookup produced something that cannot be indexed by model id and no
    /// custom fetch was declared.
    #[error("lookup for `{0}` did not return a map keyed by model id; declare a lookup_fetch")]
    LookupNotIndexable(String),

    /// An array block field has no dynamic/lookup/via and the model has no
    /// attribute or association of the same name.
    #[error("block field `{0}` needs a dynamic, lookup or via source")]
    BlockFieldWithoutSource(String),

    /// An association was rendered on a record it was never preloaded for.
    #[error("association `{association}` has not been loaded on `{class}`")]
    AssociationNotLoaded { class: String, association: String },
}

impl Error {
    /// Whether this error indicates a mistake in presenter or schema
    /// configuration rather than a runtime capability failure.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::PresenterNotFound { .. }
                | Error::UnknownModel(_)
                | Error::ConfigurationOverwrite(_)
                | Error::InvalidDeclaration { .. }
                | Error::PresentNotImplemented(_)
                | Error::UnknownConditional(_)
                | Error::UnknownHelper(_)
                | Error::InvalidIdentifier(_)
                | Error::Validation(_)
        )
    }

    pub(crate) fn invalid_declaration(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidDeclaration {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_classified() {
        assert!(Error::UnknownConditional("is_owner".into()).is_configuration_error());
        assert!(Error::ConfigurationOverwrite("fields".into()).is_configuration_error());
        assert!(!Error::SearchUnavailable.is_configuration_error());
        assert!(!Error::LookupNotIndexable("stats".into()).is_configuration_error());
    }

    #[test]
    fn test_validation_message_joins_problems() {
        let err = Error::Validation(vec!["first".into(), "second".into()]);
        assert_eq!(err.to_string(), "presenter validation failed: first; second");
    }
}
