//! Error types shared by stores, builders and the resolver.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors produced by stores and their configuration.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store was disposed before or during the operation.
    #[error("store `{store}` has been disposed")]
    Disposed { store: &'static str },

    /// `update` was called before `initialize`.
    #[error("store `{store}` is not initialized")]
    NotInitialized { store: &'static str },

    /// `initialize` was called a second time.
    #[error("store `{store}` is already initialized")]
    AlreadyInitialized { store: &'static str },

    /// A second registration for the same key.
    #[error("{kind} `{name}` is already registered")]
    DuplicateRegistration { kind: RegistrationKind, name: String },

    /// The cancellation token fired while the pipeline was running.
    #[error("operation was cancelled")]
    Cancelled,

    /// A middleware hook returned an error.
    #[error("middleware `{middleware}` failed: {error:#}")]
    Middleware {
        middleware: &'static str,
        error: anyhow::Error,
    },

    /// A binding required by a factory is not registered.
    #[error("no binding registered for `{name}`")]
    MissingDependency { name: String },

    /// A factory looked up its own key while being constructed.
    #[error("circular lookup while constructing `{name}`")]
    CircularLookup { name: String },

    /// Options could not be bound from configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Wraps a hook failure, passing store errors raised inside hooks through unchanged.
    pub(crate) fn from_hook(middleware: &'static str, error: anyhow::Error) -> Self {
        match error.downcast::<StoreError>() {
            Ok(inner) => inner,
            Err(error) => StoreError::Middleware { middleware, error },
        }
    }
}

/// Which registry a duplicate registration was rejected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    Middleware,
    Options,
    Service,
    Store,
}

impl std::fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationKind::Middleware => f.write_str("middleware"),
            RegistrationKind::Options => f.write_str("options"),
            RegistrationKind::Service => f.write_str("service"),
            RegistrationKind::Store => f.write_str("store"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_errors_are_wrapped() {
        let err = StoreError::from_hook("audit", anyhow::anyhow!("disk full"));
        match err {
            StoreError::Middleware { middleware, error } => {
                assert_eq!(middleware, "audit");
                assert_eq!(error.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn store_errors_pass_through_hooks() {
        let err = StoreError::from_hook("audit", StoreError::Cancelled.into());
        assert!(matches!(err, StoreError::Cancelled));
    }

    #[test]
    fn duplicate_registration_message() {
        let err = StoreError::DuplicateRegistration {
            kind: RegistrationKind::Options,
            name: "Settings".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "options `Settings` is already registered"
        );
    }
}
