// src/error.rs
use thiserror::Error;

use crate::cert::CertError;

/// Errors surfaced by a reconcile invocation.
///
/// Every variant aborts the current invocation. The message ends up on the
/// cluster's `Ready` condition, so keep the text readable for operators.
#[derive(Debug, Error)]
pub enum Error {
    /// Key or certificate generation failed
    #[error("certificate error: {0}")]
    Pki(#[from] CertError),

    /// Kubernetes API error while reading or writing records
    #[error("kubernetes error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    /// The cluster's TLS settings cannot be used as given
    #[error("invalid configuration for {cluster}: {message}")]
    Config { cluster: String, message: String },

    /// The operator configuration file could not be loaded
    #[error("operator config {path}: {message}")]
    OperatorConfig { path: String, message: String },

    /// A resource is missing metadata the controller relies on
    #[error("missing object key: {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    pub fn config(cluster: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    /// Configuration errors will not heal by retrying with the same input.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_flagged() {
        let err = Error::config("logs", "altIps[0]: not an IP address");
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "invalid configuration for logs: altIps[0]: not an IP address"
        );
    }

    #[test]
    fn pki_errors_are_not_config_errors() {
        let err = Error::from(CertError::InvalidParameter("key size 512".to_string()));
        assert!(!err.is_config());
        assert!(err.to_string().contains("key size 512"));
    }
}
