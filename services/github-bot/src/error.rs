//! Error types for the installation transport
//!
//! Construction-time errors (`KeyParse`, `KeyFile`, `InvalidIdentity`) abort
//! setup. Everything else is returned to the caller whose request triggered it.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by the authenticating transport and its parts
#[derive(Debug, Error)]
pub enum Error {
    /// Private key bytes are not a usable RSA PEM
    #[error("could not parse private key: {0}")]
    KeyParse(#[source] jsonwebtoken::errors::Error),

    /// Private key file could not be read
    #[error("could not read private key {path:?}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// App or installation id is not a positive integer
    #[error("invalid app identity: {0}")]
    InvalidIdentity(String),

    /// Signing the bearer assertion failed
    #[error("could not sign assertion: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    /// Token exchange returned a non-2xx status or an undecodable body
    #[error("token exchange failed with status {status}: {body}")]
    Exchange { status: u16, body: String },

    /// The wrapped request executor failed
    #[error(transparent)]
    Executor(#[from] reqwest::Error),

    /// Exchange URL could not be built from the base URL
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Token material is not a valid header value
    #[error("invalid authorization header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// A refresh this caller waited on failed for a reason that has no
    /// owned copy; the shared cause is kept as the source
    #[error("token refresh failed: {0}")]
    Refresh(#[source] Arc<Error>),
}

impl Error {
    /// HTTP status carried by an exchange failure
    pub fn exchange_status(&self) -> Option<u16> {
        match self {
            Error::Exchange { status, .. } => Some(*status),
            Error::Refresh(cause) => cause.exchange_status(),
            _ => None,
        }
    }

    /// Owned copy of a shared refresh failure, handed to each caller that
    /// waited on it
    pub(crate) fn replay(shared: &Arc<Error>) -> Error {
        match shared.as_ref() {
            Error::Exchange { status, body } => Error::Exchange {
                status: *status,
                body: body.clone(),
            },
            Error::InvalidUrl(e) => Error::InvalidUrl(*e),
            _ => Error::Refresh(shared.clone()),
        }
    }
}

/// Result alias for transport operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_display() {
        let err = Error::Exchange {
            status: 500,
            body: r#"{"error":"boom"}"#.to_string(),
        };
        assert_eq!(
            err.to_string(),
            r#"token exchange failed with status 500: {"error":"boom"}"#
        );
        assert_eq!(err.exchange_status(), Some(500));
    }

    #[test]
    fn test_identity_error_has_no_exchange_status() {
        let err = Error::InvalidIdentity("app id must be positive".to_string());
        assert_eq!(err.exchange_status(), None);
    }

    #[test]
    fn test_replay_copies_exchange_failure() {
        let shared = Arc::new(Error::Exchange {
            status: 502,
            body: "bad gateway".to_string(),
        });
        match Error::replay(&shared) {
            Error::Exchange { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("expected exchange error, got {other:?}"),
        }
    }

    #[test]
    fn test_replay_wraps_failures_without_owned_copy() {
        let shared = Arc::new(Error::InvalidIdentity("gone".to_string()));
        let replayed = Error::replay(&shared);
        assert!(matches!(replayed, Error::Refresh(_)));
        assert_eq!(replayed.to_string(), "token refresh failed: invalid app identity: gone");
        assert!(std::error::Error::source(&replayed).is_some());
    }
}
