//! How an installation token is attached to an outbound request

use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;

/// Username GitHub expects for installation tokens over git smart HTTP
pub const GIT_TOKEN_USERNAME: &str = "x-access-token";

/// Authorization scheme, fixed when the transport is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// REST API calls: `Authorization: token <value>`
    ApiBearer,
    /// git over HTTP: basic credentials `x-access-token:<value>`
    GitBasic,
}

impl AuthStrategy {
    /// Set the authorization header on `request`, replacing any existing one
    pub fn apply(&self, request: &mut Request, token: &str) -> Result<()> {
        let raw = match self {
            AuthStrategy::ApiBearer => format!("token {}", token),
            AuthStrategy::GitBasic => {
                let credentials = STANDARD.encode(format!("{}:{}", GIT_TOKEN_USERNAME, token));
                format!("Basic {}", credentials)
            }
        };

        let mut value = HeaderValue::from_str(&raw)?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);

        Ok(())
    }
}

impl std::fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStrategy::ApiBearer => write!(f, "api"),
            AuthStrategy::GitBasic => write!(f, "git"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn request() -> Request {
        Request::new(Method::GET, "https://api.github.com/user".parse().unwrap())
    }

    #[test]
    fn test_api_bearer_header() {
        let mut req = request();
        AuthStrategy::ApiBearer.apply(&mut req, "abc123").unwrap();

        let value = req.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(value, "token abc123");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_git_basic_credentials() {
        let mut req = request();
        AuthStrategy::GitBasic.apply(&mut req, "abc123").unwrap();

        let value = req.headers().get(AUTHORIZATION).unwrap().to_str().unwrap();
        let encoded = value.strip_prefix("Basic ").unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "x-access-token:abc123");
    }

    #[test]
    fn test_apply_replaces_existing_authorization() {
        let mut req = request();
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer old"));
        AuthStrategy::ApiBearer.apply(&mut req, "new").unwrap();

        assert_eq!(req.headers().get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(req.headers().get(AUTHORIZATION).unwrap(), "token new");
    }

    #[test]
    fn test_token_with_newline_is_rejected() {
        let mut req = request();
        assert!(AuthStrategy::ApiBearer.apply(&mut req, "abc\n123").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(AuthStrategy::ApiBearer.to_string(), "api");
        assert_eq!(AuthStrategy::GitBasic.to_string(), "git");
    }
}
