//! Installation token exchange
//!
//! Trades a signed app assertion for an installation access token with a
//! single `POST {base}/installations/{id}/access_tokens`.

use crate::error::{Error, Result};
use crate::executor::RequestExecutor;
use crate::token::AccessToken;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, Request, Url};
use tracing::{debug, info, warn};

/// Default base for GitHub App endpoints
pub const DEFAULT_BASE_URL: &str = "https://api.github.com/app";

/// Accept header selecting the GitHub Apps API preview
pub const APPS_ACCEPT_HEADER: &str = "application/vnd.github.machine-man-preview+json";

/// Client for the access token endpoint
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    base_url: String,
}

impl Default for TokenExchangeClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl TokenExchangeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint for one installation
    pub fn access_tokens_url(&self, installation_id: u64) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/installations/{}/access_tokens",
            self.base_url, installation_id
        ))?)
    }

    /// Exchange `assertion` for an installation token using `executor`
    pub async fn exchange<E>(
        &self,
        executor: &E,
        installation_id: u64,
        assertion: &str,
    ) -> Result<AccessToken>
    where
        E: RequestExecutor + ?Sized,
    {
        let url = self.access_tokens_url(installation_id)?;

        let mut request = Request::new(Method::POST, url);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", assertion))?;
        bearer.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, bearer);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static(APPS_ACCEPT_HEADER));

        debug!(installation_id, "Requesting installation access token");
        let response = executor.execute(request).await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(
                installation_id,
                status = status.as_u16(),
                "Installation token exchange rejected"
            );
            return Err(Error::Exchange {
                status: status.as_u16(),
                body,
            });
        }

        let token: AccessToken = serde_json::from_str(&body).map_err(|e| {
            warn!(installation_id, error = %e, "Undecodable installation token response");
            Error::Exchange {
                status: status.as_u16(),
                body: body.clone(),
            }
        })?;

        info!(
            installation_id,
            expires_at = %token.expires_at,
            "Obtained installation access token"
        );

        Ok(token)
    }
}
