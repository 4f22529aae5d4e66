//! GitHub REST calls made by the bot
//!
//! Requests are plain [`reqwest::Request`]s sent through an API-strategy
//! transport, which adds the installation token.

use crate::executor::RequestExecutor;
use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Request, Url};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default GitHub REST API base
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

const GITHUB_JSON: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Repository fields the bot needs
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
}

#[derive(Debug, Serialize)]
struct CreateRepositoryRequest<'a> {
    name: &'a str,
}

/// REST client over an authenticated executor
pub struct ApiClient<E> {
    executor: E,
    base_url: String,
}

impl<E: RequestExecutor> ApiClient<E> {
    pub fn new(executor: E) -> Self {
        Self::with_base_url(executor, DEFAULT_API_BASE_URL)
    }

    pub fn with_base_url(executor: E, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            executor,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<Request> {
        let url = Url::parse(&format!("{}{}", self.base_url, path))
            .with_context(|| format!("Invalid API URL for {}", path))?;

        let mut request = Request::new(method, url);
        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_JSON));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(GITHUB_API_VERSION),
        );
        Ok(request)
    }

    /// Create a repository owned by `org`
    pub async fn create_org_repository(&self, org: &str, name: &str) -> Result<Repository> {
        let mut request = self.request(Method::POST, &format!("/orgs/{}/repos", org))?;
        let body = serde_json::to_vec(&CreateRepositoryRequest { name })?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(body.into());

        let response = self
            .executor
            .execute(request)
            .await
            .context("Failed to send create repository request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub API error ({}): {}", status, body);
        }

        let repository: Repository = response
            .json()
            .await
            .context("Failed to parse repository response")?;

        info!(repository = %repository.full_name, "Created repository");
        Ok(repository)
    }
}
