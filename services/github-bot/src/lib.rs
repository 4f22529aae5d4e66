//! GitHub App Bot Library
//!
//! Authenticates as a GitHub App installation and talks to GitHub over both
//! the REST API and git smart HTTP.
//!
//! The core is [`AuthenticatingTransport`]: a [`RequestExecutor`] wrapper that
//! signs a short-lived RS256 assertion, exchanges it for an installation
//! access token, caches that token until it comes within 60 seconds of
//! expiry, and attaches it to every request it forwards. Two flavours exist:
//!
//! - `new_api`: `Authorization: token <token>` for REST calls
//! - `new_git`: basic credentials `x-access-token:<token>` for git pushes
//!
//! ## Binary
//!
//! - `github-app-bot run`: create a repository, commit a file, push it
//!
//! ## Example
//!
//! ```no_run
//! use github_app_bot::{ApiClient, AppIdentity, AuthenticatingTransport};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let http = Arc::new(reqwest::Client::new());
//! let identity = AppIdentity::new(123456, 78901234)?;
//! let transport = AuthenticatingTransport::new_api_from_key_file(http, identity, "key.pem")?;
//!
//! let api = ApiClient::new(transport);
//! let repo = api.create_org_repository("my-org", "demo").await?;
//! println!("{}", repo.clone_url);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod git;
pub mod strategy;
pub mod token;
pub mod transport;

pub use api::ApiClient;
pub use auth::{AssertionSigner, PrivateKey};
pub use error::{Error, Result};
pub use exchange::TokenExchangeClient;
pub use executor::RequestExecutor;
pub use strategy::AuthStrategy;
pub use token::{AccessToken, TokenCache};
pub use transport::{AppIdentity, AuthenticatingTransport};
