//! Installation-authenticated request executor
//!
//! [`AuthenticatingTransport`] wraps another [`RequestExecutor`]. Every request
//! gets a valid installation token (cached, or freshly exchanged when the cache
//! is empty or inside the skew window) attached through its [`AuthStrategy`],
//! and is then handed to the wrapped executor. Responses, including 401/403,
//! are returned untouched; a rejected token is only replaced once it nears
//! its stated expiry.
//!
//! One transport serves one installation. It is safe to share between tasks.

use crate::auth::{AssertionSigner, PrivateKey};
use crate::error::{Error, Result};
use crate::exchange::TokenExchangeClient;
use crate::executor::RequestExecutor;
use crate::strategy::AuthStrategy;
use crate::token::{AccessToken, TokenCache};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Request, Response};
use std::path::Path;
use tracing::debug;

/// GitHub App and installation the transport acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppIdentity {
    pub app_id: u64,
    pub installation_id: u64,
}

impl AppIdentity {
    /// Both ids must be positive
    pub fn new(app_id: u64, installation_id: u64) -> Result<Self> {
        if app_id == 0 {
            return Err(Error::InvalidIdentity("app id must be positive".to_string()));
        }
        if installation_id == 0 {
            return Err(Error::InvalidIdentity(
                "installation id must be positive".to_string(),
            ));
        }
        Ok(Self {
            app_id,
            installation_id,
        })
    }
}

/// Request executor that authenticates as a GitHub App installation
pub struct AuthenticatingTransport<E> {
    inner: E,
    identity: AppIdentity,
    signer: AssertionSigner,
    exchange: TokenExchangeClient,
    cache: TokenCache,
    strategy: AuthStrategy,
}

impl<E: RequestExecutor> AuthenticatingTransport<E> {
    /// Transport for REST API calls (`Authorization: token ...`)
    pub fn new_api(inner: E, identity: AppIdentity, private_key_pem: &[u8]) -> Result<Self> {
        Self::new(inner, identity, private_key_pem, AuthStrategy::ApiBearer)
    }

    /// Transport for git smart HTTP (basic credentials)
    pub fn new_git(inner: E, identity: AppIdentity, private_key_pem: &[u8]) -> Result<Self> {
        Self::new(inner, identity, private_key_pem, AuthStrategy::GitBasic)
    }

    pub fn new_api_from_key_file(
        inner: E,
        identity: AppIdentity,
        private_key_file: impl AsRef<Path>,
    ) -> Result<Self> {
        let key = PrivateKey::from_file(private_key_file)?;
        Ok(Self::with_key(inner, identity, key, AuthStrategy::ApiBearer))
    }

    pub fn new_git_from_key_file(
        inner: E,
        identity: AppIdentity,
        private_key_file: impl AsRef<Path>,
    ) -> Result<Self> {
        let key = PrivateKey::from_file(private_key_file)?;
        Ok(Self::with_key(inner, identity, key, AuthStrategy::GitBasic))
    }

    /// Parse the key and bind `strategy`; a bad key yields no transport
    pub fn new(
        inner: E,
        identity: AppIdentity,
        private_key_pem: &[u8],
        strategy: AuthStrategy,
    ) -> Result<Self> {
        let key = PrivateKey::from_pem(private_key_pem)?;
        Ok(Self::with_key(inner, identity, key, strategy))
    }

    /// Build from an already parsed key
    pub fn with_key(
        inner: E,
        identity: AppIdentity,
        key: PrivateKey,
        strategy: AuthStrategy,
    ) -> Self {
        Self {
            inner,
            identity,
            signer: AssertionSigner::new(key),
            exchange: TokenExchangeClient::default(),
            cache: TokenCache::new(),
            strategy,
        }
    }

    /// Point the token exchange at another base (GitHub Enterprise, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.exchange = TokenExchangeClient::new(base_url);
        self
    }

    async fn valid_token<C>(&self, clock: C) -> Result<AccessToken>
    where
        C: FnOnce() -> DateTime<Utc>,
    {
        self.cache
            .get_valid_token(clock, |now| self.refresh(now))
            .await
    }

    async fn refresh(&self, now: DateTime<Utc>) -> Result<AccessToken> {
        debug!(
            app_id = self.identity.app_id,
            installation_id = self.identity.installation_id,
            "Refreshing installation token"
        );
        let assertion = self.signer.sign(self.identity.app_id, now)?;
        self.exchange
            .exchange(&self.inner, self.identity.installation_id, &assertion)
            .await
    }

    /// Authenticate and send `request`, reading the time from `clock` once
    /// the token cache is locked
    pub(crate) async fn execute_with_clock<C>(
        &self,
        mut request: Request,
        clock: C,
    ) -> Result<Response>
    where
        C: FnOnce() -> DateTime<Utc>,
    {
        let token = self.valid_token(clock).await?;
        self.strategy.apply(&mut request, &token.token)?;
        debug!(
            installation_id = self.identity.installation_id,
            strategy = %self.strategy,
            method = %request.method(),
            url = %request.url(),
            "Sending authenticated request"
        );
        self.inner.execute(request).await
    }
}

#[async_trait]
impl<E: RequestExecutor> RequestExecutor for AuthenticatingTransport<E> {
    async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_with_clock(request, Utc::now).await
    }
}

impl<E> std::fmt::Debug for AuthenticatingTransport<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatingTransport")
            .field("identity", &self.identity)
            .field("strategy", &self.strategy)
            .field("base_url", &self.exchange.base_url())
            .finish_non_exhaustive()
    }
}
