//! Request executor abstraction
//!
//! Anything that takes an outbound [`reqwest::Request`] and produces a
//! response. The installation transport wraps one and is one itself, so
//! transports can be stacked or handed to any client that speaks this trait.

use crate::error::Result;
use async_trait::async_trait;
use reqwest::{Request, Response};
use std::sync::Arc;

/// Performs a single HTTP request
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Send the request and return the response unchanged
    async fn execute(&self, request: Request) -> Result<Response>;
}

#[async_trait]
impl RequestExecutor for reqwest::Client {
    async fn execute(&self, request: Request) -> Result<Response> {
        Ok(reqwest::Client::execute(self, request).await?)
    }
}

#[async_trait]
impl<E: RequestExecutor + ?Sized> RequestExecutor for Arc<E> {
    async fn execute(&self, request: Request) -> Result<Response> {
        (**self).execute(request).await
    }
}
