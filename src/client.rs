//! A minimal interface for sending payloads over HTTP.
//!
//! Users sometimes choose http clients that rely on a certain runtime. This
//! trait allows them to bring their own; the `reqwest-client` feature ships
//! an implementation for `reqwest::Client`.

use std::sync::Arc;

use async_trait::async_trait;
use http::{Request, Response};

use crate::error::BoxError;

/// Sends one request and returns the peer's full response. Implementations
/// must preserve the response status and headers; the exporter reads both.
#[async_trait]
pub trait HttpClient: std::fmt::Debug + Send + Sync {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, BoxError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, BoxError> {
        self.as_ref().send(request).await
    }
}

#[cfg(feature = "reqwest-client")]
#[async_trait]
impl HttpClient for reqwest::Client {
    async fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, BoxError> {
        let request = request.try_into()?;
        let response = self.execute(request).await?;
        let mut builder = http::Response::builder().status(response.status());
        for (name, value) in response.headers() {
            builder = builder.header(name, value);
        }
        let body = response.bytes().await?.to_vec();
        Ok(builder.body(body)?)
    }
}
