//! Transport collaborator: sends one attempt to one replica.
//!
//! The pipeline only needs a status, headers and body back, or a [`TransportError`]
//! when nothing was received. [`HttpTransport`] provides that over `reqwest`.

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::protocol::Headers;
use crate::types::{StoreRequest, StoreResponse};
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// Sends a request to a replica.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` to `replica`.
    ///
    /// Any HTTP status is a successful send; only failures where no response was
    /// received are errors.
    async fn send(
        &self,
        request: &StoreRequest,
        replica: &Url,
    ) -> std::result::Result<StoreResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        request: &StoreRequest,
        replica: &Url,
    ) -> std::result::Result<StoreResponse, TransportError> {
        (**self).send(request, replica).await
    }
}

/// `reqwest`-backed transport.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport honoring the configured per-attempt timeout.
    pub fn new(config: &ClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &StoreRequest,
        replica: &Url,
    ) -> std::result::Result<StoreResponse, TransportError> {
        let target = replica.join(&request.path).map_err(|e| {
            let message = format!("invalid request path '{}'", request.path);
            TransportError::new(replica.as_str(), message).with_source(e)
        })?;

        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| {
                TransportError::new(target.as_str(), format!("invalid method '{}'", request.method))
                    .with_source(e)
            })?;

        let mut req_builder = self.client.request(method, target.clone());
        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }
        if !request.body.is_empty() {
            req_builder = req_builder.body(request.body.clone());
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| reqwest_failure(target.as_str(), e))?;

        let status = response.status().as_u16();
        let headers = Headers::from(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| reqwest_failure(target.as_str(), e))?;

        Ok(StoreResponse {
            status,
            headers,
            body,
        })
    }
}

fn reqwest_failure(url: &str, err: reqwest::Error) -> TransportError {
    let message = if err.is_timeout() {
        "request timed out before a response was received"
    } else if err.is_connect() {
        "failed to connect to replica"
    } else if err.is_body() || err.is_decode() {
        "failed to read response body"
    } else {
        "request failed"
    };
    TransportError::new(url, message).with_source(err)
}
