//! `reqwest`-backed [`HttpClient`].

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use crate::{HttpClient, HttpRequest, HttpResponse, ProviderError};

/// Outbound HTTP client used by `call_webhook` steps.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("workflow-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Permanent(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (shared connection pool, custom TLS, …).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn request(&self, request: &HttpRequest) -> Result<HttpResponse, ProviderError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| ProviderError::Permanent(format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = match body {
                serde_json::Value::String(s) => builder.body(s.clone()),
                other => builder.json(other),
            };
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                ProviderError::Permanent(e.to_string())
            } else {
                ProviderError::Transient(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        debug!(url = %request.url, status, "http request completed");

        Ok(HttpResponse { status, body })
    }
}
