//! HTTP client for the console REST API.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::probe::HttpLivenessProbe;
use crate::infrastructure::config::ChannelConfig;

/// Message shown when the backend cannot be reached at all.
pub const UNREACHABLE_MESSAGE: &str =
    "Unable to connect to server. Please check if the backend is running.";

/// API client error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request never got a response.
    #[error("Unable to connect to server. Please check if the backend is running.")]
    Unreachable {
        /// Underlying transport error, for logs.
        cause: String,
    },
    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Server-provided detail, or the status line.
        message: String,
    },
    /// A 2xx body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),
    /// The underlying client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl ApiError {
    /// HTTP status, if the server responded.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Error body shapes the backend uses.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// JSON client for the console API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    api_base: String,
    health_url: Url,
}

impl ApiClient {
    /// Create a client for `api_base` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_base: &Url, health_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.as_str().trim_end_matches('/').to_string(),
            health_url,
        })
    }

    /// Create a client from the channel configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ApiError> {
        Self::new(
            &config.endpoints.api_base,
            config.endpoints.health_url.clone(),
            config.http_timeout,
        )
    }

    /// Make a GET request.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, non-2xx status or bad JSON.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None::<&()>).await
    }

    /// Make a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, non-2xx status or bad JSON.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Make a PUT request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, non-2xx status or bad JSON.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Make a DELETE request.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, non-2xx status or bad JSON.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, None::<&()>).await
    }

    /// Fetch the health endpoint, bypassing the API base.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is down or unhealthy.
    pub async fn check_health(&self) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(self.health_url.clone())
            .send()
            .await
            .map_err(unreachable)?;
        read_json(response).await
    }

    /// Check whether the backend answers its health endpoint.
    pub async fn is_server_running(&self) -> bool {
        self.check_health().await.is_ok()
    }

    /// Liveness probe sharing this client's connection pool.
    #[must_use]
    pub fn liveness_probe(&self) -> HttpLivenessProbe {
        HttpLivenessProbe::with_client(self.client.clone(), self.health_url.clone())
    }

    /// A poll producer that GETs `path` on every call.
    pub fn producer<T>(
        &self,
        path: impl Into<String>,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.clone();
        let path = path.into();
        move || {
            let client = client.clone();
            let path = path.clone();
            Box::pin(async move { client.get(&path).await })
        }
    }

    async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        let url = format!("{}{path}", self.api_base);
        tracing::debug!(%method, %url, "API request");

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(%url, error = %e, "API request failed");
            unreachable(e)
        })?;

        read_json(response).await
    }
}

fn unreachable(e: reqwest::Error) -> ApiError {
    ApiError::Unreachable {
        cause: e.to_string(),
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let text = response.text().await.map_err(unreachable)?;

    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(status, &text),
        });
    }

    let text = if text.trim().is_empty() { "null" } else { &text };
    serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Pick the most useful error description from a failed response.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    let detail = parsed.detail.and_then(|detail| match detail {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    });

    detail
        .or_else(|| parsed.message.filter(|m| !m.is_empty()))
        .unwrap_or_else(|| {
            format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            )
        })
}
