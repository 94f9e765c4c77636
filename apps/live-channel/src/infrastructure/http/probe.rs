//! HTTP liveness probe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::application::ports::{LivenessProbe, ProbeError};

/// Probes a health endpoint with a plain GET; any 2xx counts as alive.
#[derive(Debug, Clone)]
pub struct HttpLivenessProbe {
    client: Client,
    url: Url,
}

impl HttpLivenessProbe {
    /// Create a probe with its own client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?;
        Ok(Self::with_client(client, url))
    }

    /// Create a probe reusing an existing client.
    #[must_use]
    pub const fn with_client(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    /// The probed URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn probe_with_status(status: u16) -> Result<(), ProbeError> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/healthz", server.uri())).unwrap();
        HttpLivenessProbe::new(url, Duration::from_secs(2))
            .unwrap()
            .check()
            .await
    }

    #[tokio::test]
    async fn any_2xx_is_alive() {
        assert!(probe_with_status(200).await.is_ok());
        assert!(probe_with_status(204).await.is_ok());
    }

    #[tokio::test]
    async fn non_2xx_fails() {
        assert_eq!(probe_with_status(503).await, Err(ProbeError::Status(503)));
        assert_eq!(probe_with_status(404).await, Err(ProbeError::Status(404)));
    }

    #[tokio::test]
    async fn network_error_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{addr}/healthz")).unwrap();

        let result = HttpLivenessProbe::new(url, Duration::from_secs(2))
            .unwrap()
            .check()
            .await;
        assert!(matches!(result, Err(ProbeError::Unreachable(_))));
    }
}
