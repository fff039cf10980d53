use crate::store::ShellResponse;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid request target {0:?}")]
    InvalidTarget(String),
    #[error("network: {0}")]
    Network(String),
}

/// Network side of the cache layer.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, target: &str) -> Result<ShellResponse, FetchError>;
}

/// Fetches shell assets from the origin that serves the shell.
pub struct HttpNetwork {
    http: reqwest::Client,
    origin: Url,
}

impl HttpNetwork {
    pub fn new(origin: &str, timeout: Duration) -> Result<Self, FetchError> {
        let origin = Url::parse(origin).map_err(|_| FetchError::InvalidTarget(origin.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { http, origin })
    }

    fn resolve(&self, target: &str) -> Result<Url, FetchError> {
        self.origin
            .join(target)
            .map_err(|_| FetchError::InvalidTarget(target.to_string()))
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, target: &str) -> Result<ShellResponse, FetchError> {
        let url = self.resolve(target)?;
        tracing::debug!(%url, "network fetch");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(ShellResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_against_origin() {
        let net = HttpNetwork::new("http://127.0.0.1:5173", Duration::from_secs(1)).unwrap();
        assert_eq!(
            net.resolve("/assets/icons/icon-192.png").unwrap().as_str(),
            "http://127.0.0.1:5173/assets/icons/icon-192.png"
        );
    }

    #[test]
    fn test_bad_origin() {
        assert!(HttpNetwork::new("::", Duration::from_secs(1)).is_err());
    }
}
