//! http.rs - Injected network client abstraction
//!
//! Provider adapters only depend on `HttpClient`: GET/POST with a deadline,
//! returning status and body. Authentication headers come from an injected
//! `RequestSigner`; the engine never knows how requests are signed.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderError;

/// Raw provider response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: &str) -> Self {
        HttpResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    /// Pass 2xx responses through, map everything else onto the error taxonomy
    pub fn into_success(self) -> Result<Self, ProviderError> {
        match self.status {
            200..=299 => Ok(self),
            429 => Err(ProviderError::RateLimited),
            401 | 403 => Err(ProviderError::Auth(format!("HTTP {}", self.status))),
            500..=599 => Err(ProviderError::Server {
                status: self.status,
            }),
            status => Err(ProviderError::HttpStatus { status }),
        }
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// `path` is appended to `base_url`; `query` is encoded by the client.
    async fn get(
        &self,
        base_url: &str,
        path: &str,
        query: &[(String, String)],
        deadline: Duration,
    ) -> Result<HttpResponse, ProviderError>;

    async fn post_json(
        &self,
        base_url: &str,
        path: &str,
        body: &serde_json::Value,
        deadline: Duration,
    ) -> Result<HttpResponse, ProviderError>;
}

/// Produces authentication headers for one request
pub trait RequestSigner: Send + Sync {
    /// `request_path` includes the query string; `body` is empty for GET.
    fn sign(&self, method: &str, request_path: &str, body: &str) -> Vec<(String, String)>;
}

/// For unauthenticated public endpoints
#[derive(Debug, Clone, Default)]
pub struct NoSigning;

impl RequestSigner for NoSigning {
    fn sign(&self, _method: &str, _request_path: &str, _body: &str) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Static API key and passphrase headers
#[derive(Debug, Clone)]
pub struct ApiKeyHeaders {
    api_key: String,
    passphrase: String,
}

impl ApiKeyHeaders {
    pub fn new(api_key: &str, passphrase: &str) -> Self {
        ApiKeyHeaders {
            api_key: api_key.to_string(),
            passphrase: passphrase.to_string(),
        }
    }
}

impl RequestSigner for ApiKeyHeaders {
    fn sign(&self, _method: &str, _request_path: &str, _body: &str) -> Vec<(String, String)> {
        vec![
            ("OK-ACCESS-KEY".to_string(), self.api_key.clone()),
            ("OK-ACCESS-PASSPHRASE".to_string(), self.passphrase.clone()),
            (
                "OK-ACCESS-TIMESTAMP".to_string(),
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            ),
        ]
    }
}

/// `HttpClient` over reqwest
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: Client,
    signer: Arc<dyn RequestSigner>,
}

impl ReqwestHttpClient {
    pub fn new(signer: Arc<dyn RequestSigner>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(ReqwestHttpClient { client, signer })
    }

    pub fn unauthenticated() -> Result<Self, ProviderError> {
        Self::new(Arc::new(NoSigning))
    }

    async fn read(response: reqwest::Response) -> Result<HttpResponse, ProviderError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_decode() {
        ProviderError::Malformed(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

fn encode_query(query: &[(String, String)]) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(
        &self,
        base_url: &str,
        path: &str,
        query: &[(String, String)],
        deadline: Duration,
    ) -> Result<HttpResponse, ProviderError> {
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, encode_query(query))
        };
        debug!("GET {}{}", base_url, request_path);

        let mut request = self
            .client
            .get(format!("{}{}", base_url, path))
            .query(query)
            .timeout(deadline);
        for (name, value) in self.signer.sign("GET", &request_path, "") {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        Self::read(response).await
    }

    async fn post_json(
        &self,
        base_url: &str,
        path: &str,
        body: &serde_json::Value,
        deadline: Duration,
    ) -> Result<HttpResponse, ProviderError> {
        let payload = body.to_string();
        debug!("POST {}{} ({} bytes)", base_url, path, payload.len());

        let mut request = self
            .client
            .post(format!("{}{}", base_url, path))
            .header("Content-Type", "application/json")
            .body(payload.clone())
            .timeout(deadline);
        for (name, value) in self.signer.sign("POST", path, &payload) {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        Self::read(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> Result<HttpResponse, ProviderError> {
        HttpResponse {
            status: code,
            body: String::new(),
        }
        .into_success()
    }

    #[test]
    fn test_status_classification() {
        assert!(status(200).is_ok());
        assert_eq!(status(429), Err(ProviderError::RateLimited));
        assert_eq!(status(503), Err(ProviderError::Server { status: 503 }));
        assert!(matches!(status(401), Err(ProviderError::Auth(_))));
        assert!(matches!(status(403), Err(ProviderError::Auth(_))));
        assert_eq!(status(404), Err(ProviderError::HttpStatus { status: 404 }));
    }

    #[test]
    fn test_api_key_headers() {
        let headers = ApiKeyHeaders::new("key", "phrase").sign("GET", "/api", "");
        let names: Vec<_> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["OK-ACCESS-KEY", "OK-ACCESS-PASSPHRASE", "OK-ACCESS-TIMESTAMP"]
        );
        assert_eq!(headers[0].1, "key");
        assert!(NoSigning.sign("GET", "/api", "").is_empty());
    }

    #[test]
    fn test_encode_query() {
        let query = vec![
            ("instType".to_string(), "SPOT".to_string()),
            ("limit".to_string(), "5".to_string()),
        ];
        assert_eq!(encode_query(&query), "instType=SPOT&limit=5");
    }
}
