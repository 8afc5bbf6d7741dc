//! HTTP transport backed by `reqwest`

use super::{sanitize_for_log, Method, Request, Response, Transport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Default user agent sent with every request
pub const DEFAULT_USER_AGENT: &str = concat!("armrt/", env!("CARGO_PKG_VERSION"));

/// `reqwest` transport
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    bearer_token: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Network(Box::new(e)))?;

        Ok(Self {
            client,
            bearer_token: None,
        })
    }

    /// Wrap an already-configured `reqwest` client
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            bearer_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let url = request.full_url()?;
        tracing::debug!("{} {}", request.method, url);

        let mut builder = self.client.request(request.method.into(), url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(Box::new(e)))?;

        let mut out = Response::new(response.status().as_u16());
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                out = out.with_header(name.as_str(), value);
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(Box::new(e)))?;

        if !out.is_success() {
            // Security: only log a sanitized/truncated body
            tracing::debug!(
                "HTTP {} - {}",
                out.status,
                sanitize_for_log(&String::from_utf8_lossy(&body))
            );
        }

        Ok(out.with_body(body.to_vec()))
    }
}
