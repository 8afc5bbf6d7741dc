//! Transport abstraction
//!
//! The runtime never talks to the network itself. It hands a [`Request`] to a
//! [`Transport`] and interprets the [`Response`] that comes back.
//!
//! # Module Structure
//!
//! - [`http`] - `reqwest`-backed transport used in production
//!
//! # Example
//!
//! ```ignore
//! use armrt::transport::{HttpTransport, Request, Transport};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let transport = HttpTransport::new("armrt/0.2")?.with_bearer_token("token");
//!     let response = transport
//!         .send(Request::get("https://management.azure.com/subscriptions").with_query("api-version", "2022-12-01"))
//!         .await?;
//!     println!("{}", response.status);
//!     Ok(())
//! }
//! ```

pub mod http;

#[cfg(test)]
pub(crate) mod scripted;

pub use http::HttpTransport;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum length of response body kept in errors and logs
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize a response body for logging
/// Truncates long bodies and drops control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.chars().count() > MAX_LOG_BODY_LENGTH {
        let head: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control(), "")
}

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Patch,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outgoing request
///
/// Query parameters are kept as a structured list; `url` may still carry a
/// query string of its own, in which case the list is appended to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Build a request from an absolute URL, moving its query string into
    /// the structured parameter list without reinterpreting any value.
    pub fn from_url(method: Method, url: &Url) -> Self {
        let query = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut base = url.clone();
        base.set_query(None);
        base.set_fragment(None);

        Self {
            method,
            url: base.to_string(),
            query,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of a query parameter, looking at both the structured list and the URL
    pub fn query_param(&self, key: &str) -> Option<String> {
        if let Some((_, v)) = self.query.iter().find(|(k, _)| k == key) {
            return Some(v.clone());
        }
        Url::parse(&self.url)
            .ok()?
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Fully-qualified URL with the structured query appended
    pub fn full_url(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.url).map_err(|e| TransportError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
        }

        Ok(url)
    }
}

/// Raw response handed back by a transport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Header names are stored lower-cased
    headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, body: &Value) -> Self {
        let bytes = body.to_string().into_bytes();
        self.with_header("content-type", "application/json")
            .with_body(bytes)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON. An empty body is `None`.
    pub fn json(&self) -> Result<Option<Value>, serde_json::Error> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&self.body).map(Some)
    }

    /// Poll interval hint from `Retry-After`
    /// Accepts delta-seconds or an HTTP-date
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(self.header("retry-after")?)
    }

    /// Turn a non-2xx response into a [`TransportError::Status`]
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            return Ok(self);
        }

        let body = self.text();
        tracing::error!("API error: {} - {}", self.status, sanitize_for_log(&body));

        Err(TransportError::Status {
            status: self.status,
            retry_after: self.retry_after(),
            body_preview: sanitize_for_log(&body),
        })
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Failure to obtain a usable response
#[derive(Debug, Error)]
pub enum TransportError {
    /// No response at all: connection refused, reset, DNS, TLS, timeout
    #[error("network error: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Non-2xx HTTP status
    #[error("HTTP {status}: {body_preview}")]
    Status {
        status: u16,
        body_preview: String,
        retry_after: Option<Duration>,
    },

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The request never produced a response
    pub fn is_dropped_connection(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Short message suitable for showing to a user
    /// Avoids echoing raw API bodies
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { status: 401, .. } => {
                "Authentication failed. Check the access token.".to_string()
            }
            Self::Status { status: 403, .. } => {
                "Permission denied. Check your role assignments.".to_string()
            }
            Self::Status { status: 404, .. } => "Resource not found.".to_string(),
            Self::Status { status: 409, .. } => {
                "Resource conflict. The resource may already exist or be in use.".to_string()
            }
            Self::Status { status: 429, .. } => {
                "Rate limit exceeded. Please try again later.".to_string()
            }
            Self::Status { status: 400, .. } => {
                "Invalid request. Check your parameters.".to_string()
            }
            Self::Status { status, .. } if *status >= 500 => {
                "Service temporarily unavailable. Please try again.".to_string()
            }
            Self::Status { status, .. } => format!("Request failed with HTTP {}.", status),
            Self::Network(_) => {
                "Request failed. Check your network connection and try again.".to_string()
            }
            Self::InvalidUrl { url, .. } => format!("Invalid URL: {}", url),
        }
    }
}

/// Sends requests on behalf of the runtime
///
/// Implementations own connection pooling and authentication and must be safe
/// to share between unrelated callers. A non-2xx status is a normal
/// [`Response`], not an error: the runtime decides what each status means.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        (**self).send(request).await
    }
}
