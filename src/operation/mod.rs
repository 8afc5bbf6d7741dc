//! Long-running operations
//!
//! A mutating request (PUT, PATCH, POST, DELETE) may complete at once or hand
//! back a URL to poll. [`OperationPoller`] works out which from the initiating
//! response and drives the operation to a terminal state.
//!
//! # Lifecycle
//!
//! `Accepted -> InProgress -> {Succeeded, Failed, Canceled}`. Transitions only
//! move forward and a terminal state is never left.
//!
//! # Example
//!
//! ```ignore
//! use armrt::operation::{OperationPoller, PollerOptions};
//! use armrt::transport::{Method, Request, Transport};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn create(transport: &dyn Transport, request: Request) -> armrt::Result<Option<serde_json::Value>> {
//!     let response = transport.send(request.clone()).await.map_err(|e| ...)?;
//!     let poller = OperationPoller::from_response(transport, "create vm", &request, response, PollerOptions::default())?;
//!     poller.poll_until_done(&CancellationToken::new()).await
//! }
//! ```

mod poller;

pub use poller::{
    OperationPoller, PollerOptions, DEFAULT_DROPPED_CONNECTIONS_ALLOWED, DEFAULT_POLL_INTERVAL,
    MIN_POLL_INTERVAL,
};

use crate::transport::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Status of a long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    /// Accepted by the server, not started yet
    Accepted,
    /// Still running
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationStatus {
    /// Map a wire status onto the fixed state set
    ///
    /// Matching ignores case. Any spelling that is not a known terminal state
    /// or `Accepted` (`Running`, `Creating`, `Updating`, ...) means the
    /// operation is still in progress.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            "accepted" => Self::Accepted,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::InProgress => 1,
            Self::Succeeded | Self::Failed | Self::Canceled => 2,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the operation's status is observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStrategy {
    /// Status document with a `status` field (`Azure-AsyncOperation`, `Operation-Location`)
    AsyncOperation,
    /// The poll target answers 202 until done (`Location`)
    Location,
    /// The resource itself, via `properties.provisioningState`
    ProvisioningState,
    /// Nothing to poll; the initiating response was final
    None,
}

/// Where the result of a succeeded operation comes from
///
/// This differs per API operation and cannot be inferred from the responses.
/// Without an explicit choice the poller uses [`FinalState::for_method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalState {
    /// The body of the last poll response
    PollTarget,
    /// One final GET on the original resource URL
    OriginalUri,
    /// No payload (typical for deletes)
    Discard,
}

impl FinalState {
    /// Usual final state for a mutating method
    ///
    /// A deleted resource cannot be read back, and an action POST has no
    /// resource of its own, so only PUT and PATCH read the resource URL.
    pub fn for_method(method: Method) -> Self {
        match method {
            Method::Delete => Self::Discard,
            Method::Post => Self::PollTarget,
            Method::Get | Method::Put | Method::Patch => Self::OriginalUri,
        }
    }
}

/// Error object reported by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<CloudError>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

impl CloudError {
    /// Pull the error object out of a response body
    ///
    /// Accepts both `{"error": {...}}` and a bare error object.
    pub fn from_body(body: &Value) -> Option<Self> {
        let candidate = match body.get("error") {
            Some(error @ Value::Object(_)) => error,
            _ if body.get("code").is_some() => body,
            _ => return None,
        };
        serde_json::from_value(candidate.clone()).ok()
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "{}: {}", code, message),
            (Some(code), None) => f.write_str(code),
            (None, Some(message)) => f.write_str(message),
            (None, None) => f.write_str("unspecified error"),
        }
    }
}

/// A single long-running operation
///
/// Created from the initiating response and mutated only by its poller.
#[derive(Debug, Clone)]
pub struct Operation {
    id: Uuid,
    name: String,
    status: OperationStatus,
    strategy: PollStrategy,
    poll_url: Option<String>,
    resource_url: String,
    polls: u32,
    result: Option<Value>,
    error: Option<CloudError>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Operation {
    pub(crate) fn new(
        name: String,
        resource_url: String,
        strategy: PollStrategy,
        poll_url: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            status: OperationStatus::Accepted,
            strategy,
            poll_url,
            resource_url,
            polls: 0,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn strategy(&self) -> PollStrategy {
        self.strategy
    }

    /// URL polled for status, if any
    pub fn poll_url(&self) -> Option<&str> {
        self.poll_url.as_deref()
    }

    pub fn resource_url(&self) -> &str {
        &self.resource_url
    }

    /// Number of status requests that got a response
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Body of the latest response that carried status
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&CloudError> {
        self.error.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Time from creation to completion, or to now while running
    pub fn elapsed(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }

    /// Move to `next` unless that would go backwards or leave a terminal state
    pub(crate) fn transition(&mut self, next: OperationStatus) -> OperationStatus {
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            return self.status;
        }

        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status
    }

    pub(crate) fn record_poll(&mut self, body: Option<Value>) {
        self.polls += 1;
        self.record_body(body);
    }

    pub(crate) fn record_body(&mut self, body: Option<Value>) {
        self.error = body.as_ref().and_then(CloudError::from_body);
        self.result = body;
    }
}
