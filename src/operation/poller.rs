use super::{FinalState, Operation, OperationStatus, PollStrategy};
use crate::error::{DecodeError, OperationFailedError, Result, RuntimeError};
use crate::paging::lookup;
use crate::transport::{sanitize_for_log, Method, Request, Response, Transport, TransportError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Interval used when the server gives no `Retry-After` hint
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Floor applied to every wait, whatever the server asks for
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Consecutive dropped connections tolerated while polling
pub const DEFAULT_DROPPED_CONNECTIONS_ALLOWED: u32 = 3;

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const LOCATION_HEADER: &str = "location";
const OPERATION_LOCATION_HEADER: &str = "operation-location";

/// Tuning for one [`OperationPoller`]
#[derive(Debug, Clone, PartialEq)]
pub struct PollerOptions {
    pub default_interval: Duration,
    pub min_interval: Duration,
    pub dropped_connections_allowed: u32,
    /// `None` picks [`FinalState::for_method`] from the initiating request
    pub final_state: Option<FinalState>,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_POLL_INTERVAL,
            min_interval: MIN_POLL_INTERVAL,
            dropped_connections_allowed: DEFAULT_DROPPED_CONNECTIONS_ALLOWED,
            final_state: None,
        }
    }
}

impl PollerOptions {
    pub fn with_final_state(mut self, final_state: FinalState) -> Self {
        self.final_state = Some(final_state);
        self
    }
}

/// Drives one long-running operation to a terminal state
///
/// Holds at most one request in flight. Dropping the poller abandons the
/// operation client-side; the server keeps running it.
pub struct OperationPoller<'a> {
    transport: &'a dyn Transport,
    operation: Operation,
    options: PollerOptions,
    final_state: FinalState,
    interval: Duration,
    poll_request: Option<Request>,
    resource_request: Request,
    dropped_connections: u32,
}

impl<'a> OperationPoller<'a> {
    /// Interpret the response to a mutating request
    ///
    /// `request` is the request that produced `response`; its URL is the
    /// resource URL used for provisioning-state polling and the final GET.
    pub fn from_response(
        transport: &'a dyn Transport,
        name: impl Into<String>,
        request: &Request,
        response: Response,
        options: PollerOptions,
    ) -> Result<Self> {
        let name = name.into();
        let resource_url = request
            .full_url()
            .map_err(|e| RuntimeError::transport(format!("starting {}", name), e))?;

        let mut resource_request = Request::from_url(Method::Get, &resource_url);
        resource_request.headers = request.headers.clone();

        let status = response.status;
        let target = match status {
            200 | 201 | 202 => poll_target(&response, &resource_url)?,
            _ => None,
        };
        // a 202 only announces the poll target; its body may not be JSON
        let body = match status {
            200 | 201 => decode_body(&response)?,
            202 => decode_body(&response).ok().flatten(),
            _ => None,
        };

        let (strategy, poll_url, initial) = match (status, target) {
            (204, _) => (PollStrategy::None, None, OperationStatus::Succeeded),
            (200..=202, Some((strategy, url))) => (strategy, Some(url), OperationStatus::Accepted),
            (202, None) => {
                return Err(RuntimeError::Protocol(format!(
                    "{} returned 202 Accepted without a poll target header",
                    name
                )));
            }
            (200 | 201, None) => match body.as_ref().and_then(provisioning_state) {
                Some(state) if !state.is_terminal() => {
                    (PollStrategy::ProvisioningState, Some(resource_url.clone()), state)
                }
                Some(state) => (PollStrategy::None, None, state),
                None => (PollStrategy::None, None, OperationStatus::Succeeded),
            },
            _ => {
                let error = match response.error_for_status() {
                    Err(error) => error,
                    Ok(response) => unexpected_status(&response),
                };
                return Err(RuntimeError::transport(format!("starting {}", name), error));
            }
        };

        let poll_request = poll_url.as_ref().map(|url| {
            let mut poll = Request::from_url(Method::Get, url);
            poll.headers = request.headers.clone();
            poll
        });

        let mut operation = Operation::new(
            name,
            resource_url.to_string(),
            strategy,
            poll_url.map(String::from),
        );
        operation.record_body(body);
        operation.transition(initial);

        let interval = response.retry_after().unwrap_or(options.default_interval);
        let final_state = options
            .final_state
            .unwrap_or_else(|| FinalState::for_method(request.method));

        tracing::info!(
            "operation {} ({}) started: {} via {:?}",
            operation.name(),
            operation.id(),
            operation.status(),
            strategy
        );

        Ok(Self {
            transport,
            operation,
            options,
            final_state,
            interval,
            poll_request,
            resource_request,
            dropped_connections: 0,
        })
    }

    pub fn status(&self) -> OperationStatus {
        self.operation.status()
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Wait before the next poll, after applying the floor
    pub fn interval(&self) -> Duration {
        self.interval.max(self.options.min_interval)
    }

    pub fn is_done(&self) -> bool {
        self.operation.status().is_terminal()
    }

    /// Wait one interval, then poll once
    ///
    /// Returns the status after the step. A terminal operation is returned
    /// as-is without touching the network. A dropped connection leaves the
    /// status unchanged until the allowance is used up.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Result<OperationStatus> {
        if self.is_done() {
            return Ok(self.status());
        }
        let Some(request) = self.poll_request.clone() else {
            return Err(RuntimeError::Protocol(format!(
                "{} is not terminal but has nothing to poll",
                self.operation.name()
            )));
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(RuntimeError::Cancelled { during: "waiting to poll" });
            }
            () = tokio::time::sleep(self.interval()) => {}
        }

        tracing::debug!("polling {} at {}", self.operation.name(), request.url);
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(RuntimeError::Cancelled { during: "polling" });
            }
            sent = self.transport.send(request) => sent,
        };

        let response = match sent {
            Ok(response) => response,
            Err(error)
                if error.is_dropped_connection()
                    && self.dropped_connections < self.options.dropped_connections_allowed =>
            {
                self.dropped_connections += 1;
                tracing::warn!(
                    "dropped connection while polling {} ({}/{}): {}",
                    self.operation.name(),
                    self.dropped_connections,
                    self.options.dropped_connections_allowed,
                    error
                );
                return Ok(self.status());
            }
            Err(error) => {
                return Err(RuntimeError::transport(
                    format!("polling {}", self.operation.name()),
                    error,
                ));
            }
        };
        self.dropped_connections = 0;

        if let Some(hint) = response.retry_after() {
            self.interval = hint;
        }

        let (status, body) = self.read_status(response)?;
        self.operation.record_poll(body);
        let status = self.operation.transition(status);

        tracing::debug!(
            "{} is {} after {} polls",
            self.operation.name(),
            status,
            self.operation.polls()
        );
        Ok(status)
    }

    /// Poll until the operation is terminal and return its final payload
    ///
    /// A failed or canceled operation becomes [`RuntimeError::OperationFailed`].
    pub async fn poll_until_done(&mut self, cancel: &CancellationToken) -> Result<Option<Value>> {
        while !self.is_done() {
            self.poll_once(cancel).await?;
        }

        tracing::info!(
            "operation {} finished {} after {} polls in {}ms",
            self.operation.name(),
            self.status(),
            self.operation.polls(),
            self.operation.elapsed().num_milliseconds()
        );

        match self.status() {
            OperationStatus::Succeeded => self.final_payload(cancel).await,
            status => Err(OperationFailedError::new(
                self.operation.name(),
                status,
                self.operation.error().cloned(),
                self.operation.result().cloned(),
            )
            .into()),
        }
    }

    /// [`poll_until_done`](Self::poll_until_done), decoding the payload into `T`
    pub async fn poll_until_done_as<T: DeserializeOwned>(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        match self.poll_until_done(cancel).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| DecodeError::new(std::any::type_name::<T>(), "$", e).into()),
            None => Ok(None),
        }
    }

    fn read_status(&self, response: Response) -> Result<(OperationStatus, Option<Value>)> {
        let context = || format!("polling {}", self.operation.name());

        match self.operation.strategy() {
            PollStrategy::Location => {
                let status = match response.status {
                    202 => OperationStatus::InProgress,
                    200 | 201 | 204 => OperationStatus::Succeeded,
                    _ => {
                        let error = match response.error_for_status() {
                            Err(error) => error,
                            Ok(response) => unexpected_status(&response),
                        };
                        return Err(RuntimeError::transport(context(), error));
                    }
                };
                Ok((status, decode_body(&response)?))
            }
            PollStrategy::AsyncOperation => {
                let response = response
                    .error_for_status()
                    .map_err(|e| RuntimeError::transport(context(), e))?;
                let body = decode_body(&response)?;
                let status = body
                    .as_ref()
                    .and_then(|body| body.get("status"))
                    .and_then(Value::as_str)
                    .map(OperationStatus::parse)
                    .ok_or_else(|| {
                        RuntimeError::Protocol(format!(
                            "status document for {} has no `status` field",
                            self.operation.name()
                        ))
                    })?;
                Ok((status, body))
            }
            PollStrategy::ProvisioningState | PollStrategy::None => {
                let response = response
                    .error_for_status()
                    .map_err(|e| RuntimeError::transport(context(), e))?;
                let body = decode_body(&response)?;
                // resources without a provisioning state are done once readable
                let status = body
                    .as_ref()
                    .and_then(provisioning_state)
                    .unwrap_or(OperationStatus::Succeeded);
                Ok((status, body))
            }
        }
    }

    async fn final_payload(&self, cancel: &CancellationToken) -> Result<Option<Value>> {
        let resource_is_result = matches!(
            self.operation.strategy(),
            PollStrategy::None | PollStrategy::ProvisioningState
        );

        match self.final_state {
            FinalState::Discard => Ok(None),
            FinalState::PollTarget => Ok(self.operation.result().cloned()),
            FinalState::OriginalUri if resource_is_result => Ok(self.operation.result().cloned()),
            FinalState::OriginalUri => {
                let request = self.resource_request.clone();
                tracing::debug!("fetching result of {} from {}", self.operation.name(), request.url);

                let sent = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        return Err(RuntimeError::Cancelled { during: "fetching the final result" });
                    }
                    sent = self.transport.send(request) => sent,
                };

                let response = sent
                    .and_then(|response| response.error_for_status())
                    .map_err(|e| {
                        RuntimeError::transport(format!("fetching result of {}", self.operation.name()), e)
                    })?;
                decode_body(&response)
            }
        }
    }
}

/// Poll target announced by a response, resolved against the resource URL
fn poll_target(response: &Response, base: &Url) -> Result<Option<(PollStrategy, Url)>> {
    let candidates = [
        (ASYNC_OPERATION_HEADER, PollStrategy::AsyncOperation),
        (LOCATION_HEADER, PollStrategy::Location),
        (OPERATION_LOCATION_HEADER, PollStrategy::AsyncOperation),
    ];

    for (header, strategy) in candidates {
        if let Some(value) = response.header(header) {
            let url = base.join(value.trim()).map_err(|e| {
                RuntimeError::Protocol(format!("malformed {} header '{}': {}", header, value, e))
            })?;
            return Ok(Some((strategy, url)));
        }
    }

    Ok(None)
}

fn provisioning_state(body: &Value) -> Option<OperationStatus> {
    lookup(body, "properties.provisioningState")
        .and_then(Value::as_str)
        .map(OperationStatus::parse)
}

fn decode_body(response: &Response) -> Result<Option<Value>> {
    response
        .json()
        .map_err(|e| DecodeError::new("serde_json::Value", "$", e).into())
}

fn unexpected_status(response: &Response) -> TransportError {
    TransportError::Status {
        status: response.status,
        body_preview: sanitize_for_log(&response.text()),
        retry_after: response.retry_after(),
    }
}
