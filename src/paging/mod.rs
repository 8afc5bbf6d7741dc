//! Paged list results
//!
//! List operations return `{ "value": [...], "nextLink": "<url>" }`. The
//! `nextLink` cursor is opaque: it is replayed exactly as the server issued
//! it, with only its query string moved into the request's structured
//! parameter list.
//!
//! # Architecture
//!
//! - [`ListIterator`] - fetches pages through a [`Transport`]
//! - [`Page`] - one page of items plus the optional cursor
//! - [`predicate`] - client-side item filters
//!
//! # Example
//!
//! ```ignore
//! use armrt::paging::{FieldPredicate, ListIterator};
//! use armrt::transport::Request;
//!
//! async fn running_vms(transport: &dyn armrt::transport::Transport) -> armrt::Result<Vec<serde_json::Value>> {
//!     let request = Request::get("https://management.azure.com/subscriptions/s/providers/Microsoft.Compute/virtualMachines")
//!         .with_query("api-version", "2024-07-01");
//!     ListIterator::new(transport, request)
//!         .complete(FieldPredicate::new().field("location", "westeurope"))
//!         .await
//! }
//! ```

pub mod predicate;

pub use predicate::{field_matches, lookup, AcceptAll, FieldPredicate, Predicate};

use crate::error::{DecodeError, Result, RuntimeError};
use crate::transport::{Method, Request, Transport, TransportError};
use futures::stream::{self, Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default field holding a page's items
pub const DEFAULT_ITEM_FIELD: &str = "value";
/// Default field holding the next-page cursor
pub const DEFAULT_CURSOR_FIELD: &str = "nextLink";

/// One page of a list result
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_link: Option<String>,
}

impl<T> Page<T> {
    /// True iff the server returned a non-empty cursor
    pub fn has_more(&self) -> bool {
        self.cursor().is_some()
    }

    pub fn cursor(&self) -> Option<&str> {
        self.next_link.as_deref().filter(|link| !link.is_empty())
    }
}

/// Walks a paged list result
///
/// Owned by a single caller; it holds no state between calls beyond the
/// initial request, so fetching a page never mutates the iterator.
pub struct ListIterator<'a, T> {
    transport: &'a dyn Transport,
    request: Request,
    item_field: String,
    cursor_field: String,
    cancel: CancellationToken,
    _item: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> ListIterator<'a, T> {
    pub fn new(transport: &'a dyn Transport, request: Request) -> Self {
        Self {
            transport,
            request,
            item_field: DEFAULT_ITEM_FIELD.to_string(),
            cursor_field: DEFAULT_CURSOR_FIELD.to_string(),
            cancel: CancellationToken::new(),
            _item: PhantomData,
        }
    }

    /// Read items from another envelope field
    pub fn with_item_field(mut self, field: impl Into<String>) -> Self {
        self.item_field = field.into();
        self
    }

    /// Read the cursor from another envelope field
    pub fn with_cursor_field(mut self, field: impl Into<String>) -> Self {
        self.cursor_field = field.into();
        self
    }

    /// Abort in-flight page fetches when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Fetch the first page with the initial request
    pub async fn fetch_first(&self) -> Result<Page<T>> {
        self.fetch(self.request.clone()).await
    }

    /// Fetch the page a cursor points at
    pub async fn fetch_next(&self, cursor: &str) -> Result<Page<T>> {
        let request = self.next_request(cursor)?;
        self.fetch(request).await
    }

    /// Fetch every page and keep the items `predicate` accepts, in server order
    ///
    /// All-or-nothing: if any page fails, items from earlier pages are dropped
    /// and the error is returned. There is no page limit; the server decides
    /// when the list ends.
    pub async fn complete<P: Predicate<T>>(&self, predicate: P) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut page = self.fetch_first().await?;
        let mut pages = 1usize;

        loop {
            all_items.extend(page.items.into_iter().filter(|item| predicate.matches(item)));

            let Some(cursor) = page.next_link.filter(|link| !link.is_empty()) else {
                break;
            };
            page = self.fetch_next(&cursor).await?;
            pages += 1;
        }

        tracing::debug!(
            "listed {} items across {} pages from {}",
            all_items.len(),
            pages,
            self.request.url
        );

        Ok(all_items)
    }

    /// Lazily stream the items `predicate` accepts
    ///
    /// Pages are fetched on demand, one at a time. The stream ends after the
    /// first error. It is not `Unpin`; pin it before calling `next()`.
    pub fn into_stream<P>(self, predicate: P) -> impl Stream<Item = Result<T>> + 'a
    where
        T: 'a,
        P: Predicate<T> + 'a,
    {
        enum Cursor {
            First,
            Next(String),
            Done,
        }

        stream::try_unfold((self, Cursor::First), |(iter, cursor)| async move {
            let page = match &cursor {
                Cursor::First => iter.fetch_first().await?,
                Cursor::Next(link) => iter.fetch_next(link).await?,
                Cursor::Done => return Ok::<_, RuntimeError>(None),
            };
            let next = match page.cursor() {
                Some(link) => Cursor::Next(link.to_string()),
                None => Cursor::Done,
            };
            Ok(Some((page.items, (iter, next))))
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<T, RuntimeError>)))
        .try_flatten()
        .try_filter(move |item| futures::future::ready(predicate.matches(item)))
    }

    /// Rebuild a request from a server-issued cursor
    fn next_request(&self, cursor: &str) -> Result<Request> {
        let url = match Url::parse(cursor) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&self.request.url)
                .and_then(|base| base.join(cursor))
                .map_err(|e| invalid_cursor(cursor, e))?,
            Err(e) => return Err(invalid_cursor(cursor, e)),
        };

        let mut request = Request::from_url(Method::Get, &url);
        request.headers = self.request.headers.clone();
        Ok(request)
    }

    async fn fetch(&self, request: Request) -> Result<Page<T>> {
        tracing::debug!("fetching page {}", request.url);
        let context = format!("listing {}", request.url);

        let sent = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                return Err(RuntimeError::Cancelled { during: "fetching a page" });
            }
            sent = self.transport.send(request) => sent,
        };

        let response = sent
            .and_then(|response| response.error_for_status())
            .map_err(|e| RuntimeError::transport(context, e))?;

        decode_page(&response.body, &self.item_field, &self.cursor_field)
    }
}

fn invalid_cursor(cursor: &str, error: url::ParseError) -> RuntimeError {
    RuntimeError::transport(
        "following next page link",
        TransportError::InvalidUrl {
            url: cursor.to_string(),
            reason: error.to_string(),
        },
    )
}

/// Decode one list envelope
///
/// A missing or `null` item field is an empty page; a missing, `null` or
/// empty cursor marks the last page.
pub fn decode_page<T: DeserializeOwned>(
    body: &[u8],
    item_field: &str,
    cursor_field: &str,
) -> Result<Page<T>> {
    let type_name = std::any::type_name::<T>();

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Page {
            items: Vec::new(),
            next_link: None,
        });
    }

    let envelope: Value =
        serde_json::from_slice(body).map_err(|e| DecodeError::new(type_name, "$", e))?;
    let Value::Object(mut envelope) = envelope else {
        return Err(DecodeError::custom(type_name, "$", "list envelope is not an object").into());
    };

    let items = match envelope.remove(item_field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value(item).map_err(|e| {
                    DecodeError::new(type_name, format!("$.{}[{}]", item_field, index), e)
                })
            })
            .collect::<std::result::Result<Vec<T>, _>>()?,
        Some(_) => {
            return Err(DecodeError::custom(
                type_name,
                format!("$.{}", item_field),
                "expected an array of items",
            )
            .into())
        }
    };

    let next_link = match envelope.remove(cursor_field) {
        None | Some(Value::Null) => None,
        Some(Value::String(link)) if link.is_empty() => None,
        Some(Value::String(link)) => Some(link),
        Some(_) => {
            return Err(DecodeError::custom(
                type_name,
                format!("$.{}", cursor_field),
                "expected a string cursor",
            )
            .into())
        }
    };

    Ok(Page { items, next_link })
}
