//! armrt - client runtime for resource-manager REST APIs
//!
//! The plumbing every generated resource client leans on:
//!
//! - [`codec`] - discriminated unions and open string enums
//! - [`paging`] - `nextLink`-style paged lists with client-side filtering
//! - [`operation`] - long-running operation polling
//! - [`transport`] - the seam to the network, with a `reqwest` implementation
//!
//! All three are stateless between calls: iterators and pollers are owned by
//! the caller, and the transport is the only shared resource.

pub mod codec;
pub mod config;
pub mod error;
pub mod operation;
pub mod paging;
pub mod transport;

pub use codec::{RawVariant, Union};
pub use error::{DecodeError, OperationFailedError, Result, RuntimeError};
pub use operation::{
    CloudError, FinalState, Operation, OperationPoller, OperationStatus, PollStrategy,
    PollerOptions,
};
pub use paging::{FieldPredicate, ListIterator, Page, Predicate};
pub use transport::{HttpTransport, Method, Request, Response, Transport, TransportError};

/// Re-exports used by the exported macros
#[doc(hidden)]
pub mod __private {
    pub use serde;
    pub use serde_json;
}
