//! Domain model (IDs, statuses, headers, records, failures).

pub mod failure;
pub mod headers;
pub mod ids;
pub mod message;
pub mod route;
pub mod status;

pub use failure::{FailureReason, FailureType};
pub use headers::{HeaderError, HeaderKey, Headers};
pub use ids::{CorrelationId, QueueId};
pub use message::{ErrorRecord, MessageToReset, NewMessage, Priority, QueueMessageRecord, Route};
pub use route::RouteFilter;
pub use status::{Destination, InvalidTransition, MessageStatus, Transition};
