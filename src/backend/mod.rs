//! Generation backends
//!
//! A backend turns one request for one model into a stream of wire events.
//! Transport, authentication and status-code mapping live behind this
//! trait; retrying does not.

pub mod process;
pub mod scripted;
pub mod wire;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::GenerationError;
pub use wire::StreamEvent;

/// Stream of events produced by a single request.
pub type EventStream = BoxStream<'static, Result<StreamEvent, GenerationError>>;

/// Everything a backend needs to generate for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Correlation id shared by every model of one batch
    pub session_id: String,
    /// The change description the message is generated from
    pub input_text: String,
    /// Model id
    pub model: String,
    /// Steering instruction from a refine prompt
    pub guide_hint: Option<String>,
}

/// Source of generation events for one model at a time.
pub trait GenerationBackend: Send + Sync {
    /// Issue a request. The stream is lazy: nothing happens until it is polled.
    fn issue_request(&self, request: &GenerationRequest) -> EventStream;

    /// Future that resolves once the upstream has acknowledged `session_id`.
    ///
    /// Backends that cannot observe tracking return `None`, in which case
    /// the retry loop falls back to backoff sleeps.
    fn tracking_ack(&self, _session_id: &str) -> Option<BoxFuture<'static, anyhow::Result<()>>> {
        None
    }
}
