//! Per-model generation with bounded retry
//!
//! Wraps one model's request in a retry loop for the transient
//! "session not tracked yet" error. Everything else fails on first
//! occurrence. The result is a stream of candidates for a single slot:
//! optional partials followed by exactly one final candidate, or one error.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::candidate::{Candidate, GenerationAccumulator};
use crate::backend::{EventStream, GenerationBackend, GenerationRequest, StreamEvent};
use crate::error::GenerationError;
use crate::sanitize::{sanitize, SnapshotSanitizer};

/// How often and how patiently to retry transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Linear backoff unit
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(400),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt that follows attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

enum Recovery {
    Retry,
    Fail(GenerationError),
    Stop,
}

enum Step {
    Cancelled,
    Event(Option<Result<StreamEvent, GenerationError>>),
}

/// One model's generation, pulled one candidate at a time.
pub struct ModelGeneration {
    backend: Arc<dyn GenerationBackend>,
    request: GenerationRequest,
    slot_id: String,
    slot_index: Option<usize>,
    allowed_models: Vec<String>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    tracking: Option<BoxFuture<'static, anyhow::Result<()>>>,
    tracking_used: bool,
    streaming: bool,
    attempts: u32,
    events: Option<EventStream>,
    accumulator: GenerationAccumulator,
    snapshots: SnapshotSanitizer,
    started: Option<Instant>,
    finished: bool,
}

impl ModelGeneration {
    /// Prepare a generation. Nothing is requested until the first `next`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        request: GenerationRequest,
        slot_id: String,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            request,
            slot_id,
            slot_index: None,
            allowed_models: Vec::new(),
            policy,
            cancel,
            tracking: None,
            tracking_used: false,
            streaming: false,
            attempts: 0,
            events: None,
            accumulator: GenerationAccumulator::new(),
            snapshots: SnapshotSanitizer::new(),
            started: None,
            finished: false,
        }
    }

    /// Tag every candidate with the position it is meant for.
    #[must_use]
    pub const fn with_slot_index(mut self, slot_index: usize) -> Self {
        self.slot_index = Some(slot_index);
        self
    }

    /// Models to name when the backend reports an unsupported model.
    #[must_use]
    pub fn with_allowed_models(mut self, allowed_models: Vec<String>) -> Self {
        self.allowed_models = allowed_models;
        self
    }

    /// Wait on `ack` instead of sleeping after the first transient failure.
    #[must_use]
    pub fn with_tracking(mut self, ack: BoxFuture<'static, anyhow::Result<()>>) -> Self {
        self.tracking = Some(ack);
        self
    }

    /// Emit partial candidates while text streams in.
    #[must_use]
    pub const fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Requests issued so far
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Next candidate, or `None` once the final one was produced, an error
    /// was returned, or the token was cancelled.
    pub async fn next(&mut self) -> Option<Result<Candidate, GenerationError>> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.finish();
                return None;
            }

            if self.events.is_none() {
                self.start_attempt();
            }
            let step = {
                let events = self.events.as_mut()?;
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Step::Cancelled,
                    event = events.next() => Step::Event(event),
                }
            };

            let failure = match step {
                Step::Cancelled => {
                    self.finish();
                    return None;
                }
                Step::Event(None) => {
                    self.finish();
                    return Some(self.complete());
                }
                Step::Event(Some(Ok(StreamEvent::Error { message, code }))) => {
                    GenerationError::from_wire(
                        &message,
                        code.as_deref(),
                        &self.request,
                        &self.allowed_models,
                    )
                }
                Step::Event(Some(Ok(event))) => match self.accumulator.process(&event) {
                    Ok(true) => {
                        if let Some(partial) = self.partial() {
                            return Some(Ok(partial));
                        }
                        continue;
                    }
                    Ok(false) => continue,
                    Err(err) => {
                        debug!(model = %self.request.model, error = %err, "wire ordering violated");
                        self.finish();
                        return Some(Err(err));
                    }
                },
                Step::Event(Some(Err(err))) => err,
            };

            match self.recover(failure).await {
                Recovery::Retry => {
                    self.events = None;
                    self.accumulator = GenerationAccumulator::new();
                    self.snapshots = SnapshotSanitizer::new();
                }
                Recovery::Fail(err) => {
                    self.finish();
                    return Some(Err(err));
                }
                Recovery::Stop => {
                    self.finish();
                    return None;
                }
            }
        }
    }

    /// Turn the generation into a boxed stream of candidates.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<Candidate, GenerationError>> {
        stream::unfold(self, |mut generation| async move {
            generation.next().await.map(|item| (item, generation))
        })
        .boxed()
    }

    fn start_attempt(&mut self) {
        self.attempts += 1;
        self.started = Some(Instant::now());
        debug!(
            model = %self.request.model,
            attempt = self.attempts,
            session_id = %self.request.session_id,
            "issuing generation request"
        );
        self.events = Some(self.backend.issue_request(&self.request));
    }

    fn finish(&mut self) {
        self.finished = true;
        self.events = None;
        self.tracking = None;
    }

    async fn recover(&mut self, error: GenerationError) -> Recovery {
        if !error.is_transient() {
            return Recovery::Fail(error);
        }
        if self.tracking_used || self.attempts >= self.policy.max_attempts {
            warn!(
                model = %self.request.model,
                attempts = self.attempts,
                "session still not tracked, giving up"
            );
            return Recovery::Fail(error);
        }

        if let Some(ack) = self.tracking.take() {
            self.tracking_used = true;
            debug!(model = %self.request.model, "waiting for session tracking");
            return tokio::select! {
                biased;
                () = self.cancel.cancelled() => Recovery::Stop,
                acked = ack => match acked {
                    Ok(()) => Recovery::Retry,
                    Err(err) => {
                        warn!(model = %self.request.model, error = %err, "session tracking failed");
                        Recovery::Fail(GenerationError::Cancelled)
                    }
                },
            };
        }

        let delay = self.policy.delay_for(self.attempts);
        debug!(
            model = %self.request.model,
            attempt = self.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "session not tracked, backing off"
        );
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Recovery::Stop,
            () = tokio::time::sleep(delay) => Recovery::Retry,
        }
    }

    fn partial(&mut self) -> Option<Candidate> {
        if !self.streaming {
            return None;
        }
        let content = self.snapshots.update(self.accumulator.text());
        if content.trim().is_empty() {
            return None;
        }
        Some(Candidate {
            content,
            slot_id: self.slot_id.clone(),
            model: Some(self.request.model.clone()),
            is_partial: true,
            slot_index: self.slot_index,
            ..Candidate::default()
        })
    }

    fn complete(&self) -> Result<Candidate, GenerationError> {
        let content = sanitize(self.accumulator.text()).trim().to_string();
        if content.is_empty() {
            return Err(GenerationError::EmptyResponse {
                model: self.request.model.clone(),
            });
        }

        let details = self.accumulator.details();
        let duration_ms = self
            .started
            .map(|started| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        Ok(Candidate {
            content,
            slot_id: self.slot_id.clone(),
            model: Some(self.request.model.clone()),
            cost: details.cost,
            generation_duration_ms: duration_ms,
            generation_id: details.generation_id.clone(),
            quota: details.quota.clone(),
            usage: self.accumulator.usage(),
            is_partial: false,
            slot_index: self.slot_index,
        })
    }
}
