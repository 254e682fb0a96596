//! In-memory scripted backend
//!
//! Replays prepared attempts per model, with optional delays between
//! events. Drives `--demo` mode and the tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde_json::json;

use super::wire::TokenUsage;
use super::{EventStream, GenerationBackend, GenerationRequest, StreamEvent};
use crate::error::GenerationError;

/// One step of a scripted attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Yield this event
    Event(StreamEvent),
    /// Yield this error and end the attempt
    Fail(GenerationError),
    /// Wait before the next step
    Delay(Duration),
}

/// A complete successful reply: text, usage, then provider metadata.
#[must_use]
pub fn reply(text: &str, cost: f64) -> Vec<ScriptStep> {
    let words = u64::try_from(text.split_whitespace().count()).unwrap_or(u64::MAX);
    vec![
        ScriptStep::Event(StreamEvent::Content {
            text: text.to_string(),
        }),
        ScriptStep::Event(StreamEvent::UsageMetadata {
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: words,
            },
        }),
        ScriptStep::Event(StreamEvent::ProviderMetadata {
            metadata: json!({ "cost": cost }),
        }),
    ]
}

/// The same reply after a delay.
#[must_use]
pub fn delayed_reply(delay: Duration, text: &str, cost: f64) -> Vec<ScriptStep> {
    let mut steps = vec![ScriptStep::Delay(delay)];
    steps.extend(reply(text, cost));
    steps
}

/// An attempt that fails after a delay.
#[must_use]
pub fn delayed_failure(delay: Duration, error: GenerationError) -> Vec<ScriptStep> {
    vec![ScriptStep::Delay(delay), ScriptStep::Fail(error)]
}

#[derive(Debug, Clone)]
struct TrackingAck {
    delay: Duration,
    outcome: Result<(), String>,
}

/// Backend replaying per-model attempt scripts.
///
/// Each request for a model consumes that model's next attempt; the last
/// attempt repeats forever. A model without any script either fails or, in
/// demo mode, gets a reply built from the request.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Vec<ScriptStep>>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    tracking: Option<TrackingAck>,
    demo: bool,
}

impl ScriptedBackend {
    /// Create a backend with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that invents a plausible reply for every request.
    #[must_use]
    pub fn demo() -> Self {
        Self {
            demo: true,
            ..Self::default()
        }
    }

    /// Queue one attempt for `model`.
    #[must_use]
    pub fn with_attempt(self, model: &str, steps: Vec<ScriptStep>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(model.to_string())
            .or_default()
            .push_back(steps);
        self
    }

    /// Report session tracking through a future that settles after `delay`.
    #[must_use]
    pub fn with_tracking_ack(mut self, delay: Duration, outcome: Result<(), String>) -> Self {
        self.tracking = Some(TrackingAck { delay, outcome });
        self
    }

    /// Every request issued so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests issued for `model`.
    #[must_use]
    pub fn requests_for(&self, model: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.model == model)
            .count()
    }

    fn next_attempt(&self, request: &GenerationRequest) -> Vec<ScriptStep> {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        match scripts.get_mut(&request.model) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ if self.demo => demo_reply(request),
            _ => vec![ScriptStep::Fail(GenerationError::Backend(format!(
                "no script for model '{}'",
                request.model
            )))],
        }
    }
}

impl GenerationBackend for ScriptedBackend {
    fn issue_request(&self, request: &GenerationRequest) -> EventStream {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let steps = self.next_attempt(request);

        stream::unfold(steps.into_iter(), |mut steps| async move {
            loop {
                let Some(step) = steps.next() else {
                    return None;
                };
                match step {
                    ScriptStep::Delay(delay) => tokio::time::sleep(delay).await,
                    ScriptStep::Event(event) => return Some((Ok(event), steps)),
                    ScriptStep::Fail(error) => return Some((Err(error), Vec::new().into_iter())),
                }
            }
        })
        .boxed()
    }

    fn tracking_ack(&self, _session_id: &str) -> Option<BoxFuture<'static, anyhow::Result<()>>> {
        let TrackingAck { delay, outcome } = self.tracking.clone()?;
        Some(
            async move {
                tokio::time::sleep(delay).await;
                outcome.map_err(anyhow::Error::msg)
            }
            .boxed(),
        )
    }
}

const DEMO_PREFIXES: [&str; 4] = ["feat", "fix", "refactor", "chore"];

fn demo_reply(request: &GenerationRequest) -> Vec<ScriptStep> {
    let seed: usize = request.model.bytes().map(usize::from).sum();
    let prefix = DEMO_PREFIXES[seed % DEMO_PREFIXES.len()];
    let subject: String = request
        .input_text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("update project")
        .chars()
        .take(60)
        .collect();

    let mut text = format!("{prefix}: {subject}");
    if let Some(hint) = &request.guide_hint {
        text.push_str("\n\n");
        text.push_str(hint);
    }

    // Reveal the text word by word so streaming mode has something to show.
    let step = Duration::from_millis(60 + (seed % 5) as u64 * 20);
    let mut steps = Vec::new();
    let mut shown = String::new();
    for word in text.split_inclusive(' ') {
        shown.push_str(word);
        steps.push(ScriptStep::Delay(step));
        steps.push(ScriptStep::Event(StreamEvent::Content {
            text: shown.clone(),
        }));
    }

    let cost = 0.0002 * (seed % 7 + 1) as f64;
    steps.extend(reply(&text, cost).into_iter().skip(1));
    steps
}
