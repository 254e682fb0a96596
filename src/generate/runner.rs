//! Multi-model generation runner
//!
//! Builds one retry loop per configured model and races them through the
//! multiplexer. Soft per-model failures come out as updates so the caller
//! can show them; fatal ones abort the whole batch.

use std::sync::Arc;

use futures::future;
use futures::stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::candidate::Candidate;
use super::retry::{ModelGeneration, RetryPolicy};
use crate::backend::{GenerationBackend, GenerationRequest};
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::race::{ErrorPolicy, RaceMultiplexer, RaceSource};

/// Settings shared by every batch of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSettings {
    /// One slot per entry
    pub models: Vec<String>,
    /// Retry behavior per model
    pub policy: RetryPolicy,
    /// Whether partial candidates are emitted
    pub streaming: bool,
    /// Models the backend accepts; named in unsupported-model errors
    pub allowed_models: Vec<String>,
}

impl GenerationSettings {
    /// Build settings from the `[generation]` config section
    #[must_use]
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            models: config.models.clone(),
            policy: RetryPolicy {
                max_attempts: config.max_attempts,
                backoff: std::time::Duration::from_millis(config.backoff_ms),
            },
            streaming: config.streaming,
            allowed_models: Vec::new(),
        }
    }

    /// Name the models the backend accepts.
    #[must_use]
    pub fn with_allowed_models(mut self, allowed_models: Vec<String>) -> Self {
        self.allowed_models = allowed_models;
        self
    }
}

/// A model that failed without taking the others down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFailure {
    /// Slot the model was generating for
    pub slot_id: String,
    /// Position of that slot
    pub slot_index: usize,
    /// The failing model
    pub model: String,
    /// What went wrong
    pub error: GenerationError,
}

/// Something the selector should fold into its context.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationUpdate {
    /// A partial or final candidate
    Candidate(Candidate),
    /// A soft failure of one model
    Failed(SlotFailure),
}

/// Stable id of the slot for `model` at `index` in batch `generation`.
#[must_use]
pub fn slot_id(generation: u64, index: usize, model: &str) -> String {
    format!("{generation}:{index}:{model}")
}

/// Fatal errors stop every model; anything else only drops its own source.
fn run_policy(source_index: usize, error: &GenerationError) -> ErrorPolicy {
    if error.aborts_run() {
        warn!(source_index, error = %error, "fatal generation error, stopping all models");
        ErrorPolicy::Throw
    } else {
        ErrorPolicy::Continue
    }
}

type PolicyFn = fn(usize, &GenerationError) -> ErrorPolicy;

/// One running batch: every configured model raced against the others.
pub struct GenerationBatch {
    session_id: String,
    cancel: CancellationToken,
    race: RaceMultiplexer<GenerationUpdate, GenerationError, PolicyFn>,
}

impl GenerationBatch {
    /// Correlation id shared by every request of this batch
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stop every model. Later `next` calls return `None`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the batch token was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next update from whichever model is ready first.
    ///
    /// `Some(Err(_))` is a fatal error; the batch is over after it.
    /// Cancel-safe.
    pub async fn next(&mut self) -> Option<Result<GenerationUpdate, GenerationError>> {
        self.race
            .next()
            .await
            .map(|raced| raced.map(|raced| raced.item))
    }
}

/// Start generating `input_text` with every configured model.
///
/// `generation` is the selector's batch counter; it namespaces slot ids so
/// candidates from an earlier batch never match a newer slot.
pub fn start_batch(
    backend: &Arc<dyn GenerationBackend>,
    settings: &GenerationSettings,
    input_text: &str,
    guide_hint: Option<&str>,
    generation: u64,
    cancel: CancellationToken,
) -> GenerationBatch {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(
        session_id = %session_id,
        models = settings.models.len(),
        guided = guide_hint.is_some(),
        "starting generation batch"
    );

    let sources = settings
        .models
        .iter()
        .enumerate()
        .map(|(index, model)| {
            let request = GenerationRequest {
                session_id: session_id.clone(),
                input_text: input_text.to_string(),
                model: model.clone(),
                guide_hint: guide_hint.map(ToString::to_string),
            };
            let token = cancel.child_token();
            let slot = slot_id(generation, index, model);

            let mut model_generation = ModelGeneration::new(
                Arc::clone(backend),
                request,
                slot.clone(),
                settings.policy,
                token.clone(),
            )
            .with_slot_index(index)
            .with_allowed_models(settings.allowed_models.clone())
            .streaming(settings.streaming);
            if let Some(ack) = backend.tracking_ack(&session_id) {
                model_generation = model_generation.with_tracking(ack);
            }

            let model = model.clone();
            let updates = model_generation.into_stream().filter_map(move |result| {
                future::ready(route(result, &slot, index, &model))
            });

            RaceSource::new(updates.boxed()).with_cancel_hook(move || {
                token.cancel();
                Ok(())
            })
        })
        .collect();

    let race = RaceMultiplexer::new(sources, cancel.clone(), run_policy as PolicyFn);
    GenerationBatch {
        session_id,
        cancel,
        race,
    }
}

fn route(
    result: Result<Candidate, GenerationError>,
    slot_id: &str,
    slot_index: usize,
    model: &str,
) -> Option<Result<GenerationUpdate, GenerationError>> {
    match result {
        Ok(candidate) => Some(Ok(GenerationUpdate::Candidate(candidate))),
        Err(error) if error.is_cancellation() => {
            debug!(model, "generation cancelled");
            None
        }
        Err(error) if error.aborts_run() => Some(Err(error)),
        Err(error) => {
            warn!(model, error = %error, "model failed");
            Some(Ok(GenerationUpdate::Failed(SlotFailure {
                slot_id: slot_id.to_string(),
                slot_index,
                model: model.to_string(),
                error,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::{delayed_failure, delayed_reply, ScriptStep, ScriptedBackend};
    use std::time::Duration;
    use tokio::time::Instant;

    fn settings(models: &[&str]) -> GenerationSettings {
        GenerationSettings {
            models: models.iter().map(ToString::to_string).collect(),
            policy: RetryPolicy::default(),
            streaming: false,
            allowed_models: Vec::new(),
        }
    }

    fn start(backend: &Arc<ScriptedBackend>, models: &[&str], hint: Option<&str>) -> GenerationBatch {
        let backend: Arc<dyn GenerationBackend> = backend.clone();
        start_batch(
            &backend,
            &settings(models),
            "diff",
            hint,
            1,
            CancellationToken::new(),
        )
    }

    async fn drain(batch: &mut GenerationBatch) -> Vec<Result<GenerationUpdate, GenerationError>> {
        let mut updates = Vec::new();
        while let Some(update) = batch.next().await {
            updates.push(update);
        }
        updates
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_failure_becomes_update_and_others_continue() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_attempt(
                    "model-a",
                    delayed_reply(Duration::from_millis(50), "feat: a", 0.01),
                )
                .with_attempt(
                    "model-b",
                    delayed_failure(
                        Duration::from_millis(10),
                        GenerationError::Backend("rate limited".to_string()),
                    ),
                ),
        );
        let mut batch = start(&backend, &["model-a", "model-b"], None);

        let updates = drain(&mut batch).await;
        assert_eq!(updates.len(), 2, "Expected two updates, got: {updates:?}");
        match &updates[0] {
            Ok(GenerationUpdate::Failed(failure)) => {
                assert_eq!(failure.model, "model-b");
                assert_eq!(failure.slot_index, 1);
                assert_eq!(failure.slot_id, "1:1:model-b");
            }
            other => panic!("Expected failure first, got {other:?}"),
        }
        match &updates[1] {
            Ok(GenerationUpdate::Candidate(candidate)) => {
                assert_eq!(candidate.content, "feat: a");
                assert_eq!(candidate.slot_id, "1:0:model-a");
                assert_eq!(candidate.slot_index, Some(0));
            }
            other => panic!("Expected candidate, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_aborts_the_batch() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_attempt(
                    "model-a",
                    delayed_reply(Duration::from_secs(10), "feat: slow", 0.0),
                )
                .with_attempt(
                    "model-b",
                    vec![ScriptStep::Fail(GenerationError::BalanceExhausted)],
                ),
        );
        let mut batch = start(&backend, &["model-a", "model-b"], None);

        let started = Instant::now();
        assert_eq!(
            batch.next().await,
            Some(Err(GenerationError::BalanceExhausted))
        );
        assert!(batch.next().await.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_all_models() {
        let backend = Arc::new(ScriptedBackend::new().with_attempt(
            "model-a",
            delayed_reply(Duration::from_secs(10), "feat: slow", 0.0),
        ));
        let mut batch = start(&backend, &["model-a", "model-a"], None);

        batch.cancel();
        assert!(batch.is_cancelled());
        assert!(batch.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_share_session_and_carry_hint() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_attempt("model-a", delayed_reply(Duration::ZERO, "a", 0.0))
                .with_attempt("model-b", delayed_reply(Duration::ZERO, "b", 0.0)),
        );
        let mut batch = start(&backend, &["model-a", "model-b"], Some("shorter"));
        let session_id = batch.session_id().to_string();
        drain(&mut batch).await;

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert_eq!(request.session_id, session_id);
            assert_eq!(request.guide_hint.as_deref(), Some("shorter"));
            assert_eq!(request.input_text, "diff");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_generation_is_dropped_silently() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_attempt(
                    "model-a",
                    vec![ScriptStep::Fail(GenerationError::SessionNotTracked {
                        session_id: "s".to_string(),
                    })],
                )
                .with_tracking_ack(Duration::from_millis(1), Err("gone".to_string())),
        );
        let mut batch = start(&backend, &["model-a"], None);
        assert!(drain(&mut batch).await.is_empty());
    }

    #[test]
    fn test_slot_id_format() {
        assert_eq!(slot_id(3, 0, "model-a"), "3:0:model-a");
    }

    #[test]
    fn test_settings_from_config() {
        let config = GenerationConfig {
            models: vec!["m".to_string()],
            streaming: true,
            max_attempts: 2,
            backoff_ms: 50,
        };
        let settings = GenerationSettings::from_config(&config)
            .with_allowed_models(vec!["m".to_string()]);
        assert_eq!(settings.allowed_models, vec!["m"]);
        assert_eq!(settings.policy.max_attempts, 2);
        assert_eq!(settings.policy.backoff, std::time::Duration::from_millis(50));
        assert!(settings.streaming);
    }
}
