//! Session driver
//!
//! Owns the selector context for one interactive session. Operator input
//! and generation updates are folded in one at a time; effects returned by
//! transitions are executed right away, before the next render.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::GenerationBackend;
use crate::cli::input::parse_line;
use crate::error::GenerationError;
use crate::generate::{start_batch, GenerationBatch, GenerationSettings, GenerationUpdate};
use crate::log::{SessionRecord, SessionStatus};
use crate::selector::{
    apply_update, project, transition, AbortReason, Effect, Event, Mode, PromptKind,
    SelectorFlowContext, SelectorResult, SelectorView, Transition,
};

/// Something the operator did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorInput {
    /// A raw line, interpreted against the current mode
    Line(String),
    /// An already decoded event
    Event(Event),
}

/// Terminal result of a session plus its history record
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    /// Confirm or abort
    pub result: SelectorResult,
    /// What gets appended to the session log
    pub record: SessionRecord,
}

#[derive(Debug, Default)]
struct SessionStats {
    batches: u32,
    refines: u32,
}

struct Driver {
    backend: Arc<dyn GenerationBackend>,
    settings: GenerationSettings,
    input_text: String,
    root: CancellationToken,
    context: SelectorFlowContext,
    batch: Option<GenerationBatch>,
    stats: SessionStats,
}

impl Driver {
    fn dispatch(&mut self, event: Event) -> Option<SelectorResult> {
        if matches!(event, Event::PromptSubmit { .. })
            && self.context.mode == Mode::Prompt
            && self.context.prompt_kind == Some(PromptKind::Refine)
        {
            self.stats.refines += 1;
        }

        let Transition {
            context,
            effects,
            result,
        } = transition(&self.context, event);
        self.context = context;

        for effect in effects {
            self.execute(effect);
        }
        result
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StartGeneration => {
                if let Some(previous) = self.batch.take() {
                    previous.cancel();
                }
                self.stats.batches += 1;
                let batch = start_batch(
                    &self.backend,
                    &self.settings,
                    &self.input_text,
                    self.context.guide_hint.as_deref(),
                    self.context.generation,
                    self.root.child_token(),
                );
                debug!(session_id = %batch.session_id(), "batch started");
                self.batch = Some(batch);
            }
            Effect::CancelGeneration => {
                if let Some(batch) = &self.batch {
                    batch.cancel();
                }
            }
        }
    }

    fn apply(&mut self, update: &GenerationUpdate) {
        self.context = apply_update(&self.context, update);
    }
}

/// Wait for the running batch; pends forever when there is none.
async fn next_update(
    batch: &mut Option<GenerationBatch>,
) -> Option<Result<GenerationUpdate, GenerationError>> {
    match batch {
        Some(batch) => batch.next().await,
        None => std::future::pending().await,
    }
}

enum Wake {
    Update(Option<Result<GenerationUpdate, GenerationError>>),
    Input(Option<OperatorInput>),
}

/// Run one interactive session to completion.
///
/// Generation starts immediately. `render` is called with a fresh view
/// whenever the context may have changed. The session ends when the
/// operator confirms or quits, when a fatal error stops generation, or
/// when `inputs` is closed (treated as quitting).
pub async fn run_session<R>(
    backend: Arc<dyn GenerationBackend>,
    settings: &GenerationSettings,
    input_text: &str,
    mut inputs: mpsc::Receiver<OperatorInput>,
    mut render: R,
) -> Result<SessionOutcome>
where
    R: FnMut(&SelectorView),
{
    let started = Instant::now();
    let mut driver = Driver {
        backend,
        settings: settings.clone(),
        input_text: input_text.to_string(),
        root: CancellationToken::new(),
        context: SelectorFlowContext::new(settings.models.clone()),
        batch: None,
        stats: SessionStats::default(),
    };
    let mut queue = VecDeque::from([Event::GenerateStart]);

    let result = 'session: loop {
        while let Some(event) = queue.pop_front() {
            if let Some(result) = driver.dispatch(event) {
                break 'session result;
            }
        }
        render(&project(&driver.context));

        let wake = tokio::select! {
            update = next_update(&mut driver.batch) => Wake::Update(update),
            input = inputs.recv() => Wake::Input(input),
        };

        match wake {
            Wake::Update(Some(Ok(update))) => driver.apply(&update),
            Wake::Update(Some(Err(error))) => {
                info!(error = %error, "generation aborted");
                break 'session SelectorResult::Abort(AbortReason::Failed(error));
            }
            Wake::Update(None) => {
                driver.batch = None;
                queue.push_back(Event::GenerateDone);
            }
            Wake::Input(Some(OperatorInput::Event(event))) => queue.push_back(event),
            Wake::Input(Some(OperatorInput::Line(line))) => {
                match parse_line(&driver.context, &line) {
                    Some(event) => queue.push_back(event),
                    None => debug!(line = %line, "ignoring unrecognized input"),
                }
            }
            Wake::Input(None) => break 'session SelectorResult::Abort(AbortReason::Exit),
        }
    };

    driver.root.cancel();
    driver.batch = None;

    let record = build_record(&driver, &result, started);
    info!(status = ?record.status, batches = record.batches, "session finished");
    Ok(SessionOutcome { result, record })
}

fn build_record(driver: &Driver, result: &SelectorResult, started: Instant) -> SessionRecord {
    let context = &driver.context;
    let (status, abort_reason, selected_model, edited, total_cost, quota) = match result {
        SelectorResult::Confirm(confirmation) => (
            SessionStatus::Confirmed,
            None,
            confirmation.selected_candidate.model.clone(),
            confirmation.edited,
            confirmation.total_cost,
            confirmation.quota.clone(),
        ),
        SelectorResult::Abort(reason) => (
            SessionStatus::Aborted,
            Some(match reason {
                AbortReason::Exit => "exit".to_string(),
                AbortReason::Failed(error) => error.to_string(),
            }),
            None,
            false,
            context.total_cost(),
            context.quota.clone(),
        ),
    };

    SessionRecord {
        timestamp: Utc::now(),
        models: driver.settings.models.clone(),
        status,
        abort_reason,
        selected_model,
        edited,
        total_cost,
        quota,
        batches: driver.stats.batches,
        refine_count: driver.stats.refines,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}
