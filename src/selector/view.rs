//! Read-only projection of the selector context for rendering

use super::state::{ListMode, Mode, PromptKind, SelectorFlowContext, Slot};
use crate::generate::QuotaInfo;

/// Lifecycle of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Waiting for its model
    Pending,
    /// Has text
    Ready,
    /// Its model failed
    Error,
}

/// One rendered slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRow {
    /// Position in the list
    pub index: usize,
    /// Lifecycle state
    pub status: SlotStatus,
    /// Model name, or a positional label
    pub model_label: String,
    /// Text to show; an operator edit wins over the raw content
    pub text: String,
    /// Failure description for Error rows
    pub error: Option<String>,
    /// Whether the row is selected
    pub selected: bool,
    /// Whether the operator edited this candidate
    pub edited: bool,
    /// Whether more text is still streaming in
    pub is_partial: bool,
    /// Reported cost
    pub cost: Option<f64>,
    /// Generation time
    pub duration_ms: Option<u64>,
}

/// The open prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptView {
    /// Edit or refine
    pub kind: PromptKind,
    /// Row the prompt applies to
    pub target_index: Option<usize>,
    /// Current text of the target row
    pub target_text: String,
}

/// Everything a renderer needs, derived from the context.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorView {
    /// One row per slot
    pub rows: Vec<SlotRow>,
    /// Interaction mode
    pub mode: Mode,
    /// The open prompt, in prompt mode
    pub prompt: Option<PromptView>,
    /// Original or refined batch
    pub list_mode: ListMode,
    /// Whether a batch is running
    pub is_generating: bool,
    /// Rows with text
    pub ready_count: usize,
    /// Slots requested per batch
    pub total_slots: usize,
    /// Active guide hint
    pub guide_hint: Option<String>,
    /// One line per soft failure, `model: error`
    pub failures: Vec<String>,
    /// Most recently observed quota
    pub quota: Option<QuotaInfo>,
}

/// Project `context` into a view. Never mutates it.
#[must_use]
pub fn project(context: &SelectorFlowContext) -> SelectorView {
    let rows: Vec<SlotRow> = context
        .slots
        .iter()
        .enumerate()
        .map(|(index, slot)| project_slot(context, index, slot))
        .collect();

    let prompt = match (context.mode, context.prompt_kind) {
        (Mode::Prompt, Some(kind)) => Some(PromptView {
            kind,
            target_index: context.prompt_target_index,
            target_text: context
                .prompt_target_index
                .and_then(|index| rows.get(index))
                .map(|row| row.text.clone())
                .unwrap_or_default(),
        }),
        _ => None,
    };

    SelectorView {
        ready_count: context.ready_count(),
        rows,
        mode: context.mode,
        prompt,
        list_mode: context.list_mode,
        is_generating: context.is_generating,
        total_slots: context.total_slots,
        guide_hint: context.guide_hint.clone(),
        failures: context
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.model, failure.error))
            .collect(),
        quota: context.quota.clone(),
    }
}

fn project_slot(context: &SelectorFlowContext, index: usize, slot: &Slot) -> SlotRow {
    let model_label = slot
        .model()
        .map_or_else(|| format!("slot {}", index + 1), ToString::to_string);
    let selected = context.selected_index == Some(index);

    match slot {
        Slot::Pending { .. } => SlotRow {
            index,
            status: SlotStatus::Pending,
            model_label,
            text: String::new(),
            error: None,
            selected,
            edited: false,
            is_partial: false,
            cost: None,
            duration_ms: None,
        },
        Slot::Ready { candidate } => SlotRow {
            index,
            status: SlotStatus::Ready,
            model_label,
            text: context.display_text(candidate).to_string(),
            error: None,
            selected,
            edited: context.edited_selections.contains_key(&candidate.slot_id),
            is_partial: candidate.is_partial,
            cost: candidate.cost,
            duration_ms: candidate.generation_duration_ms,
        },
        Slot::Error { content, error, .. } => SlotRow {
            index,
            status: SlotStatus::Error,
            model_label,
            text: content.clone(),
            error: Some(error.clone()),
            selected,
            edited: false,
            is_partial: false,
            cost: None,
            duration_ms: None,
        },
    }
}
