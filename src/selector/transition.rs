//! Pure selector transitions
//!
//! `transition(&context, event)` never fails: events that make no sense in
//! the current state leave the context unchanged.

use super::event::{Direction, Effect, Event};
use super::state::{ListMode, Mode, PromptKind, SelectorFlowContext, Slot};
use crate::error::GenerationError;
use crate::generate::{Candidate, QuotaInfo};

/// Accepted selection
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    /// Final text
    pub selected_text: String,
    /// Whether the text differs from the raw candidate by operator action
    pub edited: bool,
    /// The candidate that was selected
    pub selected_candidate: Candidate,
    /// Cost of every candidate seen this session
    pub total_cost: Option<f64>,
    /// Most recently observed quota
    pub quota: Option<QuotaInfo>,
}

/// Why the session ended without a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The operator quit
    Exit,
    /// A fatal generation error stopped every model
    Failed(GenerationError),
}

/// Terminal outcome of a session
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorResult {
    /// A candidate was accepted
    Confirm(Confirmation),
    /// The session ended without one
    Abort(AbortReason),
}

/// Output of one transition
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The new context
    pub context: SelectorFlowContext,
    /// Effects for the host, in order
    pub effects: Vec<Effect>,
    /// Terminal result, if the session is over
    pub result: Option<SelectorResult>,
}

impl Transition {
    fn unchanged(context: SelectorFlowContext) -> Self {
        Self {
            context,
            effects: Vec::new(),
            result: None,
        }
    }
}

/// Compute the next context for `event`.
#[must_use]
pub fn transition(context: &SelectorFlowContext, event: Event) -> Transition {
    let mut next = context.clone();
    let mut effects = Vec::new();
    let mut result = None;

    match event {
        Event::GenerateStart => {
            close_prompt(&mut next);
            restart(&mut next, &mut effects);
        }
        Event::GenerateDone => collapse(&mut next),
        Event::CancelGeneration => {
            next.is_generating = false;
            effects.push(Effect::CancelGeneration);
        }
        Event::Navigate(direction) if next.mode == Mode::List => {
            if let Some(target) = nearest_ready(&next, direction) {
                next.selected_index = Some(target);
            }
        }
        Event::ChooseIndex(index) if next.mode == Mode::List => {
            if next.slots.get(index).is_some_and(Slot::is_ready) {
                next.selected_index = Some(index);
            }
        }
        Event::OpenPrompt(kind) if next.mode == Mode::List => {
            if next.selected_candidate().is_some() {
                next.mode = Mode::Prompt;
                next.prompt_kind = Some(kind);
                next.prompt_target_index = next.selected_index;
                next.is_generating = false;
                effects.push(Effect::CancelGeneration);
            }
        }
        Event::PromptCancel if next.mode == Mode::Prompt => close_prompt(&mut next),
        Event::PromptSubmit { text } if next.mode == Mode::Prompt => {
            result = submit_prompt(&mut next, &text, &mut effects);
        }
        Event::Confirm { override_text } if next.mode == Mode::List => {
            result = confirm(&next, override_text);
        }
        Event::Quit => match (next.mode, next.list_mode) {
            (Mode::Prompt, _) => close_prompt(&mut next),
            (Mode::List, ListMode::Initial) => result = Some(SelectorResult::Abort(AbortReason::Exit)),
            (Mode::List, ListMode::Refined) => {
                next.guide_hint = None;
                next.list_mode = ListMode::Initial;
                restart(&mut next, &mut effects);
            }
        },
        _ => return Transition::unchanged(next),
    }

    next.normalize_selection();
    Transition {
        context: next,
        effects,
        result,
    }
}

fn restart(context: &mut SelectorFlowContext, effects: &mut Vec<Effect>) {
    context.mode = Mode::List;
    context.reset_slots();
    context.is_generating = true;
    effects.push(Effect::StartGeneration);
}

fn close_prompt(context: &mut SelectorFlowContext) {
    context.mode = Mode::List;
    context.prompt_kind = None;
    context.prompt_target_index = None;
}

/// Drop every slot that never became Ready and select the first one left.
/// An open prompt keeps pointing at the same candidate.
fn collapse(context: &mut SelectorFlowContext) {
    let target_id = slot_id_at(&context.slots, context.prompt_target_index);

    context.slots.retain(Slot::is_ready);
    context.is_generating = false;

    context.selected_index = context.first_ready();
    context.prompt_target_index = position_of(&context.slots, target_id.as_deref());
}

fn slot_id_at(slots: &[Slot], index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| slots.get(i))
        .map(|slot| slot.slot_id().to_string())
}

fn position_of(slots: &[Slot], slot_id: Option<&str>) -> Option<usize> {
    let slot_id = slot_id?;
    slots.iter().position(|slot| slot.slot_id() == slot_id)
}

fn nearest_ready(context: &SelectorFlowContext, direction: Direction) -> Option<usize> {
    let current = context.selected_index?;
    match direction {
        Direction::Up => (0..current).rev().find(|&i| context.slots[i].is_ready()),
        Direction::Down => (current + 1..context.slots.len()).find(|&i| context.slots[i].is_ready()),
    }
}

fn submit_prompt(
    context: &mut SelectorFlowContext,
    text: &str,
    effects: &mut Vec<Effect>,
) -> Option<SelectorResult> {
    let kind = context.prompt_kind;
    let target = context
        .prompt_target_index
        .and_then(|index| context.slots.get(index))
        .and_then(Slot::candidate)
        .cloned();
    close_prompt(context);

    match kind? {
        PromptKind::Refine => {
            let hint = text.trim();
            context.guide_hint = (!hint.is_empty()).then(|| hint.to_string());
            context.list_mode = ListMode::Refined;
            context.edited_selections.clear();
            restart(context, effects);
            None
        }
        PromptKind::Edit => {
            let candidate = target?;
            let replacement = text.trim();
            if replacement.is_empty() {
                return None;
            }
            context
                .edited_selections
                .insert(candidate.slot_id.clone(), replacement.to_string());
            Some(SelectorResult::Confirm(Confirmation {
                selected_text: replacement.to_string(),
                edited: true,
                selected_candidate: candidate,
                total_cost: context.total_cost(),
                quota: context.quota.clone(),
            }))
        }
    }
}

fn confirm(context: &SelectorFlowContext, override_text: Option<String>) -> Option<SelectorResult> {
    let candidate = context.selected_candidate()?;
    let edit = context.edited_selections.get(&candidate.slot_id);

    let (selected_text, edited) = match (override_text, edit) {
        (Some(text), _) => (text, true),
        (None, Some(text)) => (text.clone(), true),
        (None, None) => (candidate.content.clone(), false),
    };

    Some(SelectorResult::Confirm(Confirmation {
        selected_text,
        edited,
        selected_candidate: candidate.clone(),
        total_cost: context.total_cost(),
        quota: context.quota.clone(),
    }))
}
