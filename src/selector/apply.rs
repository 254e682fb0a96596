//! Folding generation updates into the selector context
//!
//! Arrivals are applied one at a time in the driver loop, outside
//! [`super::transition`], so they need no locking.

use tracing::debug;

use super::state::{SelectorFlowContext, Slot};
use crate::generate::{Candidate, GenerationUpdate, SlotFailure};

/// Apply one update and return the new context.
#[must_use]
pub fn apply_update(context: &SelectorFlowContext, update: &GenerationUpdate) -> SelectorFlowContext {
    match update {
        GenerationUpdate::Candidate(candidate) => apply_candidate(context, candidate),
        GenerationUpdate::Failed(failure) => apply_failure(context, failure),
    }
}

/// Place a candidate.
///
/// The target slot is, in order: the slot with the same id, the hinted
/// index if that slot is still Pending, the first Pending slot expecting
/// the same model, the first Pending slot.
#[must_use]
pub fn apply_candidate(context: &SelectorFlowContext, candidate: &Candidate) -> SelectorFlowContext {
    let mut next = context.clone();
    if let Some(quota) = &candidate.quota {
        next.quota = Some(quota.clone());
    }

    let Some(target) = resolve_target(
        &next,
        &candidate.slot_id,
        candidate.slot_index,
        candidate.model.as_deref(),
    ) else {
        debug!(slot_id = %candidate.slot_id, "no slot left for candidate");
        return next;
    };

    let accepts = match &next.slots[target] {
        Slot::Pending { .. } => !candidate.content.trim().is_empty(),
        Slot::Ready { candidate: existing } => existing.slot_id == candidate.slot_id,
        Slot::Error { .. } => false,
    };
    if accepts {
        next.slots[target] = Slot::Ready {
            candidate: candidate.clone(),
        };
    }

    next.normalize_selection();
    next
}

/// Record a soft failure and mark its slot as failed.
///
/// A Pending slot becomes an Error slot. A partial Ready slot of the same
/// model becomes an Error slot that keeps the partial text. The failure is
/// recorded even when no slot changes.
#[must_use]
pub fn apply_failure(context: &SelectorFlowContext, failure: &SlotFailure) -> SelectorFlowContext {
    let mut next = context.clone();
    next.failures.push(failure.clone());

    let target = resolve_target(
        &next,
        &failure.slot_id,
        Some(failure.slot_index),
        Some(&failure.model),
    );
    if let Some(target) = target {
        let content = match &next.slots[target] {
            Slot::Pending { .. } => Some(String::new()),
            Slot::Ready { candidate } if candidate.is_partial && candidate.slot_id == failure.slot_id => {
                Some(candidate.content.clone())
            }
            _ => None,
        };
        if let Some(content) = content {
            next.slots[target] = Slot::Error {
                slot_id: failure.slot_id.clone(),
                model: Some(failure.model.clone()),
                content,
                error: failure.error.to_string(),
            };
        }
    }

    next.normalize_selection();
    next
}

fn resolve_target(
    context: &SelectorFlowContext,
    slot_id: &str,
    slot_index: Option<usize>,
    model: Option<&str>,
) -> Option<usize> {
    let slots = &context.slots;

    if let Some(index) = slots.iter().position(|slot| slot.slot_id() == slot_id) {
        return Some(index);
    }
    if let Some(index) = slot_index.filter(|&i| slots.get(i).is_some_and(Slot::is_pending)) {
        return Some(index);
    }
    if let Some(model) = model {
        if let Some(index) = slots
            .iter()
            .position(|slot| slot.is_pending() && slot.model() == Some(model))
        {
            return Some(index);
        }
    }
    slots.iter().position(Slot::is_pending)
}
