//! Selector context and slots

use std::collections::BTreeMap;

use crate::generate::{Candidate, QuotaInfo, SlotFailure};

/// Top-level interaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Browsing candidates
    List,
    /// Typing replacement or guide text
    Prompt,
}

/// Whether the list shows the original batch or a refined one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// Generated from the input alone
    Initial,
    /// Generated with a guide hint
    Refined,
}

/// What a prompt's text is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Replace the selected candidate's text and confirm
    Edit,
    /// Regenerate every slot with a guide hint
    Refine,
}

/// One fixed position in the candidate list.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Nothing arrived yet
    Pending {
        /// Placeholder id, replaced by the candidate's id once Ready
        slot_id: String,
        /// Model expected to fill this slot
        model: Option<String>,
    },
    /// A candidate (partial or final) is available
    Ready {
        /// The latest candidate for this slot
        candidate: Candidate,
    },
    /// The model for this slot failed
    Error {
        /// Id of the failed slot
        slot_id: String,
        /// The failing model
        model: Option<String>,
        /// Partial text received before the failure, if any
        content: String,
        /// Failure description
        error: String,
    },
}

impl Slot {
    /// Stable id of this slot
    #[must_use]
    pub fn slot_id(&self) -> &str {
        match self {
            Self::Pending { slot_id, .. } | Self::Error { slot_id, .. } => slot_id,
            Self::Ready { candidate } => &candidate.slot_id,
        }
    }

    /// Model that produced or is expected to produce this slot
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Pending { model, .. } | Self::Error { model, .. } => model.as_deref(),
            Self::Ready { candidate } => candidate.model.as_deref(),
        }
    }

    /// The candidate, if Ready
    #[must_use]
    pub const fn candidate(&self) -> Option<&Candidate> {
        match self {
            Self::Ready { candidate } => Some(candidate),
            _ => None,
        }
    }

    /// Whether this slot holds a candidate
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Whether this slot is still waiting
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

/// Everything the selector knows. Replaced wholesale by every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorFlowContext {
    /// Current interaction mode
    pub mode: Mode,
    /// Original or refined batch
    pub list_mode: ListMode,
    /// Kind of the open prompt
    pub prompt_kind: Option<PromptKind>,
    /// Slot the open prompt applies to
    pub prompt_target_index: Option<usize>,
    /// Slots in display order
    pub slots: Vec<Slot>,
    /// Selected slot; always a Ready one when set
    pub selected_index: Option<usize>,
    /// Whether a batch is running
    pub is_generating: bool,
    /// Slots requested per batch
    pub total_slots: usize,
    /// Creation time, Unix milliseconds
    pub created_at_ms: i64,
    /// Operator replacements, by slot id
    pub edited_selections: BTreeMap<String, String>,
    /// Steering text from the last refine submission
    pub guide_hint: Option<String>,
    /// Expected model per position
    pub slot_models: Vec<String>,
    /// Batch counter, bumped on every slot reset
    pub generation: u64,
    /// Most recently observed quota
    pub quota: Option<QuotaInfo>,
    /// Cost of candidates discarded by earlier resets
    pub carried_cost: Option<f64>,
    /// Soft failures of the current batch
    pub failures: Vec<SlotFailure>,
}

impl SelectorFlowContext {
    /// Create a context with one Pending slot per model.
    #[must_use]
    pub fn new(slot_models: Vec<String>) -> Self {
        let total_slots = slot_models.len();
        let mut context = Self {
            mode: Mode::List,
            list_mode: ListMode::Initial,
            prompt_kind: None,
            prompt_target_index: None,
            slots: Vec::new(),
            selected_index: None,
            is_generating: false,
            total_slots,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            edited_selections: BTreeMap::new(),
            guide_hint: None,
            slot_models,
            generation: 0,
            quota: None,
            carried_cost: None,
            failures: Vec::new(),
        };
        context.slots = context.pending_slots();
        context
    }

    fn pending_slots(&self) -> Vec<Slot> {
        (0..self.total_slots)
            .map(|index| Slot::Pending {
                slot_id: format!("pending-{}-{index}", self.generation),
                model: self.slot_models.get(index).cloned(),
            })
            .collect()
    }

    /// Start a fresh batch: bump the counter and make every slot Pending.
    ///
    /// Costs of the discarded candidates are carried so the final total
    /// still covers them.
    pub(crate) fn reset_slots(&mut self) {
        if let Some(discarded) = sum_costs(&self.slots) {
            self.carried_cost = Some(self.carried_cost.unwrap_or(0.0) + discarded);
        }
        self.generation += 1;
        self.slots = self.pending_slots();
        self.selected_index = None;
        self.failures.clear();
    }

    /// Point the selection at a Ready slot, or clear it when none exists.
    pub(crate) fn normalize_selection(&mut self) {
        let valid = self
            .selected_index
            .and_then(|index| self.slots.get(index))
            .is_some_and(Slot::is_ready);
        if !valid {
            self.selected_index = self.first_ready();
        }
    }

    /// Index of the first Ready slot
    #[must_use]
    pub fn first_ready(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_ready)
    }

    /// Number of Ready slots
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_ready()).count()
    }

    /// The selected candidate
    #[must_use]
    pub fn selected_candidate(&self) -> Option<&Candidate> {
        self.selected_index
            .and_then(|index| self.slots.get(index))
            .and_then(Slot::candidate)
    }

    /// Text shown for a candidate: the operator's edit if any, else its content.
    #[must_use]
    pub fn display_text<'a>(&'a self, candidate: &'a Candidate) -> &'a str {
        self.edited_selections
            .get(&candidate.slot_id)
            .map_or(candidate.content.as_str(), String::as_str)
    }

    /// Cost of every candidate seen this session, `None` if nothing reported one.
    #[must_use]
    pub fn total_cost(&self) -> Option<f64> {
        match (sum_costs(&self.slots), self.carried_cost) {
            (None, None) => None,
            (current, carried) => Some(current.unwrap_or(0.0) + carried.unwrap_or(0.0)),
        }
    }
}

fn sum_costs(slots: &[Slot]) -> Option<f64> {
    slots
        .iter()
        .filter_map(Slot::candidate)
        .filter_map(|candidate| candidate.cost)
        .fold(None, |total, cost| Some(total.unwrap_or(0.0) + cost))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(slot_id: &str, cost: Option<f64>) -> Slot {
        Slot::Ready {
            candidate: Candidate {
                content: format!("text {slot_id}"),
                slot_id: slot_id.to_string(),
                cost,
                ..Candidate::default()
            },
        }
    }

    #[test]
    fn test_new_context_is_all_pending() {
        let context = SelectorFlowContext::new(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(context.total_slots, 2);
        assert!(context.slots.iter().all(Slot::is_pending));
        assert_eq!(context.slots[1].model(), Some("b"));
        assert_eq!(context.slots[0].slot_id(), "pending-0-0");
        assert_eq!(context.selected_index, None);
        assert!(context.created_at_ms > 0);
    }

    #[test]
    fn test_reset_bumps_generation_and_carries_cost() {
        let mut context = SelectorFlowContext::new(vec!["a".to_string(), "b".to_string()]);
        context.slots = vec![ready("x", Some(0.25)), ready("y", None)];
        context.selected_index = Some(0);

        context.reset_slots();
        assert_eq!(context.generation, 1);
        assert_eq!(context.slots.len(), 2);
        assert_eq!(context.slots[0].slot_id(), "pending-1-0");
        assert_eq!(context.selected_index, None);
        assert_eq!(context.carried_cost, Some(0.25));
        assert_eq!(context.total_cost(), Some(0.25));
    }

    #[test]
    fn test_total_cost_none_without_reports() {
        let mut context = SelectorFlowContext::new(vec!["a".to_string()]);
        context.slots = vec![ready("x", None)];
        assert_eq!(context.total_cost(), None);

        context.slots = vec![ready("x", Some(0.5)), ready("y", Some(0.25))];
        assert_eq!(context.total_cost(), Some(0.75));
    }

    #[test]
    fn test_normalize_snaps_to_first_ready() {
        let mut context = SelectorFlowContext::new(vec!["a".to_string(); 3]);
        context.slots[2] = ready("z", None);
        context.selected_index = Some(0);
        context.normalize_selection();
        assert_eq!(context.selected_index, Some(2));

        context.selected_index = Some(9);
        context.normalize_selection();
        assert_eq!(context.selected_index, Some(2));

        context.slots[2] = Slot::Pending {
            slot_id: "p".to_string(),
            model: None,
        };
        context.normalize_selection();
        assert_eq!(context.selected_index, None);
    }

    #[test]
    fn test_display_text_prefers_edit() {
        let mut context = SelectorFlowContext::new(vec!["a".to_string()]);
        context.slots = vec![ready("x", None)];
        let candidate = context.slots[0].candidate().unwrap().clone();
        assert_eq!(context.display_text(&candidate), "text x");

        context
            .edited_selections
            .insert("x".to_string(), "edited".to_string());
        assert_eq!(context.display_text(&candidate), "edited");
    }
}
