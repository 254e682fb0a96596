//! Selector inputs and host-facing effects

use super::state::PromptKind;

/// Direction for list navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards index 0
    Up,
    /// Towards the last slot
    Down,
}

/// An input to [`super::transition`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Start (or restart) a batch
    GenerateStart,
    /// The running batch finished
    GenerateDone,
    /// Stop the running batch, keep what arrived
    CancelGeneration,
    /// Move to the nearest Ready slot
    Navigate(Direction),
    /// Jump to a slot by index
    ChooseIndex(usize),
    /// Open an edit or refine prompt for the selection
    OpenPrompt(PromptKind),
    /// Close the prompt without submitting
    PromptCancel,
    /// Submit the prompt text
    PromptSubmit {
        /// Replacement text (edit) or guide text (refine)
        text: String,
    },
    /// Accept the selection
    Confirm {
        /// Text that wins over both the edit and the raw content
        override_text: Option<String>,
    },
    /// Leave the prompt, undo a refine, or exit
    Quit,
}

/// Work the host performs after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Cancel any running batch and start a new one
    StartGeneration,
    /// Cancel the running batch
    CancelGeneration,
}
