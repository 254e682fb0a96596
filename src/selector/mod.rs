//! Interactive candidate selector
//!
//! A pure state machine: `transition(&context, event)` returns the next
//! context together with effects for the host and an optional terminal
//! result. Generation updates are folded in separately by [`apply_update`].

pub mod apply;
pub mod event;
pub mod state;
pub mod transition;
pub mod view;

pub use apply::apply_update;
pub use event::{Direction, Effect, Event};
pub use state::{ListMode, Mode, PromptKind, SelectorFlowContext, Slot};
pub use transition::{transition, AbortReason, Confirmation, SelectorResult, Transition};
pub use view::{project, PromptView, SelectorView, SlotRow, SlotStatus};
