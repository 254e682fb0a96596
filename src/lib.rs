//! commitrace - race several models for commit message candidates
//!
//! Every configured model is asked for a commit message at once. Results
//! are merged as they arrive into an interactive selector where the
//! operator can pick, edit, or refine a candidate.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod generate;
pub mod log;
pub mod race;
pub mod sanitize;
pub mod selector;
pub mod session;

// Re-export commonly used types
pub use backend::{GenerationBackend, GenerationRequest};
pub use config::{AppConfig, ConfigOverrides};
pub use error::GenerationError;
pub use generate::{start_batch, Candidate, GenerationSettings, GenerationUpdate};
pub use race::{ErrorPolicy, RaceMultiplexer, RaceSource, Raced};
pub use sanitize::{sanitize, StreamSanitizer};
pub use selector::{apply_update, project, transition, Event, SelectorFlowContext, SelectorResult};
pub use session::{run_session, OperatorInput, SessionOutcome};
