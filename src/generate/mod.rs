//! Candidate generation
//!
//! Per-model retry loops raced against each other.

pub mod candidate;
pub mod retry;
pub mod runner;

pub use candidate::{Candidate, QuotaInfo};
pub use retry::{ModelGeneration, RetryPolicy};
pub use runner::{start_batch, GenerationBatch, GenerationSettings, GenerationUpdate, SlotFailure};
