//! Story narrator module.
//!
//! Contains the generation pipeline: conversation reconstruction, the
//! text backend seam, word-count repair, bounded retries, and the
//! `Narrator` entry points built on top of them.

mod agent;
mod backend;
pub mod context;
pub mod payload;
mod retry;
pub mod validate;

pub use agent::{Narrator, NarratorConfig, NarratorError, Operation, StoryOpening};
pub use backend::{Sampling, TextBackend};
pub use context::ContextError;
pub use payload::PayloadError;
pub use retry::AttemptError;
