//! Interactive sustainability stories and quizzes, generated by a language
//! model.
//!
//! This crate provides:
//! - Audience tiers with their prompt phrasing and word-count policy
//! - The story data model the caller persists
//! - A stateless `Narrator` that rebuilds the conversation from a story,
//!   generates the next step, repairs out-of-bounds parts, and retries
//! - Quiz generation for concluded stories
//!
//! # Quick Start
//!
//! ```ignore
//! use story_core::{Narrator, Story, TargetGroup};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let narrator = Narrator::from_env()?;
//!     let mut story = Story::new("Plastic in the ocean", TargetGroup::MiddleSchool, 3);
//!
//!     let opening = narrator.start_story(&story).await?;
//!     story.title = Some(opening.title);
//!     story.parts.push(opening.part);
//!
//!     story.parts[0].choose(2);
//!     let part = narrator.next_part(&story).await?;
//!     println!("{}", part.text);
//!     Ok(())
//! }
//! ```

pub mod audience;
pub mod narrator;
pub mod quiz;
pub mod story;
pub mod testing;

// Primary public API
pub use audience::{AudienceProfile, TargetGroup};
pub use narrator::{
    AttemptError, Narrator, NarratorConfig, NarratorError, Operation, Sampling, StoryOpening,
    TextBackend,
};
pub use quiz::{Quiz, QuizChoice, QuizQuestion, QuizRequest, QuizRequestError, QuizType};
pub use story::{Story, StoryChoice, StoryPart, StoryResult};
pub use testing::ScriptedBackend;
