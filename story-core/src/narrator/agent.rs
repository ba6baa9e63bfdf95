//! The narrator: every generation operation a story goes through.

use super::backend::{Sampling, TextBackend};
use super::context::{self, ContextError};
use super::payload::{self, AnalysisContent, PartContent, PayloadError, QuizContent};
use super::retry::{self, AttemptError};
use super::validate;
use crate::quiz::{Quiz, QuizRequest, QuizRequestError};
use crate::story::{Story, StoryPart, StoryResult};
use deepinfra::{DeepInfra, Message, ResponseFormat};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The logical operations the narrator performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    StartStory,
    NextPart,
    Conclude,
    Quiz,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::StartStory => "start story",
            Operation::NextPart => "next part",
            Operation::Conclude => "conclude story",
            Operation::Quiz => "generate quiz",
        };
        f.write_str(name)
    }
}

/// Errors returned by the narrator.
///
/// `InvalidState` and `InvalidRequest` surface before any generation call.
/// Everything transient ends up in `Exhausted`.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("Invalid story state: {0}")]
    InvalidState(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to {operation} after {attempts} attempts: {source}")]
    Exhausted {
        operation: Operation,
        attempts: u32,
        source: AttemptError,
    },

    #[error("Cancelled while trying to {operation}")]
    Cancelled { operation: Operation },

    #[error("Timed out after {after:?} while trying to {operation}")]
    TimedOut { operation: Operation, after: Duration },

    #[error("Client error: {0}")]
    Client(#[from] deepinfra::Error),
}

impl From<ContextError> for NarratorError {
    fn from(e: ContextError) -> Self {
        NarratorError::InvalidState(e.to_string())
    }
}

impl From<QuizRequestError> for NarratorError {
    fn from(e: QuizRequestError) -> Self {
        NarratorError::InvalidRequest(e.to_string())
    }
}

/// Configuration for the narrator.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    /// Attempts per operation phase, including the first.
    pub max_attempts: u32,

    /// Sampling for the single word-count revision round.
    pub repair_sampling: Sampling,

    /// Sampling for quiz generation.
    pub quiz_sampling: Sampling,

    /// Upper bound on a whole operation, retries included.
    pub operation_timeout: Option<Duration>,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            repair_sampling: Sampling::new(0.7, 0.7),
            quiz_sampling: Sampling::new(0.8, 0.9),
            operation_timeout: None,
        }
    }
}

/// The first part of a story together with its generated title.
#[derive(Debug, Clone)]
pub struct StoryOpening {
    pub title: String,
    pub part: StoryPart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Opening,
    Continuation,
    Closing,
}

impl Segment {
    fn kind(self) -> &'static str {
        match self {
            Segment::Opening | Segment::Continuation => "story part",
            Segment::Closing => "closing part",
        }
    }
}

/// Drives story and quiz generation against a [`TextBackend`].
///
/// The narrator keeps no story state. Each call rebuilds the conversation
/// from the `Story` it is given and returns new values for the caller to
/// persist.
pub struct Narrator {
    backend: Arc<dyn TextBackend>,
    config: NarratorConfig,
    cancel: CancellationToken,
}

impl Narrator {
    /// Create a narrator on top of an existing backend.
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self {
            backend,
            config: NarratorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a narrator backed by DeepInfra, configured from the environment.
    pub fn from_env() -> Result<Self, NarratorError> {
        let client = DeepInfra::from_env()?;
        Ok(Self::new(Arc::new(client)))
    }

    /// Configure the narrator.
    pub fn with_config(mut self, config: NarratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort in-flight operations when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &NarratorConfig {
        &self.config
    }

    /// Generate the title and first part of a story that has no parts yet.
    #[tracing::instrument(skip_all, fields(story_id = %story.id, operation = %Operation::StartStory))]
    pub async fn start_story(&self, story: &Story) -> Result<StoryOpening, NarratorError> {
        const OP: Operation = Operation::StartStory;

        if !story.parts.is_empty() {
            return Err(NarratorError::InvalidState(
                "story has already been started".to_string(),
            ));
        }
        if story.length == 0 {
            return Err(NarratorError::InvalidRequest(
                "story length must be at least 1".to_string(),
            ));
        }
        story_sampling(story)?;

        let messages = context::rebuild_story(story)?;
        let messages = messages.as_slice();
        tracing::info!(topic = %story.topic, target_group = ?story.target_group, "Starting story");

        let (title, part) = retry::within(
            OP,
            self.config.operation_timeout,
            retry::run(OP, self.config.max_attempts, &self.cancel, move |_| {
                self.generate_segment(story, messages, Segment::Opening)
            }),
        )
        .await?;

        tracing::info!(title = %title, "Story started");
        Ok(StoryOpening { title, part })
    }

    /// Generate the next decision point of a started, incomplete story.
    #[tracing::instrument(skip_all, fields(story_id = %story.id, operation = %Operation::NextPart))]
    pub async fn next_part(&self, story: &Story) -> Result<StoryPart, NarratorError> {
        const OP: Operation = Operation::NextPart;

        if story.parts.is_empty() {
            return Err(NarratorError::InvalidState(
                "story has not been started".to_string(),
            ));
        }
        if story.is_complete() {
            return Err(NarratorError::InvalidState(format!(
                "all {} decision points have been played; conclude the story instead",
                story.length
            )));
        }
        story_sampling(story)?;

        let messages = context::rebuild_story(story)?;
        let messages = messages.as_slice();
        tracing::info!(part = story.parts.len() + 1, length = story.length, "Generating part");

        let (_, part) = retry::within(
            OP,
            self.config.operation_timeout,
            retry::run(OP, self.config.max_attempts, &self.cancel, move |_| {
                self.generate_segment(story, messages, Segment::Continuation)
            }),
        )
        .await?;

        tracing::info!(intertitle = %part.intertitle, "Part generated");
        Ok(part)
    }

    /// Generate the closing part and the reflective analysis of a complete
    /// story.
    ///
    /// The closing part is generated first, under its own attempt budget.
    /// Its text then seeds the analysis conversation, which gets a second
    /// budget. The closing text is returned as [`StoryResult::text`].
    #[tracing::instrument(skip_all, fields(story_id = %story.id, operation = %Operation::Conclude))]
    pub async fn conclude(&self, story: &Story) -> Result<StoryResult, NarratorError> {
        const OP: Operation = Operation::Conclude;

        if !story.is_complete() {
            return Err(NarratorError::InvalidState(format!(
                "only {} of {} decision points have been played",
                story.parts.len(),
                story.length
            )));
        }
        if story.result.is_some() {
            return Err(NarratorError::InvalidState(
                "story has already been concluded".to_string(),
            ));
        }
        let sampling = story_sampling(story)?;

        let messages = context::rebuild_story(story)?;
        tracing::info!(parts = story.parts.len(), "Concluding story");

        retry::within(OP, self.config.operation_timeout, async {
            let story_messages = messages.as_slice();
            let (_, closing) =
                retry::run(OP, self.config.max_attempts, &self.cancel, move |_| {
                    self.generate_segment(story, story_messages, Segment::Closing)
                })
                .await?;
            tracing::info!("Closing part generated");

            let end = closing.text;
            let result_messages = context::rebuild_result(story, messages.clone(), &end);
            let result_messages = result_messages.as_slice();
            let end = end.as_str();

            let result = retry::run(OP, self.config.max_attempts, &self.cancel, move |_| {
                self.generate_analysis(result_messages, sampling, end)
            })
            .await?;

            tracing::info!(
                positive = result.positive_choices.len(),
                negative = result.negative_choices.len(),
                "Story concluded"
            );
            Ok::<_, NarratorError>(result)
        })
        .await
    }

    /// Generate a quiz about a concluded story.
    ///
    /// The multiple-response flag of every question is derived from its
    /// choices; whatever the model claims is ignored.
    #[tracing::instrument(skip_all, fields(story_id = %story.id, operation = %Operation::Quiz))]
    pub async fn generate_quiz(
        &self,
        story: &Story,
        request: &QuizRequest,
    ) -> Result<Quiz, NarratorError> {
        const OP: Operation = Operation::Quiz;

        request.validate()?;
        if story.result.is_none() {
            return Err(ContextError::MissingResult.into());
        }
        let sampling = self.config.quiz_sampling;
        if !sampling.is_valid() {
            return Err(NarratorError::InvalidRequest(format!(
                "quiz sampling {sampling:?} is outside [0, 1]"
            )));
        }

        let messages = context::quiz_context(story, request)?;
        let messages = messages.as_slice();
        tracing::info!(
            questions = request.number_questions,
            types = ?request.types,
            "Generating quiz"
        );

        let quiz = retry::within(
            OP,
            self.config.operation_timeout,
            retry::run(OP, self.config.max_attempts, &self.cancel, move |_| {
                self.generate_quiz_attempt(messages, sampling)
            }),
        )
        .await?;

        tracing::info!(title = %quiz.title, questions = quiz.questions.len(), "Quiz generated");
        Ok(quiz)
    }

    /// One attempt at a story segment, including at most one revision
    /// round for an out-of-bounds word count.
    ///
    /// The revised reply is accepted without another word-count check.
    async fn generate_segment(
        &self,
        story: &Story,
        messages: &[Message],
        segment: Segment,
    ) -> Result<(String, StoryPart), AttemptError> {
        let sampling = Sampling::new(story.temperature, story.top_p);
        let content = self
            .backend
            .generate(messages, sampling, ResponseFormat::JsonObject)
            .await?;
        tracing::debug!(content = %content, "Assistant content");

        let mut parsed: PartContent = payload::parse(segment.kind(), &content)?;

        if let Some(correction) = validate::check(&parsed.story, story.target_group) {
            let profile = story.target_group.profile();
            tracing::warn!(
                word_count = validate::word_count(&parsed.story),
                min_words = profile.min_words,
                max_words = profile.max_words,
                "Part length out of bounds, requesting revision"
            );

            let mut revision = messages.to_vec();
            revision.push(Message::assistant(content));
            revision.push(Message::user(correction));

            let revised = self
                .backend
                .generate(&revision, self.config.repair_sampling, ResponseFormat::JsonObject)
                .await?;
            tracing::debug!(content = %revised, "Revised assistant content");

            parsed = payload::parse(segment.kind(), &revised)?;
        }

        let (title, part) = match segment {
            Segment::Closing => parsed.into_closing_part()?,
            Segment::Opening | Segment::Continuation => parsed.into_part()?,
        };

        if segment == Segment::Opening && title.trim().is_empty() {
            return Err(PayloadError::invalid(segment.kind(), "title is empty").into());
        }

        Ok((title, part))
    }

    async fn generate_analysis(
        &self,
        messages: &[Message],
        sampling: Sampling,
        end: &str,
    ) -> Result<StoryResult, AttemptError> {
        let content = self
            .backend
            .generate(messages, sampling, ResponseFormat::JsonObject)
            .await?;
        tracing::debug!(content = %content, "Assistant content");

        let analysis: AnalysisContent = payload::parse("analysis", &content)?;
        Ok(analysis.into_result(end.to_string())?)
    }

    async fn generate_quiz_attempt(
        &self,
        messages: &[Message],
        sampling: Sampling,
    ) -> Result<Quiz, AttemptError> {
        let content = self
            .backend
            .generate(messages, sampling, ResponseFormat::JsonObject)
            .await?;
        tracing::debug!(content = %content, "Assistant content");

        let quiz: QuizContent = payload::parse("quiz", &content)?;
        Ok(quiz.into_quiz()?)
    }
}

fn story_sampling(story: &Story) -> Result<Sampling, NarratorError> {
    let sampling = Sampling::new(story.temperature, story.top_p);
    if sampling.is_valid() {
        Ok(sampling)
    } else {
        Err(NarratorError::InvalidRequest(format!(
            "temperature {} and top_p {} must both lie in [0, 1]",
            story.temperature, story.top_p
        )))
    }
}
