//! Testing utilities for the story pipeline.
//!
//! This module provides tools for integration testing:
//! - `ScriptedBackend` for deterministic testing without API calls
//! - Story fixtures at every stage of play
//! - Sample model replies and assertion helpers

use crate::audience::TargetGroup;
use crate::narrator::{Sampling, TextBackend};
use crate::quiz::Quiz;
use crate::story::{Story, StoryChoice, StoryPart, StoryResult};
use async_trait::async_trait;
use deepinfra::{Message, ResponseFormat};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// One call the backend received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub sampling: Sampling,
    pub format: ResponseFormat,
}

/// A backend that returns scripted replies in order and records every
/// request it receives.
///
/// Once the script runs out, every call fails with a network error.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, deepinfra::Error>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    /// Create a backend with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.push_reply(content);
        self
    }

    /// Queue a failed call.
    pub fn with_error(self, error: deepinfra::Error) -> Self {
        self.push_error(error);
        self
    }

    pub fn push_reply(&self, content: impl Into<String>) {
        self.lock_replies().push_back(Ok(content.into()));
    }

    pub fn push_error(&self, error: deepinfra::Error) {
        self.lock_replies().push_back(Err(error));
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        self.lock_requests().len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock_requests().clone()
    }

    /// Scripted replies not consumed yet.
    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, deepinfra::Error>>> {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<RecordedRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TextBackend for ScriptedBackend {
    async fn generate(
        &self,
        messages: &[Message],
        sampling: Sampling,
        format: ResponseFormat,
    ) -> Result<String, deepinfra::Error> {
        self.lock_requests().push(RecordedRequest {
            messages: messages.to_vec(),
            sampling,
            format,
        });

        let reply = self.lock_replies().pop_front();
        reply.unwrap_or_else(|| Err(deepinfra::Error::Network("no scripted replies left".to_string())))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// `n` words of filler text.
pub fn words(n: usize) -> String {
    vec!["river"; n].join(" ")
}

/// A story with a title and no parts.
pub fn sample_story(target_group: TargetGroup, length: usize) -> Story {
    Story::new("Water scarcity in a small town", target_group, length).with_title("The Dry Summer")
}

/// A balanced decision point.
pub fn sample_part(intertitle: &str) -> StoryPart {
    StoryPart::new(
        intertitle,
        words(80),
        vec![
            StoryChoice::new(1, "Build a rain cistern", 0.6),
            StoryChoice::new(2, "Plant drought-resistant trees", 0.2),
            StoryChoice::new(3, "Wait for rain", -0.2),
            StoryChoice::new(4, "Drill a deeper well", -0.6),
        ],
    )
}

/// A story with `played` parts, each with its first option chosen.
pub fn played_story(target_group: TargetGroup, length: usize, played: usize) -> Story {
    let mut story = sample_story(target_group, length);
    story.parts = (1..=played)
        .map(|n| {
            let mut part = sample_part(&format!("Part {n}"));
            part.choose(1);
            part
        })
        .collect();
    story
}

/// A complete story that already has a result.
pub fn concluded_story(target_group: TargetGroup, length: usize) -> Story {
    let mut story = played_story(target_group, length, length);
    story.result = Some(StoryResult {
        text: "The cistern filled and the town made it through the summer.".to_string(),
        summary: "The town faced a drought and chose to collect rainwater.".to_string(),
        positive_choices: vec!["Building a cistern kept water for later.".to_string()],
        negative_choices: vec![],
        learnings: vec!["Saving water early helps in dry times.".to_string()],
        discussion_questions: vec!["Where could you collect rainwater?".to_string()],
    });
    story
}

// ============================================================================
// Sample replies
// ============================================================================

/// A decision-point reply whose story text has `word_count` words.
pub fn part_reply(word_count: usize) -> String {
    part_reply_with_impacts(word_count, [0.5, 0.25, -0.25, -0.5])
}

pub fn part_reply_with_impacts(word_count: usize, impacts: [f32; 4]) -> String {
    let options: Vec<_> = impacts
        .iter()
        .enumerate()
        .map(|(i, impact)| serde_json::json!({ "impact": impact, "text": format!("Option {}", i + 1) }))
        .collect();

    serde_json::json!({
        "title": "The Dry Summer",
        "intertitle": "Low Water",
        "story": words(word_count),
        "options": options,
    })
    .to_string()
}

/// A closing-part reply. The options are deliberately not neutral.
pub fn closing_reply(word_count: usize) -> String {
    part_reply_with_impacts(word_count, [0.9, 0.9, 0.9, 0.9])
}

pub fn analysis_reply() -> String {
    serde_json::json!({
        "summary": "The town learned to share its water.",
        "positive_choices": ["Building a cistern"],
        "negative_choices": ["Waiting too long at first"],
        "learnings": ["Plan for dry seasons"],
        "discussion_questions": ["How does your family save water?"]
    })
    .to_string()
}

/// A quiz reply that claims the wrong multiple-response flag on every
/// question.
pub fn quiz_reply() -> String {
    serde_json::json!({
        "Title": "Water Wise",
        "NumberQuestions": 2,
        "Questions": [
            {
                "Number": 1,
                "Text": "What did the town build?",
                "IsMultipleResponse": true,
                "Choices": [
                    { "Number": 1, "Text": "A cistern", "IsCorrect": true },
                    { "Number": 2, "Text": "A pool", "IsCorrect": false }
                ]
            },
            {
                "Number": 2,
                "Text": "Which actions save water?",
                "IsMultipleResponse": false,
                "Choices": [
                    { "Number": 1, "Text": "Collecting rain", "IsCorrect": true },
                    { "Number": 2, "Text": "Shorter showers", "IsCorrect": true },
                    { "Number": 3, "Text": "Watering at noon", "IsCorrect": false }
                ]
            }
        ]
    })
    .to_string()
}

// ============================================================================
// Assertions
// ============================================================================

/// Assert the part's impacts lie in [-1, 1] and sum to zero.
#[track_caller]
pub fn assert_balanced(part: &StoryPart) {
    for choice in &part.choices {
        assert!(
            (-1.0..=1.0).contains(&choice.impact),
            "Impact {} of option {} is outside [-1, 1]",
            choice.impact,
            choice.number
        );
    }
    assert!(
        part.is_balanced(),
        "Expected impacts to sum to 0, got {}",
        part.impact_sum()
    );
}

/// Assert every option of a closing part is a neutral placeholder.
#[track_caller]
pub fn assert_placeholders(part: &StoryPart) {
    assert!(
        part.choices.iter().all(StoryChoice::is_placeholder),
        "Expected placeholder options, got {:?}",
        part.choices
    );
}

/// Assert every question's flag matches its correct-choice count.
#[track_caller]
pub fn assert_flags_derived(quiz: &Quiz) {
    for question in &quiz.questions {
        assert_eq!(
            question.is_multiple_response,
            question.correct_count() > 1,
            "Question {} has a flag that does not match its choices",
            question.number
        );
    }
}
