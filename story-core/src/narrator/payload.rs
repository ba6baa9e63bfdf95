//! Structured model output and its conversion into domain types.
//!
//! The same shapes are used in both directions: parsed from assistant
//! content, and re-serialized when persisted state is replayed into a
//! conversation.

use crate::quiz::{Quiz, QuizChoice, QuizQuestion};
use crate::story::{StoryChoice, StoryPart, StoryResult, CHOICES_PER_PART, IMPACT_SUM_TOLERANCE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Assistant content that could not be turned into a domain object.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed {kind} JSON: {source}")]
    Json {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

impl PayloadError {
    pub(crate) fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        PayloadError::Invalid {
            kind,
            reason: reason.into(),
        }
    }
}

/// Parse assistant content, tolerating a markdown code fence around it.
pub fn parse<T: DeserializeOwned>(kind: &'static str, content: &str) -> Result<T, PayloadError> {
    serde_json::from_str(extract_json(content)).map_err(|source| PayloadError::Json { kind, source })
}

/// Unwrap a reply that arrives as a single markdown code block.
///
/// Only a leading fence counts, so backticks inside a story body are kept.
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);

    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

// ============================================================================
// Story parts
// ============================================================================

/// One story part as the model writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub intertitle: String,
    pub story: String,
    #[serde(default)]
    pub options: Vec<OptionContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContent {
    #[serde(default)]
    pub impact: f32,
    #[serde(default)]
    pub text: String,
}

impl PartContent {
    /// Canonical form of an already persisted part, for replay.
    pub fn from_part(title: &str, part: &StoryPart) -> Self {
        Self {
            title: title.to_string(),
            intertitle: part.intertitle.clone(),
            story: part.text.clone(),
            options: part
                .choices
                .iter()
                .map(|c| OptionContent {
                    impact: c.impact,
                    text: c.text.clone(),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> String {
        // Strings and floats always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Convert a decision-point part, enforcing the option invariants.
    ///
    /// Returns the story title alongside the part.
    pub fn into_part(self) -> Result<(String, StoryPart), PayloadError> {
        const KIND: &str = "story part";

        if self.story.trim().is_empty() {
            return Err(PayloadError::invalid(KIND, "story text is empty"));
        }
        if self.options.is_empty() || self.options.len() > CHOICES_PER_PART {
            return Err(PayloadError::invalid(
                KIND,
                format!("expected 1 to {CHOICES_PER_PART} options, got {}", self.options.len()),
            ));
        }
        if let Some(bad) = self
            .options
            .iter()
            .find(|o| !(-1.0..=1.0).contains(&o.impact))
        {
            return Err(PayloadError::invalid(
                KIND,
                format!("impact {} is outside [-1, 1]", bad.impact),
            ));
        }

        let choices = self
            .options
            .into_iter()
            .zip(1u8..)
            .map(|(o, number)| StoryChoice::new(number, o.text, o.impact))
            .collect();
        let part = StoryPart::new(self.intertitle, self.story, choices);

        if !part.is_balanced() {
            return Err(PayloadError::invalid(
                KIND,
                format!(
                    "impacts sum to {:.4}, expected 0 within {IMPACT_SUM_TOLERANCE}",
                    part.impact_sum()
                ),
            ));
        }

        Ok((self.title, part))
    }

    /// Convert the closing part. Its options are replaced by neutral
    /// placeholders whatever the model returned.
    pub fn into_closing_part(self) -> Result<(String, StoryPart), PayloadError> {
        if self.story.trim().is_empty() {
            return Err(PayloadError::invalid("closing part", "story text is empty"));
        }

        let choices = (1..=CHOICES_PER_PART as u8)
            .map(StoryChoice::placeholder)
            .collect();

        Ok((
            self.title,
            StoryPart::new(self.intertitle, self.story, choices),
        ))
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// The reflective analysis as the model writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContent {
    pub summary: String,
    #[serde(default)]
    pub positive_choices: Vec<String>,
    #[serde(default)]
    pub negative_choices: Vec<String>,
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub discussion_questions: Vec<String>,
}

impl AnalysisContent {
    pub fn from_result(result: &StoryResult) -> Self {
        Self {
            summary: result.summary.clone(),
            positive_choices: result.positive_choices.clone(),
            negative_choices: result.negative_choices.clone(),
            learnings: result.learnings.clone(),
            discussion_questions: result.discussion_questions.clone(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Combine with the closing text into a result.
    pub fn into_result(self, end: String) -> Result<StoryResult, PayloadError> {
        if self.summary.trim().is_empty() {
            return Err(PayloadError::invalid("analysis", "summary is empty"));
        }

        Ok(StoryResult {
            text: end,
            summary: self.summary,
            positive_choices: self.positive_choices,
            negative_choices: self.negative_choices,
            learnings: self.learnings,
            discussion_questions: self.discussion_questions,
        })
    }
}

// ============================================================================
// Quiz
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct QuizContent {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "NumberQuestions", default, deserialize_with = "lenient_u32")]
    pub number_questions: u32,
    #[serde(rename = "Questions", default)]
    pub questions: Vec<QuestionContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionContent {
    #[serde(rename = "Number", default, deserialize_with = "lenient_u32")]
    pub number: u32,
    #[serde(rename = "Text")]
    pub text: String,
    /// Read so the shape is accepted; never trusted.
    #[serde(rename = "IsMultipleResponse", default)]
    pub is_multiple_response: Option<bool>,
    #[serde(rename = "Choices", default)]
    pub choices: Vec<ChoiceContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceContent {
    #[serde(rename = "Number", default, deserialize_with = "lenient_u32")]
    pub number: u32,
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "IsCorrect", default)]
    pub is_correct: bool,
}

impl QuizContent {
    /// Convert into a quiz, recomputing every multiple-response flag.
    pub fn into_quiz(self) -> Result<Quiz, PayloadError> {
        const KIND: &str = "quiz";

        if self.questions.is_empty() {
            return Err(PayloadError::invalid(KIND, "quiz has no questions"));
        }
        if let Some(empty) = self.questions.iter().find(|q| q.choices.is_empty()) {
            return Err(PayloadError::invalid(
                KIND,
                format!("question {} has no choices", empty.number),
            ));
        }

        let questions = self
            .questions
            .into_iter()
            .map(|q| {
                let choices = q
                    .choices
                    .into_iter()
                    .map(|c| QuizChoice::new(c.number, c.text, c.is_correct))
                    .collect();
                QuizQuestion::new(q.number, q.text, choices)
            })
            .collect();

        Ok(Quiz {
            title: self.title,
            number_questions: self.number_questions,
            questions,
        })
    }
}

/// Accept `5` as well as `"5"`; models are inconsistent about quoting.
fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u32),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
