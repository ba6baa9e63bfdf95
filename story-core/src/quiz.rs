//! Quizzes generated from a concluded story.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest quiz that may be requested.
pub const MAX_QUESTIONS: u32 = 20;

/// Question archetypes a quiz may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizType {
    SingleResponse,
    MultipleResponse,
    TrueFalse,
}

impl QuizType {
    /// How the archetype is explained to the quiz author.
    pub fn instruction(self) -> &'static str {
        match self {
            QuizType::SingleResponse => {
                "Single response - a question with four answer options of which exactly one is correct"
            }
            QuizType::MultipleResponse => {
                "Multiple response - a question with two to four answer options of which at least two are correct"
            }
            QuizType::TrueFalse => {
                "True/false - a statement with the two options \"True\" and \"False\" of which exactly one is correct"
            }
        }
    }
}

/// What the caller asks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizRequest {
    pub types: Vec<QuizType>,
    pub number_questions: u32,
}

/// A quiz request that can never succeed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuizRequestError {
    #[error("at least one question type is required")]
    NoTypes,

    #[error("question count {0} is outside 1..={MAX_QUESTIONS}")]
    QuestionCount(u32),
}

impl QuizRequest {
    pub fn new(types: Vec<QuizType>, number_questions: u32) -> Self {
        Self {
            types,
            number_questions,
        }
    }

    pub fn validate(&self) -> Result<(), QuizRequestError> {
        if self.types.is_empty() {
            return Err(QuizRequestError::NoTypes);
        }
        if !(1..=MAX_QUESTIONS).contains(&self.number_questions) {
            return Err(QuizRequestError::QuestionCount(self.number_questions));
        }
        Ok(())
    }
}

/// A generated quiz. Identity and scoring belong to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub title: String,

    /// Question count as declared by the model.
    pub number_questions: u32,

    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub number: u32,

    pub text: String,

    /// Always `correct_count() > 1`; computed here, never read from the model.
    pub is_multiple_response: bool,

    pub choices: Vec<QuizChoice>,
}

impl QuizQuestion {
    /// Build a question, deriving the multiple-response flag from its choices.
    pub fn new(number: u32, text: impl Into<String>, choices: Vec<QuizChoice>) -> Self {
        let is_multiple_response = choices.iter().filter(|c| c.is_correct).count() > 1;
        Self {
            number,
            text: text.into(),
            is_multiple_response,
            choices,
        }
    }

    pub fn correct_count(&self) -> usize {
        self.choices.iter().filter(|c| c.is_correct).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizChoice {
    pub number: u32,

    pub text: String,

    pub is_correct: bool,
}

impl QuizChoice {
    pub fn new(number: u32, text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            number,
            text: text.into(),
            is_correct,
        }
    }
}
