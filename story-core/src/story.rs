//! Story state as the caller persists it.
//!
//! The pipeline only reads these types and hands back new parts and
//! results; it never stores them.

use crate::audience::TargetGroup;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of options offered at every decision point.
pub const CHOICES_PER_PART: usize = 4;

/// Tolerance for the zero-sum impact check.
pub const IMPACT_SUM_TOLERANCE: f64 = 1e-4;

/// An interactive story and everything generated for it so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,

    /// Set once the opening part has been generated.
    pub title: Option<String>,

    /// The sustainability topic the story explores.
    pub topic: String,

    pub target_group: TargetGroup,

    /// Number of decision points before the story concludes.
    pub length: usize,

    pub temperature: f32,

    pub top_p: f32,

    /// Parts in creation order.
    pub parts: Vec<StoryPart>,

    /// Set once the story has been concluded.
    pub result: Option<StoryResult>,
}

impl Story {
    /// Create an empty story.
    pub fn new(topic: impl Into<String>, target_group: TargetGroup, length: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: None,
            topic: topic.into(),
            target_group,
            length,
            temperature: 0.8,
            top_p: 0.9,
            parts: Vec::new(),
            result: None,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Whether every decision point has been played.
    pub fn is_complete(&self) -> bool {
        self.parts.len() >= self.length
    }

    /// Sum of the impacts of every option chosen so far.
    pub fn impact_score(&self) -> f32 {
        self.parts
            .iter()
            .filter_map(StoryPart::chosen_choice)
            .map(|c| c.impact)
            .sum()
    }
}

/// One decision point of a story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryPart {
    pub id: Uuid,

    pub text: String,

    /// Heading shown between parts.
    pub intertitle: String,

    pub created_at: DateTime<Utc>,

    /// The option the audience picked, 1-based. `None` until they decide.
    pub chosen_number: Option<u8>,

    pub choices: Vec<StoryChoice>,
}

impl StoryPart {
    pub fn new(
        intertitle: impl Into<String>,
        text: impl Into<String>,
        choices: Vec<StoryChoice>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            intertitle: intertitle.into(),
            created_at: Utc::now(),
            chosen_number: None,
            choices,
        }
    }

    /// Record the audience's decision.
    pub fn choose(&mut self, number: u8) {
        self.chosen_number = Some(number);
    }

    /// The option matching `chosen_number`, if any.
    pub fn chosen_choice(&self) -> Option<&StoryChoice> {
        let number = self.chosen_number?;
        self.choices.iter().find(|c| c.number == number)
    }

    /// Sum of all option impacts.
    pub fn impact_sum(&self) -> f64 {
        self.choices.iter().map(|c| f64::from(c.impact)).sum()
    }

    /// Whether the options form a valid zero-sum decision point.
    pub fn is_balanced(&self) -> bool {
        self.impact_sum().abs() <= IMPACT_SUM_TOLERANCE
    }
}

/// An option at a decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryChoice {
    /// 1-based position.
    pub number: u8,

    pub text: String,

    /// Contribution to the story outcome, in [-1, 1].
    pub impact: f32,
}

impl StoryChoice {
    pub fn new(number: u8, text: impl Into<String>, impact: f32) -> Self {
        Self {
            number,
            text: text.into(),
            impact,
        }
    }

    /// A neutral option carried by the closing part.
    pub fn placeholder(number: u8) -> Self {
        Self::new(number, String::new(), 0.0)
    }

    pub fn is_placeholder(&self) -> bool {
        self.text.is_empty() && self.impact == 0.0
    }
}

/// The conclusion and reflective analysis of a finished story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryResult {
    /// Closing part of the story.
    pub text: String,

    pub summary: String,

    pub positive_choices: Vec<String>,

    pub negative_choices: Vec<String>,

    pub learnings: Vec<String>,

    pub discussion_questions: Vec<String>,
}
