//! Audience tiers and their generation policy.
//!
//! Every tier-dependent decision (prompt phrasing, word-count bounds,
//! repair leniency) is a lookup into a single static table rather than a
//! branch at the call site.

use serde::{Deserialize, Serialize};

/// The reader-age band a story is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetGroup {
    /// Ages 6-10.
    PrimarySchool,
    /// Ages 11-14.
    MiddleSchool,
    /// Ages 15-19.
    HighSchool,
}

impl TargetGroup {
    /// All tiers, youngest first.
    pub const ALL: [TargetGroup; 3] = [
        TargetGroup::PrimarySchool,
        TargetGroup::MiddleSchool,
        TargetGroup::HighSchool,
    ];

    /// The generation policy for this tier.
    pub fn profile(self) -> &'static AudienceProfile {
        match self {
            TargetGroup::PrimarySchool => &PROFILES[0],
            TargetGroup::MiddleSchool => &PROFILES[1],
            TargetGroup::HighSchool => &PROFILES[2],
        }
    }
}

impl std::fmt::Display for TargetGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.profile().label)
    }
}

/// Prompt phrasing and word-count policy for one audience tier.
#[derive(Debug)]
pub struct AudienceProfile {
    /// Human-readable tier name used inside prompts.
    pub label: &'static str,

    /// Minimum words per story part requested from the model.
    pub min_words: usize,

    /// Maximum words per story part. Exceeding it always triggers repair.
    pub max_words: usize,

    /// Repair triggers only below `min_words * soft_min_factor`.
    ///
    /// The factors differ per tier and are not derived from one rule.
    pub soft_min_factor: f64,

    /// Language guidance for the storyteller persona.
    pub story_style: &'static str,

    /// How long and how dense each part should be.
    pub length_style: &'static str,

    /// Language guidance for the reflective analysis persona.
    pub analysis_style: &'static str,

    /// Language guidance for the quiz author persona.
    pub quiz_style: &'static str,
}

impl AudienceProfile {
    /// The word count below which a part is sent back for repair.
    pub fn soft_min_words(&self) -> f64 {
        self.min_words as f64 * self.soft_min_factor
    }

    /// The length requirement sentence embedded in the system prompt.
    pub fn length_requirement(&self) -> String {
        format!(
            "Each part of the story must be at least {} and at most {} words long. {}",
            self.min_words, self.max_words, self.length_style
        )
    }

    /// Correction prompt for a part that is too short.
    pub fn too_short_prompt(&self) -> String {
        format!(
            "This part is too short for {}. Please revise it so that it is at least {} words long. \
             Keep the exact same JSON format.",
            self.label, self.min_words
        )
    }

    /// Correction prompt for a part that is too long.
    pub fn too_long_prompt(&self) -> String {
        format!(
            "This part is too long for {}. Please revise it so that it is at most {} words long. \
             Keep the exact same JSON format.",
            self.label, self.max_words
        )
    }
}

static PROFILES: [AudienceProfile; 3] = [
    AudienceProfile {
        label: "primary school pupils (ages 6-10)",
        min_words: 70,
        max_words: 90,
        soft_min_factor: 0.8,
        story_style: "Use simple language and short sentences, and explain difficult terms \
                      with everyday examples.",
        length_style: "Use simple sentences and short paragraphs so the text stays easy to follow.",
        analysis_style: "Use simple, vivid language, short sentences and examples taken from \
                         the children's everyday lives.",
        quiz_style: "The quiz is taken by primary school pupils aged 6 to 10. Use simple \
                     language with short, clear sentences.",
    },
    AudienceProfile {
        label: "lower secondary pupils (ages 11-14)",
        min_words: 120,
        max_words: 140,
        soft_min_factor: 0.7,
        story_style: "Use lively, understandable language and weave in moral conflicts that \
                      feel tangible.",
        length_style: "Use clear language and illustrate explanations with examples.",
        analysis_style: "Use a lively, understandable style with age-appropriate explanations \
                         and examples, and include moral conflicts this age group can relate to.",
        quiz_style: "The quiz is taken by lower secondary pupils aged 11 to 14. Use a suitably \
                     demanding vocabulary and sentence structure.",
    },
    AudienceProfile {
        label: "upper secondary pupils (ages 15-19)",
        min_words: 170,
        max_words: 190,
        soft_min_factor: 0.6,
        story_style: "Use more complex sentence structures and technical terms, and highlight \
                      the global context of sustainability.",
        length_style: "Use detailed descriptions, more complex sentences and in-depth explanations.",
        analysis_style: "Use a more demanding style with complex sentence structures and \
                         technical terms where useful, to shed light on deeper connections and \
                         global perspectives.",
        quiz_style: "The quiz is taken by upper secondary pupils aged 15 to 19. Use demanding \
                     language with complex sentence structures and technical terms.",
    },
];
