//! Conversation reconstruction.
//!
//! Nothing about a conversation is stored. Every operation rebuilds the
//! turns a live session would have accumulated from the persisted story,
//! replaying each part as the assistant reply that produced it.

use super::payload::{AnalysisContent, PartContent};
use crate::quiz::QuizRequest;
use crate::story::{Story, CHOICES_PER_PART};
use deepinfra::Message;
use thiserror::Error;

const STORYTELLER: &str = include_str!("prompts/storyteller.txt");
const PART_SCHEMA: &str = include_str!("prompts/part_schema.txt");
const FINAL_SCHEMA: &str = include_str!("prompts/final_schema.txt");
const FIRST_PART: &str = include_str!("prompts/first_part.txt");
const NEXT_PART: &str = include_str!("prompts/next_part.txt");
const FINAL_PART: &str = include_str!("prompts/final_part.txt");
const ANALYSIS: &str = include_str!("prompts/analysis.txt");
const ANALYSIS_REQUEST: &str = include_str!("prompts/analysis_request.txt");
const QUIZ: &str = include_str!("prompts/quiz.txt");

/// Persisted state that cannot be replayed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("story has parts but no title")]
    MissingTitle,

    #[error("part {part} has no valid chosen option (got {chosen:?})")]
    InvalidChoice { part: usize, chosen: Option<u8> },

    #[error("story has not been concluded")]
    MissingResult,
}

/// Rebuild the storytelling conversation: a system and a user turn, then an
/// assistant and a user turn per existing part.
///
/// The user turn after a part asks for the closing part once that part was
/// the last decision point, and for the next part otherwise.
pub fn rebuild_story(story: &Story) -> Result<Vec<Message>, ContextError> {
    let mut messages = Vec::with_capacity(2 + 2 * story.parts.len());
    messages.push(Message::system(story_system_prompt(story)));
    messages.push(Message::user(first_part_prompt(story.length)));

    if story.parts.is_empty() {
        return Ok(messages);
    }

    let title = story
        .title
        .as_deref()
        .ok_or(ContextError::MissingTitle)?;

    for (index, part) in story.parts.iter().enumerate() {
        let chosen = part
            .chosen_number
            .filter(|n| (1..=CHOICES_PER_PART as u8).contains(n))
            .and_then(|_| part.chosen_choice())
            .ok_or(ContextError::InvalidChoice {
                part: index + 1,
                chosen: part.chosen_number,
            })?;

        messages.push(Message::assistant(
            PartContent::from_part(title, part).to_json(),
        ));

        let mut prompt = format!("Option {} \"{}\" was chosen.\n", chosen.number, chosen.text);
        if index + 1 >= story.length {
            prompt.push_str(FINAL_PART);
            prompt.push('\n');
            prompt.push_str(FINAL_SCHEMA);
        } else {
            prompt.push_str(NEXT_PART);
            prompt.push('\n');
            prompt.push_str(PART_SCHEMA);
        }
        messages.push(Message::user(prompt));
    }

    Ok(messages)
}

/// Extend a storytelling conversation with the closing text and the switch
/// to the reflective analysis persona.
///
/// When the story already has a result, its analysis is replayed as well.
pub fn rebuild_result(story: &Story, mut messages: Vec<Message>, end: &str) -> Vec<Message> {
    let profile = story.target_group.profile();

    messages.push(Message::assistant(end));

    let mut system = String::from(
        "You take on the role of a teacher who reflects on the sustainability story the \
         participants have just lived through. Adapt your language, your examples and your \
         discussion questions to the target group.\n",
    );
    system.push_str(&format!("For {}: {}", profile.label, profile.analysis_style));
    system.push_str("\n\n");
    system.push_str(ANALYSIS);
    messages.push(Message::system(system));
    messages.push(Message::user(ANALYSIS_REQUEST));

    if let Some(result) = &story.result {
        messages.push(Message::assistant(
            AnalysisContent::from_result(result).to_json(),
        ));
    }

    messages
}

/// Extend a concluded conversation with the quiz author instructions.
pub fn rebuild_quiz(story: &Story, request: &QuizRequest, mut messages: Vec<Message>) -> Vec<Message> {
    let profile = story.target_group.profile();

    let mut system = format!(
        "You take on the role of a teacher with expertise in {} who writes a quiz about the \
         story the participants have just finished. ",
        story.topic
    );
    system.push_str(profile.quiz_style);
    system.push_str("\n\n[Question types]\nUse only the following question types:\n");
    for quiz_type in &request.types {
        system.push_str("- ");
        system.push_str(quiz_type.instruction());
        system.push('\n');
    }
    system.push_str(&format!(
        "\n[Number of questions]\nThe quiz must contain exactly {} questions.\n\n",
        request.number_questions
    ));
    system.push_str(QUIZ);

    messages.push(Message::system(system));
    messages.push(Message::user(format!(
        "Please create the quiz now, following the instructions and the JSON format exactly. \
         Every question must relate to the topic: {}",
        story.topic
    )));
    messages
}

/// The full quiz conversation: story, result and quiz instructions.
pub fn quiz_context(story: &Story, request: &QuizRequest) -> Result<Vec<Message>, ContextError> {
    let result = story.result.as_ref().ok_or(ContextError::MissingResult)?;
    let messages = rebuild_story(story)?;
    let messages = rebuild_result(story, messages, &result.text);
    Ok(rebuild_quiz(story, request, messages))
}

fn story_system_prompt(story: &Story) -> String {
    let profile = story.target_group.profile();

    let mut prompt = String::from(STORYTELLER);
    prompt.push_str("\n\n[Topic]\nThe story is about: ");
    prompt.push_str(&story.topic);
    prompt.push_str("\n\n[Target group]\n");
    prompt.push_str(&format!("The story is written for {}. {}", profile.label, profile.story_style));
    prompt.push_str("\n\n[Length]\n");
    prompt.push_str(&profile.length_requirement());
    prompt.push_str("\n\n[Output format]\nAnswer every request with a single JSON object of this shape:\n");
    prompt.push_str(PART_SCHEMA);
    prompt
}

fn first_part_prompt(length: usize) -> String {
    format!(
        "Please start the story. It will have {length} decision points in total.\n{FIRST_PART}\n{PART_SCHEMA}"
    )
}
