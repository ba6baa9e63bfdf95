//! Narrator behaviour against a scripted backend.
//!
//! No network access; every reply comes from `ScriptedBackend`, which also
//! records what the narrator sent.

use async_trait::async_trait;
use deepinfra::{Message, ResponseFormat, Role};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use story_core::testing::{
    analysis_reply, assert_balanced, assert_flags_derived, closing_reply, concluded_story,
    part_reply, part_reply_with_impacts, played_story, quiz_reply, sample_story, words,
};
use story_core::{
    AttemptError, Narrator, NarratorConfig, NarratorError, Operation, QuizRequest, QuizType,
    Sampling, ScriptedBackend, TargetGroup, TextBackend,
};
use tokio_util::sync::CancellationToken;

fn narrator(backend: &Arc<ScriptedBackend>) -> Narrator {
    Narrator::new(backend.clone())
}

fn service_unavailable() -> deepinfra::Error {
    deepinfra::Error::Api {
        status: 503,
        message: "overloaded".to_string(),
    }
}

#[track_caller]
fn assert_exhausted(err: &NarratorError, expected: Operation) {
    match err {
        NarratorError::Exhausted {
            operation,
            attempts,
            ..
        } => {
            assert_eq!(*operation, expected);
            assert_eq!(*attempts, 2);
        }
        other => panic!("Expected exhaustion, got {other:?}"),
    }
}

// ============================================================================
// Start
// ============================================================================

#[tokio::test]
async fn test_start_story_returns_title_and_part() {
    let backend = Arc::new(ScriptedBackend::new().with_reply(part_reply(80)));
    let story = sample_story(TargetGroup::PrimarySchool, 3);

    let opening = narrator(&backend).start_story(&story).await.unwrap();

    assert_eq!(opening.title, "The Dry Summer");
    assert_eq!(opening.part.choices.len(), 4);
    assert_balanced(&opening.part);

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[0].sampling, Sampling::new(0.8, 0.9));
    assert_eq!(requests[0].format, ResponseFormat::JsonObject);
}

#[tokio::test]
async fn test_start_story_rejects_started_story() {
    let backend = Arc::new(ScriptedBackend::new().with_reply(part_reply(80)));
    let story = played_story(TargetGroup::PrimarySchool, 3, 1);

    let err = narrator(&backend).start_story(&story).await.unwrap_err();

    assert!(matches!(err, NarratorError::InvalidState(_)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_start_story_requires_title_in_reply() {
    let untitled = serde_json::json!({
        "title": "",
        "intertitle": "Low Water",
        "story": words(80),
        "options": [
            { "impact": 0.5, "text": "A" },
            { "impact": -0.5, "text": "B" }
        ]
    })
    .to_string();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(untitled)
            .with_reply(part_reply(80)),
    );

    let opening = narrator(&backend)
        .start_story(&sample_story(TargetGroup::PrimarySchool, 3))
        .await
        .unwrap();

    assert_eq!(opening.title, "The Dry Summer");
    assert_eq!(backend.calls(), 2);
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_retry_resends_identical_turns() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_error(service_unavailable())
            .with_reply(part_reply(80)),
    );
    let story = played_story(TargetGroup::PrimarySchool, 3, 1);

    narrator(&backend).next_part(&story).await.unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages, requests[1].messages);
    assert_eq!(requests[0].sampling, requests[1].sampling);
}

#[tokio::test]
async fn test_never_makes_a_third_call() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_error(service_unavailable())
            .with_error(deepinfra::Error::EmptyContent)
            .with_reply(part_reply(80)),
    );
    let story = sample_story(TargetGroup::PrimarySchool, 3);

    let err = narrator(&backend).start_story(&story).await.unwrap_err();

    assert_exhausted(&err, Operation::StartStory);
    assert!(matches!(
        err,
        NarratorError::Exhausted {
            source: AttemptError::Client(deepinfra::Error::EmptyContent),
            ..
        }
    ));
    assert_eq!(backend.calls(), 2);
    assert_eq!(backend.remaining(), 1);
}

#[tokio::test]
async fn test_malformed_payload_is_retried() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply("Once upon a time there was a river.")
            .with_reply(part_reply(80)),
    );

    let opening = narrator(&backend)
        .start_story(&sample_story(TargetGroup::PrimarySchool, 2))
        .await
        .unwrap();

    assert_eq!(opening.part.intertitle, "Low Water");
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_unbalanced_impacts_are_retried() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(part_reply_with_impacts(80, [0.5, 0.5, 0.5, -0.5]))
            .with_reply(part_reply_with_impacts(80, [0.5, 0.5, 0.5, -0.5])),
    );
    let story = played_story(TargetGroup::PrimarySchool, 3, 1);

    let err = narrator(&backend).next_part(&story).await.unwrap_err();

    assert_exhausted(&err, Operation::NextPart);
    assert!(matches!(
        err,
        NarratorError::Exhausted {
            source: AttemptError::Payload(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_caller_error_from_client_is_not_retried() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_error(deepinfra::Error::InvalidRequest("No messages to send".into()))
            .with_reply(part_reply(80)),
    );

    let err = narrator(&backend)
        .start_story(&sample_story(TargetGroup::PrimarySchool, 3))
        .await
        .unwrap_err();

    assert!(matches!(err, NarratorError::InvalidRequest(_)));
    assert_eq!(backend.calls(), 1);
}

// ============================================================================
// Word-count repair
// ============================================================================

#[tokio::test]
async fn test_in_bounds_part_is_not_repaired() {
    // 65 words is under the minimum of 70 but above the soft minimum of 56.
    let backend = Arc::new(ScriptedBackend::new().with_reply(part_reply(65)));

    let opening = narrator(&backend)
        .start_story(&sample_story(TargetGroup::PrimarySchool, 3))
        .await
        .unwrap();

    assert_eq!(opening.part.text.split_whitespace().count(), 65);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_short_part_gets_exactly_one_repair() {
    // The revision is still too short and is accepted anyway.
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(part_reply(50))
            .with_reply(part_reply(40))
            .with_reply(part_reply(80)),
    );

    let opening = narrator(&backend)
        .start_story(&sample_story(TargetGroup::PrimarySchool, 3))
        .await
        .unwrap();

    assert_eq!(opening.part.text.split_whitespace().count(), 40);
    assert_eq!(backend.calls(), 2);

    let requests = backend.requests();
    let repair = &requests[1];
    assert_eq!(repair.sampling, Sampling::new(0.7, 0.7));
    assert_eq!(repair.messages.len(), requests[0].messages.len() + 2);
    assert_eq!(repair.messages[2].role, Role::Assistant);
    assert_eq!(repair.messages[2].content, part_reply(50));
    assert_eq!(repair.messages[3].role, Role::User);
    assert!(repair.messages[3].content.contains("at least 70 words"));
}

#[tokio::test]
async fn test_long_part_is_repaired() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(part_reply(200))
            .with_reply(part_reply(85)),
    );
    let story = played_story(TargetGroup::PrimarySchool, 3, 1);

    let part = narrator(&backend).next_part(&story).await.unwrap();

    assert_eq!(part.text.split_whitespace().count(), 85);
    let requests = backend.requests();
    assert!(requests[1]
        .messages
        .last()
        .is_some_and(|m| m.content.contains("at most 90 words")));
}

#[tokio::test]
async fn test_repair_turns_do_not_leak_into_retry() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(part_reply(20))
            .with_reply("not json")
            .with_reply(part_reply(80)),
    );

    narrator(&backend)
        .start_story(&sample_story(TargetGroup::PrimarySchool, 3))
        .await
        .unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].messages, requests[0].messages);
    assert_eq!(requests[2].sampling, Sampling::new(0.8, 0.9));
}

// ============================================================================
// Next part
// ============================================================================

#[tokio::test]
async fn test_next_part_replays_history() {
    let backend = Arc::new(ScriptedBackend::new().with_reply(part_reply(80)));
    let story = played_story(TargetGroup::PrimarySchool, 3, 2);

    narrator(&backend).next_part(&story).await.unwrap();

    let messages: Vec<Message> = backend.requests().remove(0).messages;
    assert_eq!(messages.len(), 2 + 2 * 2);
    let last = messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert!(last.content.starts_with("Option 1 \"Build a rain cistern\" was chosen."));
    assert!(last.content.contains("next part"));
}

#[tokio::test]
async fn test_next_part_state_errors_make_no_calls() {
    let backend = Arc::new(ScriptedBackend::new().with_reply(part_reply(80)));
    let narrator = narrator(&backend);

    let unstarted = sample_story(TargetGroup::PrimarySchool, 3);
    assert!(matches!(
        narrator.next_part(&unstarted).await,
        Err(NarratorError::InvalidState(_))
    ));

    let complete = played_story(TargetGroup::PrimarySchool, 2, 2);
    assert!(matches!(
        narrator.next_part(&complete).await,
        Err(NarratorError::InvalidState(_))
    ));

    let mut undecided = played_story(TargetGroup::PrimarySchool, 3, 2);
    undecided.parts[1].chosen_number = None;
    assert!(matches!(
        narrator.next_part(&undecided).await,
        Err(NarratorError::InvalidState(_))
    ));

    let mut out_of_range = played_story(TargetGroup::PrimarySchool, 3, 1);
    out_of_range.parts[0].choose(5);
    assert!(matches!(
        narrator.next_part(&out_of_range).await,
        Err(NarratorError::InvalidState(_))
    ));

    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_invalid_sampling_makes_no_calls() {
    let backend = Arc::new(ScriptedBackend::new().with_reply(part_reply(80)));
    let story = played_story(TargetGroup::PrimarySchool, 3, 1).with_sampling(1.5, 0.9);

    let err = narrator(&backend).next_part(&story).await.unwrap_err();

    assert!(matches!(err, NarratorError::InvalidRequest(_)));
    assert_eq!(backend.calls(), 0);
}

// ============================================================================
// Conclude
// ============================================================================

#[tokio::test]
async fn test_conclude_runs_closing_then_analysis() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(closing_reply(80))
            .with_reply(analysis_reply()),
    );
    let story = played_story(TargetGroup::PrimarySchool, 2, 2);

    let result = narrator(&backend).conclude(&story).await.unwrap();

    assert_eq!(result.text, words(80));
    assert_eq!(result.summary, "The town learned to share its water.");
    assert_eq!(result.negative_choices, vec!["Waiting too long at first"]);

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);

    let closing = &requests[0].messages;
    assert_eq!(closing.len(), 2 + 2 * 2);
    assert!(closing.last().unwrap().content.contains("closing part"));

    let analysis = &requests[1].messages;
    assert_eq!(analysis.len(), closing.len() + 3);
    assert_eq!(analysis[closing.len()].role, Role::Assistant);
    assert_eq!(analysis[closing.len()].content, words(80));
    assert_eq!(analysis[closing.len() + 1].role, Role::System);
    assert_eq!(analysis[closing.len() + 2].role, Role::User);
}

#[tokio::test]
async fn test_conclude_analysis_has_its_own_attempts() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_error(service_unavailable())
            .with_reply(closing_reply(80))
            .with_reply("{}")
            .with_reply(analysis_reply()),
    );
    let story = played_story(TargetGroup::PrimarySchool, 2, 2);

    narrator(&backend).conclude(&story).await.unwrap();

    assert_eq!(backend.calls(), 4);
}

#[tokio::test]
async fn test_conclude_stops_when_closing_fails() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_error(service_unavailable())
            .with_error(service_unavailable())
            .with_reply(analysis_reply()),
    );
    let story = played_story(TargetGroup::PrimarySchool, 2, 2);

    let err = narrator(&backend).conclude(&story).await.unwrap_err();

    assert_exhausted(&err, Operation::Conclude);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_short_closing_part_gets_one_repair() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(closing_reply(20))
            .with_reply(closing_reply(30))
            .with_reply(analysis_reply()),
    );
    let story = played_story(TargetGroup::PrimarySchool, 2, 2);

    let result = narrator(&backend).conclude(&story).await.unwrap();

    // The revision is still short and is accepted as the closing text.
    assert_eq!(result.text, words(30));
    assert_eq!(backend.calls(), 3);

    let requests = backend.requests();
    assert_eq!(requests[1].sampling, Sampling::new(0.7, 0.7));
    assert_eq!(requests[1].messages.len(), requests[0].messages.len() + 2);
    assert_eq!(requests[2].messages[requests[0].messages.len()].content, words(30));
}

#[tokio::test]
async fn test_conclude_state_errors() {
    let backend = Arc::new(ScriptedBackend::new());
    let narrator = narrator(&backend);

    let incomplete = played_story(TargetGroup::MiddleSchool, 3, 2);
    assert!(matches!(
        narrator.conclude(&incomplete).await,
        Err(NarratorError::InvalidState(_))
    ));

    let concluded = concluded_story(TargetGroup::MiddleSchool, 2);
    assert!(matches!(
        narrator.conclude(&concluded).await,
        Err(NarratorError::InvalidState(_))
    ));

    assert_eq!(backend.calls(), 0);
}

// ============================================================================
// Quiz
// ============================================================================

#[tokio::test]
async fn test_quiz_flags_are_derived_from_choices() {
    let backend = Arc::new(ScriptedBackend::new().with_reply(quiz_reply()));
    let story = concluded_story(TargetGroup::HighSchool, 2);
    let request = QuizRequest::new(vec![QuizType::SingleResponse, QuizType::MultipleResponse], 2);

    let quiz = narrator(&backend).generate_quiz(&story, &request).await.unwrap();

    assert_eq!(quiz.title, "Water Wise");
    assert_eq!(quiz.questions.len(), 2);
    assert!(!quiz.questions[0].is_multiple_response);
    assert!(quiz.questions[1].is_multiple_response);
    assert_flags_derived(&quiz);

    let requests = backend.requests();
    assert_eq!(requests[0].sampling, Sampling::new(0.8, 0.9));
    // story (2 + 2 * 2) + result (3 + replayed analysis) + quiz (2)
    assert_eq!(requests[0].messages.len(), 6 + 4 + 2);
    assert_eq!(requests[0].messages[6].content, story.result.unwrap().text);
}

#[tokio::test]
async fn test_quiz_is_retried_with_same_turns() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(r#"{"Title": "Empty", "Questions": []}"#)
            .with_reply(quiz_reply()),
    );
    let story = concluded_story(TargetGroup::PrimarySchool, 2);
    let request = QuizRequest::new(vec![QuizType::TrueFalse], 3);

    narrator(&backend).generate_quiz(&story, &request).await.unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages, requests[1].messages);
}

#[tokio::test]
async fn test_quiz_preconditions_make_no_calls() {
    let backend = Arc::new(ScriptedBackend::new().with_reply(quiz_reply()));
    let narrator = narrator(&backend);

    let unfinished = played_story(TargetGroup::PrimarySchool, 2, 2);
    let request = QuizRequest::new(vec![QuizType::TrueFalse], 5);
    assert!(matches!(
        narrator.generate_quiz(&unfinished, &request).await,
        Err(NarratorError::InvalidState(_))
    ));

    let story = concluded_story(TargetGroup::PrimarySchool, 2);
    assert!(matches!(
        narrator
            .generate_quiz(&story, &QuizRequest::new(vec![], 5))
            .await,
        Err(NarratorError::InvalidRequest(_))
    ));
    assert!(matches!(
        narrator
            .generate_quiz(&story, &QuizRequest::new(vec![QuizType::TrueFalse], 21))
            .await,
        Err(NarratorError::InvalidRequest(_))
    ));

    assert_eq!(backend.calls(), 0);
}

// ============================================================================
// Cancellation and deadlines
// ============================================================================

#[tokio::test]
async fn test_cancelled_narrator_makes_no_calls() {
    let backend = Arc::new(ScriptedBackend::new().with_reply(part_reply(80)));
    let token = CancellationToken::new();
    let narrator = narrator(&backend).with_cancellation(token.clone());
    token.cancel();

    let err = narrator
        .start_story(&sample_story(TargetGroup::PrimarySchool, 3))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        NarratorError::Cancelled {
            operation: Operation::StartStory
        }
    ));
    assert_eq!(backend.calls(), 0);
}

/// Never answers within any reasonable time.
struct StalledBackend;

#[async_trait]
impl TextBackend for StalledBackend {
    async fn generate(
        &self,
        _messages: &[Message],
        _sampling: Sampling,
        _format: ResponseFormat,
    ) -> Result<String, deepinfra::Error> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(part_reply(80))
    }
}

#[tokio::test(start_paused = true)]
async fn test_operation_timeout() {
    let narrator = Narrator::new(Arc::new(StalledBackend)).with_config(NarratorConfig {
        operation_timeout: Some(Duration::from_secs(30)),
        ..NarratorConfig::default()
    });

    let err = narrator
        .start_story(&sample_story(TargetGroup::PrimarySchool, 3))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        NarratorError::TimedOut {
            operation: Operation::StartStory,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_in_flight_attempt() {
    let token = CancellationToken::new();
    let narrator = Narrator::new(Arc::new(StalledBackend)).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });

    let err = narrator
        .start_story(&sample_story(TargetGroup::PrimarySchool, 3))
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, NarratorError::Cancelled { .. }));
}

/// Answers every call after twenty seconds: first the closing part, then
/// the analysis.
struct SlowBackend {
    calls: AtomicU32,
}

#[async_trait]
impl TextBackend for SlowBackend {
    async fn generate(
        &self,
        _messages: &[Message],
        _sampling: Sampling,
        _format: ResponseFormat,
    ) -> Result<String, deepinfra::Error> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(20)).await;
        Ok(if call == 0 {
            closing_reply(80)
        } else {
            analysis_reply()
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_operation_timeout_covers_both_conclude_phases() {
    // Each phase fits the deadline on its own; together they do not.
    let backend = Arc::new(SlowBackend {
        calls: AtomicU32::new(0),
    });
    let narrator = Narrator::new(backend.clone()).with_config(NarratorConfig {
        operation_timeout: Some(Duration::from_secs(30)),
        ..NarratorConfig::default()
    });
    let story = played_story(TargetGroup::PrimarySchool, 2, 2);

    let err = narrator.conclude(&story).await.unwrap_err();

    assert!(matches!(
        err,
        NarratorError::TimedOut {
            operation: Operation::Conclude,
            ..
        }
    ));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}
