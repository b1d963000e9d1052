mod common;

use std::time::Duration;

use common::{Harness, drain, entered_phases, events_until};
use examwarden::error::ExamError;
use examwarden::grading::SubmissionOutcome;
use examwarden::observability::Event;
use examwarden::phase::AdvanceOutcome;
use examwarden::ports::{ActivityEvent, SessionRegistry};
use examwarden::session::{Score, SessionStatus};
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// Sequencing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn phases_run_in_order_and_break_auto_advances() {
    let h = Harness::new("practice.yaml");
    let (handle, mut events) = h.join("cand-1").await;

    let outcome = handle.settled().await.expect("submission should settle");
    assert!(matches!(outcome, SubmissionOutcome::Committed { .. }));

    let seen = events_until(&mut events, |e| matches!(e, Event::SubmissionSettled { .. })).await;
    assert!(matches!(seen[0], Event::SessionStarted { resumed: false, .. }));
    assert_eq!(entered_phases(&seen), vec![0, 1, 2, 3]);

    // Phase 0 runs out, then phase 1 starts on a fresh clock.
    let expired_at = seen
        .iter()
        .position(|e| {
            matches!(
                e,
                Event::Tick {
                    phase_index: 0,
                    remaining_seconds: 0
                }
            )
        })
        .expect("phase 0 should tick down to zero");
    assert!(matches!(
        seen[expired_at + 1..]
            .iter()
            .find(|e| matches!(e, Event::PhaseEntered { .. })),
        Some(Event::PhaseEntered {
            phase_index: 1,
            remaining_seconds: 5,
            ..
        })
    ));

    // Ticks count down inside each phase and never run past zero.
    let math_ticks: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            Event::Tick {
                phase_index: 3,
                remaining_seconds,
            } => Some(*remaining_seconds),
            _ => None,
        })
        .collect();
    assert_eq!(math_ticks, vec![4, 3, 2, 1, 0]);

    let completed = seen
        .iter()
        .filter(|e| matches!(e, Event::SessionCompleted { disqualified: false, .. }))
        .count();
    assert_eq!(completed, 1);

    let record = h.registry.get_session(handle.session_id()).await.unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    assert_eq!(record.score, Some(Score { correct: 0, total: 4 }));
}

#[tokio::test(start_paused = true)]
async fn finishing_early_moves_to_the_next_phase() {
    let h = Harness::new("practice.yaml");
    let (handle, mut events) = h.join("cand-1").await;

    let outcome = handle.finish(0, false).await.unwrap();
    assert_eq!(
        outcome,
        AdvanceOutcome::Entered {
            index: 1,
            remaining_seconds: 5
        }
    );

    // A second finish for the same phase is stale.
    assert_eq!(handle.finish(0, false).await.unwrap(), AdvanceOutcome::Ignored);

    handle.finish(1, false).await.unwrap();
    let err = handle.finish(2, false).await.unwrap_err();
    assert!(matches!(err, ExamError::Validation { .. }), "{err:?}");

    // An operator may skip a break.
    let skipped = handle.finish(2, true).await.unwrap();
    assert!(matches!(skipped, AdvanceOutcome::Entered { index: 3, .. }));

    let seen = drain(&mut events);
    assert_eq!(entered_phases(&seen), vec![0, 1, 2, 3]);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn finishing_the_last_scored_phase_submits() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;

    handle.finish(0, false).await.unwrap();
    handle.finish(1, false).await.unwrap();
    handle.finish(2, true).await.unwrap();
    let outcome = handle.finish(3, false).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Submitting { from: 3 });

    assert_ok!(handle.settled().await);
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn remaining_time_is_persisted_each_tick() {
    let h = Harness::new("practice.yaml");
    let (handle, mut events) = h.join("cand-1").await;

    events_until(&mut events, |e| {
        matches!(e, Event::Tick { phase_index: 0, remaining_seconds: 3 })
    })
    .await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.current_phase_index, 0);
    assert_eq!(snapshot.remaining_seconds, 3);
    handle.shutdown().await;
}

// ============================================================================
// Answers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn answers_are_graded_when_time_runs_out() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;

    handle.upsert_answer("q1", "A").await.unwrap();
    handle.upsert_answer("q1", "B").await.unwrap();
    handle.upsert_answer("q2", "D").await.unwrap();
    handle.finish(0, false).await.unwrap();
    handle.upsert_answer("q3", " A ").await.unwrap();

    let outcome = handle.settled().await.unwrap();
    assert_eq!(
        outcome,
        SubmissionOutcome::Committed {
            score: Score { correct: 2, total: 4 }
        }
    );

    let record = h.registry.get_session(handle.session_id()).await.unwrap();
    let q1 = record
        .graded_answers
        .iter()
        .find(|a| a.item_id == "q1")
        .unwrap();
    assert_eq!(q1.value, "B");
    assert!(q1.correct);
}

#[tokio::test(start_paused = true)]
async fn items_outside_the_running_phase_are_rejected() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;

    let err = handle.upsert_answer("q3", "A").await.unwrap_err();
    assert!(matches!(err, ExamError::Validation { .. }), "{err:?}");

    let err = handle.upsert_answer("q99", "A").await.unwrap_err();
    assert!(matches!(err, ExamError::NotFound { .. }), "{err:?}");

    assert_err!(handle.upsert_answer("q1", &"x".repeat(100_000)).await);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn marks_scratch_and_cursor_are_kept() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;

    assert!(handle.toggle_mark("q2").await.unwrap());
    handle.set_scratch("q2", "eliminate A and D").await.unwrap();
    handle.select_item(Some("q2")).await.unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.is_marked("q2"));
    assert_eq!(snapshot.scratch.get("q2").map(String::as_str), Some("eliminate A and D"));
    assert_eq!(snapshot.active_item.as_deref(), Some("q2"));

    assert!(!handle.toggle_mark("q2").await.unwrap());
    handle.shutdown().await;
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test(start_paused = true)]
async fn first_submission_wins() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;
    let session_id = handle.session_id().to_string();
    let other = handle.clone();

    let (first, second) = tokio::join!(
        handle.submit(&session_id, vec![("q1".into(), "B".into())]),
        other.submit(&session_id, vec![("q1".into(), "C".into())]),
    );
    assert_eq!(
        first.unwrap(),
        SubmissionOutcome::Committed {
            score: Score { correct: 1, total: 4 }
        }
    );
    assert_eq!(second.unwrap(), SubmissionOutcome::AlreadyCompleted);

    let record = h.registry.get_session(&session_id).await.unwrap();
    assert_eq!(record.graded_answers.iter().find(|a| a.item_id == "q1").unwrap().value, "B");

    let err = handle.upsert_answer("q1", "C").await.unwrap_err();
    assert!(matches!(err, ExamError::Conflict { .. }), "{err:?}");
    let err = handle.finish(0, false).await.unwrap_err();
    assert!(matches!(err, ExamError::Conflict { .. }), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn rejected_submit_leaves_answers_untouched() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;
    let session_id = handle.session_id().to_string();
    handle.upsert_answer("q1", "A").await.unwrap();

    let err = handle
        .submit(
            &session_id,
            vec![("q1".into(), "B".into()), ("q3".into(), "A".into())],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExamError::Validation { .. }), "{err:?}");

    let err = handle
        .submit(
            &session_id,
            vec![("q2".into(), "C".into()), ("q99".into(), "A".into())],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExamError::NotFound { .. }), "{err:?}");

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::InProgress);
    assert_eq!(snapshot.answers["q1"].value, "A");
    assert!(!snapshot.answers.contains_key("q2"));

    // Persisted state agrees with the in-memory view.
    handle.shutdown().await;
    let (resumed, _events) = h.resume(&session_id).await;
    let snapshot = resumed.snapshot().await.unwrap();
    assert_eq!(snapshot.answers["q1"].value, "A");
    assert!(!snapshot.answers.contains_key("q2"));
    resumed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn submit_for_another_session_is_not_found() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;

    let err = handle.submit("someone-else", vec![]).await.unwrap_err();
    assert!(matches!(err, ExamError::NotFound { .. }), "{err:?}");
    assert_eq!(handle.snapshot().await.unwrap().status, SessionStatus::InProgress);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn activity_log_sees_the_whole_attempt() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;
    handle.submit(handle.session_id(), vec![]).await.unwrap();
    handle.shutdown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let log = h.activity.events();
    assert!(matches!(log.first(), Some(ActivityEvent::Joined { resumed: false, .. })));
    assert!(log
        .iter()
        .any(|e| matches!(e, ActivityEvent::PhaseEntered { phase_index: 0, .. })));
    assert!(log
        .iter()
        .any(|e| matches!(e, ActivityEvent::Completed { disqualified: false, .. })));
}

// ============================================================================
// Liveness and lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn heartbeats_stop_counting_after_completion() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;
    let session_id = handle.session_id().to_string();

    assert!(handle.heartbeat(&session_id).await.unwrap());
    handle.submit(&session_id, vec![]).await.unwrap();
    assert!(!handle.heartbeat(&session_id).await.unwrap());
    assert!(matches!(
        handle.heartbeat("nope").await,
        Err(ExamError::NotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn calls_after_shutdown_conflict() {
    let h = Harness::new("practice.yaml");
    let (handle, mut events) = h.join("cand-1").await;

    handle.shutdown().await;
    events_until(&mut events, |e| matches!(e, Event::SessionStopped { .. })).await;

    let err = handle.upsert_answer("q1", "B").await.unwrap_err();
    assert!(matches!(err, ExamError::Conflict { .. }), "{err:?}");
    assert!(matches!(handle.settled().await, Err(ExamError::Conflict { .. })));
}

#[tokio::test(start_paused = true)]
async fn blank_candidate_cannot_join() {
    let h = Harness::new("practice.yaml");
    let err = examwarden::runtime::ExamRuntime::join(
        std::sync::Arc::clone(&h.assessment),
        &h.settings,
        h.deps(),
        "  ",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExamError::Validation { .. }));
}
