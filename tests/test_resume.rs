mod common;

use std::sync::Arc;

use common::{Harness, events_until};
use examwarden::assessment::ViolationPolicy;
use examwarden::error::ExamError;
use examwarden::grading::SubmissionOutcome;
use examwarden::observability::Event;
use examwarden::ports::{KvStore, SessionRegistry};
use examwarden::runtime::ExamRuntime;
use examwarden::session::{
    Answer, Score, SessionPatch, SessionSnapshot, SessionStatus, snapshot_key,
};

#[tokio::test(start_paused = true)]
async fn resume_restores_answers_and_phase() {
    let h = Harness::new("practice.yaml");
    let (first, _events) = h.join("cand-1").await;
    let session_id = first.session_id().to_string();

    first.upsert_answer("q1", "B").await.unwrap();
    first.toggle_mark("q2").await.unwrap();
    first.finish(0, false).await.unwrap();
    first.upsert_answer("q3", "A").await.unwrap();
    first.shutdown().await;
    drop(first);

    let (second, mut events) = h.resume(&session_id).await;
    let seen = events_until(&mut events, |e| matches!(e, Event::PhaseEntered { .. })).await;
    assert!(matches!(seen[0], Event::SessionStarted { resumed: true, .. }));
    assert!(matches!(seen.last(), Some(Event::PhaseEntered { phase_index: 1, .. })));

    let snapshot = second.snapshot().await.unwrap();
    assert_eq!(snapshot.session_id, session_id);
    assert_eq!(snapshot.current_phase_index, 1);
    assert_eq!(snapshot.answers["q1"].value, "B");
    assert!(snapshot.is_marked("q2"));
    assert_eq!(snapshot.answers["q3"].value, "A");

    let outcome = second.settled().await.unwrap();
    assert_eq!(
        outcome,
        SubmissionOutcome::Committed {
            score: Score { correct: 2, total: 4 }
        }
    );
}

#[tokio::test(start_paused = true)]
async fn registry_ahead_of_local_state_wins() {
    let h = Harness::new("practice.yaml");
    let record = h
        .registry
        .create_session("cand-1", "practice-1", ViolationPolicy::Log)
        .await
        .unwrap();
    h.registry
        .update_session(
            &record.session_id,
            SessionPatch {
                current_phase_index: Some(2),
                remaining_seconds: Some(1),
            },
        )
        .await
        .unwrap();

    let (handle, mut events) = h.resume(&record.session_id).await;
    let seen = events_until(&mut events, |e| matches!(e, Event::PhaseEntered { .. })).await;
    assert!(matches!(
        seen.last(),
        Some(Event::PhaseEntered {
            phase_index: 2,
            remaining_seconds: 2,
            ..
        })
    ));
    assert_eq!(handle.snapshot().await.unwrap().current_phase_index, 2);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn uncommitted_local_completion_is_resubmitted() {
    let h = Harness::new("practice.yaml");
    let record = h
        .registry
        .create_session("cand-1", "practice-1", ViolationPolicy::Log)
        .await
        .unwrap();

    let mut snapshot = SessionSnapshot::new(
        record.session_id.clone(),
        "cand-1",
        "practice-1",
        ViolationPolicy::Log,
    );
    snapshot.status = SessionStatus::Completed;
    snapshot.current_phase_index = 3;
    snapshot.answers.insert(
        "q4".to_string(),
        Answer {
            item_id: "q4".to_string(),
            value: "7/2".to_string(),
            marked_for_review: false,
        },
    );
    h.kv
        .set(
            &snapshot_key(&record.session_id),
            &serde_json::to_string(&snapshot).unwrap(),
        )
        .unwrap();

    let (handle, _events) = h.resume(&record.session_id).await;
    let outcome = handle.settled().await.unwrap();
    assert_eq!(
        outcome,
        SubmissionOutcome::Committed {
            score: Score { correct: 1, total: 4 }
        }
    );

    let stored = h.registry.get_session(&record.session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn resuming_a_committed_session_is_already_completed() {
    let h = Harness::new("practice.yaml");
    let (first, _events) = h.join("cand-1").await;
    let session_id = first.session_id().to_string();
    first.submit(&session_id, vec![("q1".into(), "B".into())]).await.unwrap();
    first.shutdown().await;

    let (second, _events) = h.resume(&session_id).await;
    assert_eq!(second.settled().await.unwrap(), SubmissionOutcome::AlreadyCompleted);
    assert_eq!(
        second.submit(&session_id, vec![]).await.unwrap(),
        SubmissionOutcome::AlreadyCompleted
    );
    let err = second.upsert_answer("q1", "C").await.unwrap_err();
    assert!(matches!(err, ExamError::Conflict { .. }), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn unreadable_snapshot_starts_fresh() {
    let h = Harness::new("practice.yaml");
    let record = h
        .registry
        .create_session("cand-1", "practice-1", ViolationPolicy::Log)
        .await
        .unwrap();
    h.kv.set(&snapshot_key(&record.session_id), "{not json").unwrap();

    let (handle, mut events) = h.resume(&record.session_id).await;
    let seen = events_until(&mut events, |e| matches!(e, Event::PhaseEntered { .. })).await;
    assert!(matches!(seen[0], Event::SessionStarted { resumed: false, .. }));

    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.answers.is_empty());
    assert_eq!(snapshot.current_phase_index, 0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_or_foreign_sessions_cannot_resume() {
    let h = Harness::new("practice.yaml");

    let err = ExamRuntime::resume(Arc::clone(&h.assessment), &h.settings, h.deps(), "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ExamError::NotFound { .. }), "{err:?}");

    let foreign = h
        .registry
        .create_session("cand-1", "other-test", ViolationPolicy::Log)
        .await
        .unwrap();
    let err = ExamRuntime::resume(
        Arc::clone(&h.assessment),
        &h.settings,
        h.deps(),
        &foreign.session_id,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExamError::Validation { .. }), "{err:?}");
}
