mod common;

use common::{Harness, events_until};
use examwarden::error::ExamError;
use examwarden::grading::SubmissionOutcome;
use examwarden::integrity::EnvironmentSignal;
use examwarden::observability::Event;
use examwarden::phase::AdvanceOutcome;
use examwarden::ports::SessionRegistry;
use examwarden::session::{SessionStatus, ViolationAction, ViolationKind};
use tokio_test::assert_ok;

#[tokio::test(start_paused = true)]
async fn log_policy_counts_acknowledged_violations() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;
    let session_id = handle.session_id().to_string();

    for expected in 1..=3 {
        let count = handle
            .report_violation(&session_id, ViolationKind::FocusLost, None)
            .await
            .unwrap();
        assert_eq!(count, expected);
        assert!(handle.acknowledge().await.unwrap());
    }

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.violation_count, 3);
    assert_eq!(snapshot.status, SessionStatus::InProgress);

    // Still answerable.
    handle.upsert_answer("q1", "B").await.unwrap();

    // Registry catches up in the background.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let record = h.registry.get_session(&session_id).await.unwrap();
    assert_eq!(record.violation_count, 3);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_signals_collapse_until_acknowledged() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;
    let session_id = handle.session_id().to_string();

    let first = handle
        .report_violation(&session_id, ViolationKind::FocusLost, None)
        .await
        .unwrap();
    let second = handle
        .report_violation(&session_id, ViolationKind::SurfaceHidden, None)
        .await
        .unwrap();
    assert_eq!((first, second), (1, 1));

    assert!(handle.acknowledge().await.unwrap());
    assert!(!handle.acknowledge().await.unwrap());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn environment_signals_are_counted() {
    let h = Harness::new("practice.yaml");
    let (handle, mut events) = h.join("cand-1").await;

    h.environment.publish(EnvironmentSignal::FocusGained);
    h.environment.publish(EnvironmentSignal::FullscreenExited);

    let seen = events_until(&mut events, |e| matches!(e, Event::ViolationWarning { .. })).await;
    assert!(matches!(
        seen.last(),
        Some(Event::ViolationWarning {
            kind: ViolationKind::FullscreenExit,
            violation_count: 1,
            ..
        })
    ));
    assert_eq!(handle.snapshot().await.unwrap().violation_count, 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disqualify_policy_ends_the_session() {
    let h = Harness::new("strict.yaml");
    let (handle, mut events) = h.join("cand-1").await;
    let session_id = handle.session_id().to_string();

    handle.upsert_answer("q1", "B").await.unwrap();
    let count = handle
        .report_violation(&session_id, ViolationKind::FullscreenExit, Some("esc".into()))
        .await
        .unwrap();
    assert_eq!(count, 1);

    let outcome = handle.settled().await.unwrap();
    assert!(matches!(outcome, SubmissionOutcome::Committed { .. }));

    let seen = events_until(&mut events, |e| matches!(e, Event::SubmissionSettled { .. })).await;
    assert!(seen.iter().any(|e| matches!(e, Event::Disqualified { violation_count: 1, .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, Event::SessionCompleted { disqualified: true, .. })));

    let record = h.registry.get_session(&session_id).await.unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    assert!(record.disqualified);
    assert_eq!(record.violation_count, 1);

    let err = handle.upsert_answer("q1", "C").await.unwrap_err();
    assert!(matches!(err, ExamError::Conflict { .. }), "{err:?}");
    let err = handle
        .report_violation(&session_id, ViolationKind::FocusLost, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExamError::PolicyViolation { violation_count: 1, .. }), "{err:?}");

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let violations = h.activity.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].resulting_action, ViolationAction::Disqualified);
    assert_eq!(violations[0].detail.as_deref(), Some("esc"));
}

#[tokio::test(start_paused = true)]
async fn violation_for_another_session_is_not_found() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;

    let err = handle
        .report_violation("someone-else", ViolationKind::Other, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExamError::NotFound { .. }), "{err:?}");
    assert_eq!(handle.snapshot().await.unwrap().violation_count, 0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn violation_after_normal_completion_conflicts() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;
    let session_id = handle.session_id().to_string();

    handle.submit(&session_id, vec![]).await.unwrap();
    let err = handle
        .report_violation(&session_id, ViolationKind::FocusLost, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExamError::Conflict { .. }), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn violation_racing_a_phase_change_lands_on_the_new_phase() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;
    let session_id = handle.session_id().to_string();
    let other = handle.clone();

    let (advanced, count) = tokio::join!(
        handle.finish(0, false),
        other.report_violation(&session_id, ViolationKind::FocusLost, None),
    );
    assert_eq!(
        advanced.unwrap(),
        AdvanceOutcome::Entered {
            index: 1,
            remaining_seconds: 5
        }
    );
    assert_eq!(count.unwrap(), 1);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.current_phase_index, 1);
    assert_eq!(snapshot.violation_count, 1);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let violations = h.activity.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].phase_index, 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn violation_during_final_submission_gets_the_settled_answer() {
    let h = Harness::new("practice.yaml");
    let (handle, _events) = h.join("cand-1").await;
    let session_id = handle.session_id().to_string();
    let other = handle.clone();

    let (submitted, during) = tokio::join!(
        handle.submit(&session_id, vec![]),
        other.report_violation(&session_id, ViolationKind::FocusLost, None),
    );
    assert_ok!(submitted);
    let err = during.unwrap_err();
    assert!(matches!(err, ExamError::Conflict { .. }), "{err:?}");

    let after = handle
        .report_violation(&session_id, ViolationKind::FocusLost, None)
        .await
        .unwrap_err();
    assert_eq!(after.code(), err.code());

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.violation_count, 0);
}
