//! Cancellation mid-run: in-flight calls finish, nothing new starts

use std::time::Duration;

use user_time_collector::collector::{
    CollectionOrchestrator, CollectorConfig, ProgressEvent, ProgressSink,
};
use user_time_collector::shutdown::ShutdownCoordinator;
use user_time_collector::{FailureReason, TimeMetric};

use crate::support::fake_api::{january, record, FakeApi};

async fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_cancel_during_single_page_fetch_keeps_completed_call() {
    let shutdown = ShutdownCoordinator::shared();
    let api = FakeApi::new()
        .user("alice", "U1")
        .user("bob", "U2")
        .pages("U1", vec![vec![record("alice", "U1", 1, TimeMetric::LoggedIn, 7)]])
        .pages("U2", vec![vec![record("bob", "U2", 1, TimeMetric::LoggedIn, 9)]])
        .latency("U1", Duration::from_millis(20))
        .on_page({
            let shutdown = shutdown.clone();
            move |user_id, _| {
                if user_id == "U1" {
                    shutdown.request_shutdown();
                }
            }
        })
        .build();

    let orchestrator = CollectionOrchestrator::new(api.clone())
        .with_config(CollectorConfig::default().with_max_concurrent_requests(1))
        .with_shutdown(shutdown);
    let (sink, rx) = ProgressSink::channel();
    let result = orchestrator
        .collect(&january(&["alice", "bob"]), &sink)
        .await
        .unwrap();
    drop(sink);
    let events = drain(rx).await;

    // Alice's only call was already in flight and completed
    assert_eq!(result.succeeded, vec!["alice"]);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].login, "alice");

    // Bob never started
    assert_eq!(result.failures["bob"], FailureReason::Cancelled);
    assert!(api.page_calls().iter().all(|(id, _)| id == "U1"));

    assert!(result.cancelled);
    let cancelled_at = events.iter().position(|e| *e == ProgressEvent::Cancelled);
    let completed_at = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::Completed { .. }));
    assert!(cancelled_at.is_some());
    assert!(cancelled_at < completed_at);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_queued_on_limiter_skips_user() {
    let shutdown = ShutdownCoordinator::shared();
    let api = FakeApi::new()
        .user("alice", "U1")
        .user("bob", "U2")
        .pages("U1", vec![vec![record("alice", "U1", 1, TimeMetric::LoggedIn, 7)]])
        .pages("U2", vec![vec![record("bob", "U2", 1, TimeMetric::LoggedIn, 9)]])
        .latency("U1", Duration::from_millis(200))
        .build();

    // Bob is waiting for alice's slot when the run is cancelled
    let canceller = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.request_shutdown();
        }
    });

    let orchestrator = CollectionOrchestrator::new(api.clone())
        .with_config(CollectorConfig::default().with_max_concurrent_requests(1))
        .with_shutdown(shutdown);
    let result = orchestrator
        .collect(&january(&["alice", "bob"]), &ProgressSink::disabled())
        .await
        .unwrap();
    canceller.await.unwrap();

    assert!(result.cancelled);
    assert_eq!(result.succeeded, vec!["alice"]);
    assert_eq!(result.failures["bob"], FailureReason::Cancelled);
    assert_eq!(api.page_calls(), vec![("U1".to_string(), 0)]);
}

#[tokio::test]
async fn test_cancel_between_pages_drops_partial_user() {
    let shutdown = ShutdownCoordinator::shared();
    let api = FakeApi::new()
        .user("alice", "U1")
        .pages(
            "U1",
            vec![
                vec![record("alice", "U1", 1, TimeMetric::LoggedIn, 1)],
                vec![record("alice", "U1", 2, TimeMetric::LoggedIn, 2)],
            ],
        )
        .on_page({
            let shutdown = shutdown.clone();
            move |_, index| {
                if index == 0 {
                    shutdown.request_shutdown();
                }
            }
        })
        .build();

    let orchestrator = CollectionOrchestrator::new(api.clone()).with_shutdown(shutdown);
    let result = orchestrator
        .collect(&january(&["alice"]), &ProgressSink::disabled())
        .await
        .unwrap();

    assert!(result.cancelled);
    assert!(result.records.is_empty());
    assert_eq!(result.failures["alice"], FailureReason::Cancelled);
    assert_eq!(api.page_calls(), vec![("U1".to_string(), 0)]);
}

#[tokio::test]
async fn test_cancel_before_start_makes_no_calls() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let api = FakeApi::new().user("alice", "U1").build();

    let orchestrator = CollectionOrchestrator::new(api.clone()).with_shutdown(shutdown);
    let (sink, rx) = ProgressSink::channel();
    let result = orchestrator
        .collect(&january(&["alice", "bob"]), &sink)
        .await
        .unwrap();
    drop(sink);
    let events = drain(rx).await;

    assert!(result.cancelled);
    assert_eq!(result.failures.len(), 2);
    assert!(result
        .failures
        .values()
        .all(|reason| *reason == FailureReason::Cancelled));
    assert_eq!(api.exchanges(), 0);
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Completed {
            total_records: 0,
            total_failures: 2
        })
    );
}
