//! End-to-end collection runs against the scripted backend

use std::sync::Arc;
use std::time::Duration;

use user_time_collector::api::auth::AuthError;
use user_time_collector::api::ApiError;
use user_time_collector::collector::{
    CollectError, CollectionOrchestrator, CollectorConfig, ProgressEvent, ProgressSink, RetryPolicy,
};
use user_time_collector::{CollectionRequest, CollectionResult, FailureReason, TimeMetric};

use crate::support::fake_api::{january, record, FakeApi};

fn fast_config() -> CollectorConfig {
    CollectorConfig::default()
        .with_retry_policy(RetryPolicy::new(4, Duration::from_millis(1), Duration::from_millis(4)))
}

async fn run(
    api: Arc<FakeApi>,
    request: &CollectionRequest,
) -> (Result<CollectionResult, CollectError>, Vec<ProgressEvent>) {
    let orchestrator = CollectionOrchestrator::new(api).with_config(fast_config());
    let (sink, mut rx) = ProgressSink::channel();
    let result = orchestrator.collect(request, &sink).await;
    drop(sink);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

#[tokio::test]
async fn test_alice_bob_ghost_scenario() {
    let alice_records = vec![
        record("alice", "U1", 1, TimeMetric::LoggedIn, 100),
        record("alice", "U1", 2, TimeMetric::LoggedIn, 200),
        record("alice", "U1", 3, TimeMetric::LoggedIn, 300),
    ];
    let api = FakeApi::new()
        .user("alice", "U1")
        .user("bob", "U2")
        .pages("U1", vec![alice_records.clone()])
        .pages("U2", vec![vec![]])
        .build();

    let (result, events) = run(api, &january(&["alice", "bob", "ghost"])).await;
    let result = result.unwrap();

    assert_eq!(result.records, alice_records);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures["ghost"], FailureReason::NotFound);
    assert_eq!(result.succeeded, vec!["alice", "bob"]);
    assert!(!result.cancelled);

    assert_eq!(events.first(), Some(&ProgressEvent::Started { total_logins: 3 }));
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Completed {
            total_records: 3,
            total_failures: 1
        })
    );
    assert!(events.contains(&ProgressEvent::UserFailed {
        login: "ghost".to_string(),
        reason: FailureReason::NotFound
    }));
    assert!(events.contains(&ProgressEvent::UserCompleted {
        login: "bob".to_string(),
        records: 0
    }));
}

#[tokio::test]
async fn test_every_login_accounted_for_exactly_once() {
    let api = FakeApi::new()
        .user("alice", "U1")
        .user("bob", "U2")
        .user("dave", "U4")
        .pages("U1", vec![vec![record("alice", "U1", 1, TimeMetric::OnQueue, 5)]])
        .failing_page("U2", 0, ApiError::from_status(400, "bad interval"))
        .build();

    let request = january(&["alice", "bob", "ghost", "dave", "alice"]);
    let (result, _) = run(api, &request).await;
    let result = result.unwrap();

    for login in request.unique_logins() {
        let succeeded = result.succeeded.contains(&login);
        let failed = result.failures.contains_key(&login);
        assert!(succeeded ^ failed, "{login} must be in exactly one set");
    }
    assert!(matches!(result.failures["bob"], FailureReason::FetchFailed(_)));
    assert_eq!(result.succeeded, vec!["alice", "dave"]);
}

#[tokio::test]
async fn test_duplicate_logins_collected_once() {
    let api = FakeApi::new()
        .user("alice", "U1")
        .pages("U1", vec![vec![record("alice", "U1", 1, TimeMetric::OnQueue, 5)]])
        .build();

    let (result, events) = run(api.clone(), &january(&["alice", "alice"])).await;

    assert_eq!(result.unwrap().records.len(), 1);
    assert_eq!(events[0], ProgressEvent::Started { total_logins: 1 });
    assert_eq!(api.page_calls().len(), 1);
}

#[tokio::test]
async fn test_pages_concatenate_in_order() {
    let a = vec![
        record("alice", "U1", 1, TimeMetric::LoggedIn, 1),
        record("alice", "U1", 1, TimeMetric::OnQueue, 2),
    ];
    let b = vec![record("alice", "U1", 2, TimeMetric::LoggedIn, 3)];
    let api = FakeApi::new()
        .user("alice", "U1")
        .pages("U1", vec![a.clone(), b.clone(), vec![]])
        .build();

    let (result, events) = run(api.clone(), &january(&["alice"])).await;

    assert_eq!(result.unwrap().records, [a, b].concat());
    assert_eq!(api.page_calls().len(), 3);
    let pages: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::FetchProgress { pages_fetched, .. } => Some(*pages_fetched),
            _ => None,
        })
        .collect();
    assert_eq!(pages, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_failure_on_second_page_discards_first() {
    let api = FakeApi::new()
        .user("alice", "U1")
        .user("bob", "U2")
        .pages(
            "U1",
            vec![
                vec![record("alice", "U1", 1, TimeMetric::LoggedIn, 1)],
                vec![record("alice", "U1", 2, TimeMetric::LoggedIn, 2)],
            ],
        )
        .failing_page("U1", 1, ApiError::Server(503))
        .pages("U2", vec![vec![record("bob", "U2", 1, TimeMetric::LoggedIn, 9)]])
        .build();

    let (result, _) = run(api.clone(), &january(&["alice", "bob"])).await;
    let result = result.unwrap();

    assert!(matches!(result.failures["alice"], FailureReason::FetchFailed(_)));
    assert_eq!(result.records_for("alice").count(), 0);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].login, "bob");

    // Page 1 once, page 2 for every retry attempt
    let alice_calls = api.page_calls().iter().filter(|(id, _)| id == "U1").count();
    assert_eq!(alice_calls, 1 + 4);
}

#[tokio::test]
async fn test_records_sorted_within_user() {
    let api = FakeApi::new()
        .user("alice", "U1")
        .pages(
            "U1",
            vec![
                vec![record("alice", "U1", 3, TimeMetric::LoggedIn, 3)],
                vec![
                    record("alice", "U1", 1, TimeMetric::LoggedIn, 1),
                    record("alice", "U1", 1, TimeMetric::OnQueue, 1),
                ],
            ],
        )
        .build();

    let (result, _) = run(api, &january(&["alice"])).await;
    let records = result.unwrap().records;

    let days: Vec<_> = records.iter().map(|r| r.interval_start).collect();
    let mut sorted = days.clone();
    sorted.sort();
    assert_eq!(days, sorted);
    // Stable: same-interval rows keep their page order
    assert_eq!(records[0].metric_name, TimeMetric::LoggedIn);
    assert_eq!(records[1].metric_name, TimeMetric::OnQueue);
}

#[tokio::test]
async fn test_invalid_credentials_abort_run() {
    let api = FakeApi::new()
        .user("alice", "U1")
        .token_failure(ApiError::Unauthorized(401))
        .build();

    let (result, events) = run(api.clone(), &january(&["alice"])).await;

    assert!(matches!(
        result,
        Err(CollectError::Auth(AuthError::InvalidCredentials(ApiError::Unauthorized(401))))
    ));
    assert_eq!(api.exchanges(), 1);
    assert_eq!(api.directory_calls(), 0);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Completed { .. })));
}

#[tokio::test]
async fn test_token_exchange_exhaustion_is_fatal() {
    let api = FakeApi::new()
        .user("alice", "U1")
        .token_failure(ApiError::Server(502))
        .build();

    let (result, _) = run(api.clone(), &january(&["alice"])).await;

    assert!(matches!(
        result,
        Err(CollectError::Auth(AuthError::Exhausted { attempts: 4, .. }))
    ));
    assert_eq!(api.exchanges(), 4);
}

#[tokio::test]
async fn test_invalid_request_rejected_before_network() {
    let api = FakeApi::new().user("alice", "U1").build();
    let mut request = january(&["alice"]);
    request.end_date = request.start_date.pred_opt().unwrap();

    let (result, events) = run(api.clone(), &request).await;

    assert!(matches!(result, Err(CollectError::Validation(_))));
    assert_eq!(api.exchanges(), 0);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_single_token_exchange_per_run() {
    let mut api = FakeApi::new();
    for n in 0..8 {
        let login = format!("user{n}");
        let id = format!("U{n}");
        api = api
            .user(&login, &id)
            .pages(&id, vec![vec![record(&login, &id, 1, TimeMetric::LoggedIn, n)]]);
    }
    let api = api.build();
    let logins: Vec<String> = (0..8).map(|n| format!("user{n}")).collect();
    let logins: Vec<&str> = logins.iter().map(String::as_str).collect();

    let (result, _) = run(api.clone(), &january(&logins)).await;

    assert_eq!(result.unwrap().records.len(), 8);
    assert_eq!(api.exchanges(), 1);
    assert_eq!(api.directory_calls(), 1);
}
