//! Wire-level tests of the HTTPS transport against a mock server

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{basic_auth, bearer_token, body_partial_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use user_time_collector::api::genesys_http::GenesysClient;
use user_time_collector::api::{ApiError, TimeApi, TimeQuery};
use user_time_collector::collector::{CollectionOrchestrator, CollectorConfig, ProgressSink, RetryPolicy};
use user_time_collector::{CollectionRequest, Credentials, ResolvedUser, TimeMetric};

fn client(server: &MockServer) -> GenesysClient {
    GenesysClient::with_base_urls(
        Credentials::new("example.test", "client-id", "client-secret"),
        &CollectorConfig::default(),
        server.uri(),
        server.uri(),
    )
    .unwrap()
}

fn query(cursor: Option<&str>) -> TimeQuery {
    TimeQuery {
        user: ResolvedUser::new("alice", "U1"),
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        cursor: cursor.map(str::to_string),
    }
}

fn aggregates_body(interval: &str) -> serde_json::Value {
    json!({
        "results": [{
            "group": {"userId": "U1"},
            "data": [{
                "interval": interval,
                "metrics": [
                    {"metric": "tSystemPresence", "qualifier": "ON_QUEUE", "stats": {"sum": 3600000}},
                    {"metric": "tSystemPresence", "qualifier": "MEETING", "stats": {"sum": 600000}},
                    {"metric": "tAgentRoutingStatus", "qualifier": "INTERACTING", "stats": {"sum": 1200000}}
                ]
            }]
        }]
    })
}

#[tokio::test]
async fn test_token_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(basic_auth("client-id", "client-secret"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "token_type": "bearer",
            "expires_in": 86399
        })))
        .expect(1)
        .mount(&server)
        .await;

    let grant = client(&server).exchange_token().await.unwrap();
    assert_eq!(grant.access_token, "tok-1");
    assert_eq!(grant.expires_in, Duration::from_secs(86399));
}

#[tokio::test]
async fn test_status_classification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"invalid_client\"}"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users"))
        .and(query_param("pageNumber", "1"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users"))
        .and(query_param("pageNumber", "2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/analytics/users/aggregates/query"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad interval"))
        .mount(&server)
        .await;

    let client = client(&server);
    assert_eq!(client.exchange_token().await, Err(ApiError::Unauthorized(401)));
    assert_eq!(client.list_users("t", 1).await, Err(ApiError::RateLimited));
    assert_eq!(client.list_users("t", 2).await, Err(ApiError::Server(503)));
    assert_eq!(
        client.fetch_time_page("t", &query(None)).await,
        Err(ApiError::Client {
            status: 400,
            body: "bad interval".to_string()
        })
    );
}

#[tokio::test]
async fn test_directory_page_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users"))
        .and(bearer_token("tok-1"))
        .and(query_param("pageSize", "500"))
        .and(query_param("pageNumber", "2"))
        .and(query_param("state", "any"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entities": [{"id": "U1", "email": "alice@example.com", "name": "Alice"}],
            "pageSize": 500,
            "pageNumber": 2,
            "pageCount": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = client(&server).list_users("tok-1", 2).await.unwrap();
    assert_eq!(page.page_count, Some(2));
    assert_eq!(page.entities[0].id, "U1");
}

#[tokio::test]
async fn test_time_page_follows_days() {
    let server = MockServer::start().await;
    let day_one = "2024-01-01T03:00:00.000Z/2024-01-02T03:00:00.000Z";
    let day_two = "2024-01-02T03:00:00.000Z/2024-01-03T03:00:00.000Z";
    for interval in [day_one, day_two] {
        Mock::given(method("POST"))
            .and(path("/api/v2/analytics/users/aggregates/query"))
            .and(bearer_token("tok-1"))
            .and(body_partial_json(json!({
                "interval": interval,
                "groupBy": ["userId"],
                "filter": {"type": "or", "predicates": [{"dimension": "userId", "value": "U1"}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(aggregates_body(interval)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = client(&server);
    let first = client.fetch_time_page("tok-1", &query(None)).await.unwrap();
    assert_eq!(first.records.len(), TimeMetric::ALL.len());
    assert_eq!(first.next_cursor.as_deref(), Some("2024-01-02"));

    let logged_in = first
        .records
        .iter()
        .find(|r| r.metric_name == TimeMetric::LoggedIn)
        .unwrap();
    assert_eq!(logged_in.metric_value, Decimal::from(4_200_000));

    let second = client
        .fetch_time_page("tok-1", &query(Some("2024-01-02")))
        .await
        .unwrap();
    assert_eq!(second.records.len(), TimeMetric::ALL.len());
    assert_eq!(second.next_cursor, None);
}

#[tokio::test]
async fn test_orchestrator_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entities": [{"id": "U1", "email": "Alice@example.com"}],
            "pageCount": 1
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/analytics/users/aggregates/query"))
        .and(body_partial_json(json!({"interval": "2024-01-01T03:00:00.000Z/2024-01-02T03:00:00.000Z"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(aggregates_body(
            "2024-01-01T03:00:00.000Z/2024-01-02T03:00:00.000Z",
        )))
        .mount(&server)
        .await;
    // Day two: no activity
    Mock::given(method("POST"))
        .and(path("/api/v2/analytics/users/aggregates/query"))
        .and(body_partial_json(json!({"interval": "2024-01-02T03:00:00.000Z/2024-01-03T03:00:00.000Z"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .mount(&server)
        .await;

    let config = CollectorConfig::default()
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)));
    let client = GenesysClient::with_base_urls(
        Credentials::new("example.test", "id", "secret"),
        &config,
        server.uri(),
        server.uri(),
    )
    .unwrap();
    let orchestrator = CollectionOrchestrator::new(Arc::new(client)).with_config(config);

    let request = CollectionRequest::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        vec!["alice".to_string(), "ghost".to_string()],
    );
    let result = orchestrator
        .collect(&request, &ProgressSink::disabled())
        .await
        .unwrap();

    assert_eq!(result.records.len(), TimeMetric::ALL.len());
    assert!(result.records.iter().all(|r| r.login == "alice" && r.user_id == "U1"));
    assert_eq!(result.succeeded, vec!["alice"]);
    assert_eq!(result.failures.len(), 1);
}
