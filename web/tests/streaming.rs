//! Controller tests against the in-memory repository.
//!
//! These drive the full router: admission, cursor negotiation, streaming
//! and cleanup, with the log store replaced by scripted doubles.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use eventgate_core::consumer::ConsumedEvent;
use eventgate_core::cursor::TopicPosition;
use eventgate_core::event_type::EventType;
use eventgate_testing::{InMemoryTopicRepository, StaticEventTypes};
use eventgate_web::{AppState, Blacklist, ConsumerLimiter, FeatureFlags};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn repository() -> InMemoryTopicRepository {
    InMemoryTopicRepository::new()
        .with_partition("T", 0, 6, 100)
        .with_partition("T", 1, 0, 200)
}

fn app_state(repository: InMemoryTopicRepository) -> AppState {
    let registry = StaticEventTypes::new()
        .with(EventType::new("e", "T"))
        .with(
            EventType::new("guarded", "T")
                .with_read_scopes(vec!["events.read".to_string()]),
        );
    AppState::new(Arc::new(repository), Arc::new(registry))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Client-Id", "app-1")
        .body(Body::empty())
        .expect("valid request")
}

async fn body_lines(response: axum::response::Response) -> Vec<String> {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("collect body");
    String::from_utf8(bytes.to_vec())
        .expect("utf8 body")
        .lines()
        .map(ToString::to_string)
        .collect()
}

#[tokio::test]
async fn streaming_without_cursors_starts_from_newest() {
    let app = eventgate_web::router(app_state(repository()));

    let response = app
        .oneshot(get(
            "/event-types/e/events?batch_flush_timeout=0&stream_keep_alive_limit=1",
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/x-json-stream")
    );

    // The keep-alive frames carry the negotiated start cursors: the
    // next-to-be-written offset of each partition.
    let lines = body_lines(response).await;
    assert_eq!(
        lines,
        vec![
            "{\"cursor\":{\"partition\":\"0\",\"offset\":\"100\"}}",
            "{\"cursor\":{\"partition\":\"1\",\"offset\":\"200\"}}",
        ]
    );
}

#[tokio::test]
async fn streamed_events_arrive_in_framed_batches() {
    let repository = repository().with_scripted_events(vec![
        ConsumedEvent::new("{\"n\":1}", TopicPosition::new("T", "0", Some("100"))),
        ConsumedEvent::new("{\"n\":2}", TopicPosition::new("T", "0", Some("101"))),
    ]);
    let app = eventgate_web::router(app_state(repository));

    let response = app
        .oneshot(get(
            "/event-types/e/events?stream_limit=2&batch_limit=2&batch_flush_timeout=5",
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let lines = body_lines(response).await;
    assert_eq!(
        lines,
        vec![
            "{\"cursor\":{\"partition\":\"0\",\"offset\":\"101\"},\"events\":[{\"n\":1},{\"n\":2}]}",
        ]
    );
}

#[tokio::test]
async fn begin_cursor_starts_before_the_oldest_record() {
    let app = eventgate_web::router(app_state(repository()));

    let request = Request::builder()
        .uri("/event-types/e/events?batch_flush_timeout=0&stream_keep_alive_limit=1")
        .header("X-Client-Id", "app-1")
        .header("X-nakadi-cursors", "[{\"partition\":\"0\",\"offset\":\"BEGIN\"}]")
        .body(Body::empty())
        .expect("valid request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let lines = body_lines(response).await;
    // Oldest retained offset is 6, so the before-oldest cursor is 5.
    assert_eq!(
        lines,
        vec!["{\"cursor\":{\"partition\":\"0\",\"offset\":\"5\"}}"]
    );
}

#[tokio::test]
async fn cursor_beyond_newest_is_precondition_failed() {
    let app = eventgate_web::router(app_state(repository()));

    let request = Request::builder()
        .uri("/event-types/e/events")
        .header("X-Client-Id", "app-1")
        .header(
            "X-nakadi-cursors",
            "[{\"partition\":\"0\",\"offset\":\"999999\"}]",
        )
        .body(Body::empty())
        .expect("valid request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/problem+json")
    );
    let lines = body_lines(response).await;
    assert!(lines[0].contains("cursor UNAVAILABLE"));
}

#[tokio::test]
async fn tail_cursor_is_accepted() {
    // A cursor equal to the newest position waits for future records.
    let app = eventgate_web::router(app_state(repository()));

    let request = Request::builder()
        .uri("/event-types/e/events?batch_flush_timeout=0&stream_keep_alive_limit=1")
        .header("X-Client-Id", "app-1")
        .header("X-nakadi-cursors", "[{\"partition\":\"0\",\"offset\":\"100\"}]")
        .body(Body::empty())
        .expect("valid request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unparseable_cursors_header_is_bad_request() {
    let app = eventgate_web::router(app_state(repository()));

    let request = Request::builder()
        .uri("/event-types/e/events")
        .header("X-Client-Id", "app-1")
        .header("X-nakadi-cursors", "not json at all")
        .body(Body::empty())
        .expect("valid request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let lines = body_lines(response).await;
    assert!(lines[0].contains("incorrect syntax of X-nakadi-cursors header"));
}

#[tokio::test]
async fn unknown_event_type_is_not_found() {
    let app = eventgate_web::router(app_state(repository()));

    let response = app
        .oneshot(get("/event-types/nope/events"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let lines = body_lines(response).await;
    assert!(lines[0].contains("topic not found"));
}

#[tokio::test]
async fn missing_backing_topic_is_an_internal_error() {
    // Event type resolves, but the log store has no such topic.
    let state = app_state(InMemoryTopicRepository::new().with_partition("other", 0, 0, 1));
    let app = eventgate_web::router(state);

    let response = app
        .oneshot(get("/event-types/e/events"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn blacklisted_client_is_forbidden() {
    let state = app_state(repository())
        .with_blacklist(Blacklist::new().with_client("app-1"));
    let app = eventgate_web::router(state);

    let response = app
        .oneshot(get("/event-types/e/events"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_read_scope_is_forbidden() {
    let app = eventgate_web::router(app_state(repository()));

    let response = app
        .oneshot(get("/event-types/guarded/events"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn granted_scope_opens_the_guarded_stream() {
    let app = eventgate_web::router(app_state(repository()));

    let request = Request::builder()
        .uri("/event-types/guarded/events?batch_flush_timeout=0&stream_keep_alive_limit=1")
        .header("X-Client-Id", "app-1")
        .header("X-Client-Scopes", "events.read")
        .body(Body::empty())
        .expect("valid request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unavailable_store_maps_to_service_unavailable() {
    let state = app_state(repository().unavailable());
    let app = eventgate_web::router(state);

    let response = app
        .oneshot(get("/event-types/e/events"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn slots_are_released_after_the_stream_closes() {
    let limiter = Arc::new(ConsumerLimiter::new(1));
    let state = app_state(repository())
        .with_limiter(limiter.clone())
        .with_features(FeatureFlags {
            limit_consumers_number: true,
        });
    let app = eventgate_web::router(state);

    let response = app
        .oneshot(get(
            "/event-types/e/events?batch_flush_timeout=0&stream_keep_alive_limit=1",
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let _ = body_lines(response).await;

    // Cleanup runs in the stream task right after the body completes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(limiter.held("app-1", "e", "0"), 0);
    assert_eq!(limiter.held("app-1", "e", "1"), 0);
}

#[tokio::test]
async fn exhausted_slots_deny_admission_and_release_nothing() {
    let limiter = Arc::new(ConsumerLimiter::new(1));
    let slots = limiter
        .acquire("app-1", "e", &["0".to_string(), "1".to_string()])
        .expect("pre-acquire");
    let state = app_state(repository())
        .with_limiter(limiter.clone())
        .with_features(FeatureFlags {
            limit_consumers_number: true,
        });
    let app = eventgate_web::router(state);

    let response = app
        .oneshot(get("/event-types/e/events"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let lines = body_lines(response).await;
    assert!(lines[0].contains("no free connection slots"));

    // The pre-acquired reservation is untouched.
    assert_eq!(limiter.held("app-1", "e", "0"), 1);
    limiter.release(&slots);
}

#[tokio::test]
async fn dropped_response_releases_the_slots() {
    let limiter = Arc::new(ConsumerLimiter::new(1));
    let state = app_state(repository())
        .with_limiter(limiter.clone())
        .with_features(FeatureFlags {
            limit_consumers_number: true,
        });
    let app = eventgate_web::router(state);

    let response = app
        .oneshot(get("/event-types/e/events?batch_flush_timeout=0"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    // Client goes away without reading a byte.
    drop(response);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(limiter.held("app-1", "e", "0"), 0);
    assert_eq!(limiter.held("app-1", "e", "1"), 0);
}
