//! Streaming controller: `GET /event-types/{name}/events`.
//!
//! Admits the client, negotiates the starting cursors, reserves connection
//! slots, then hands a consumer to the [`EventStream`] writer and streams
//! framed batches until the client disconnects or a limit is met. Whatever
//! happens, slots are released, the consumers gauge is decremented and the
//! connection flag is cleared.

use crate::error::Problem;
use crate::extractors::Client;
use crate::state::AppState;
use crate::stream::{EventStream, EventStreamConfig};
use crate::watcher::{self, ConnectionReady};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use eventgate_core::cursor::{TopicPosition, is_begin};
use eventgate_core::repository::TopicRepository;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Header carrying the client's starting cursors.
pub const CURSORS_HEADER: &str = "X-nakadi-cursors";

/// Media type of the streamed batch frames.
pub const X_JSON_STREAM: &str = "application/x-json-stream";

/// Optional stream parameters.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Events per partition batch.
    pub batch_limit: Option<usize>,
    /// Total events before the stream closes.
    pub stream_limit: Option<usize>,
    /// Partial-batch flush window, seconds.
    pub batch_flush_timeout: Option<u64>,
    /// Wall-clock bound on the stream, seconds.
    pub stream_timeout: Option<u64>,
    /// Consecutive keep-alive rounds before the stream closes.
    pub stream_keep_alive_limit: Option<usize>,
}

/// One entry of the cursors header.
#[derive(Debug, Deserialize)]
struct CursorView {
    partition: Option<String>,
    offset: Option<String>,
}

/// Handle `GET /event-types/{name}/events`.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<StreamQuery>,
    client: Client,
    headers: HeaderMap,
) -> Response {
    match serve(state, name, query, client, &headers).await {
        Ok(response) => response,
        Err(problem) => problem.into_response(),
    }
}

async fn serve(
    state: AppState,
    name: String,
    query: StreamQuery,
    client: Client,
    headers: &HeaderMap,
) -> Result<Response, Problem> {
    if state.blacklist.is_blocked(&client.client_id, &name) {
        return Err(Problem::forbidden(format!(
            "consumption is blocked for client '{}'",
            client.client_id
        )));
    }

    let connection = ConnectionReady::new();

    let event_type = state
        .event_types
        .get(&name)
        .ok_or_else(|| Problem::not_found("topic not found"))?;
    if !client.may_read(&event_type.read_scopes) {
        return Err(Problem::forbidden(format!(
            "client '{}' does not have any of the read scopes of '{name}'",
            client.client_id
        )));
    }

    let exists = state
        .repository
        .topic_exists(&event_type.topic)
        .await
        .map_err(Problem::from)?;
    if !exists {
        // The event type names a topic the log store does not have; the
        // installation is broken, not the request.
        return Err(Problem::internal(format!(
            "topic '{}' backing event type '{name}' does not exist",
            event_type.topic
        )));
    }

    let config = stream_config(&query, &state.stream_defaults);
    let header = cursors_header(headers)?;
    let start_cursors =
        streaming_start(state.repository.as_ref(), &event_type.topic, header).await?;

    let slots = if state.features.limit_consumers_number {
        let partitions: Vec<String> = start_cursors
            .iter()
            .map(|cursor| cursor.partition.clone())
            .collect();
        state
            .limiter
            .acquire(&client.client_id, &name, &partitions)
            .map_err(Problem::from)?
    } else {
        Vec::new()
    };

    let consumer = match state.repository.create_event_consumer(&start_cursors).await {
        Ok(consumer) => consumer,
        Err(error) => {
            state.limiter.release(&slots);
            return Err(Problem::from(error));
        }
    };

    metrics::gauge!("consumers", "event_type" => name.clone()).increment(1.0);
    tracing::info!(
        event_type = %name,
        client = %client.client_id,
        partitions = start_cursors.len(),
        "starting event stream"
    );

    let (tx, mut rx) = mpsc::channel::<String>(8);
    let _watcher = watcher::watch_disconnect(tx.clone(), connection.clone());

    let stream = EventStream::new(consumer, config, start_cursors, tx);
    let limiter = state.limiter.clone();
    let flag = connection.clone();
    let event_type_name = name.clone();
    tokio::spawn(async move {
        stream.stream_events(&flag).await;
        // Cleanup, always: flag down, slots back, gauge down.
        flag.mark_closed();
        limiter.release(&slots);
        metrics::gauge!("consumers", "event_type" => event_type_name.clone()).decrement(1.0);
        tracing::info!(event_type = %event_type_name, "event stream closed");
    });

    let body_stream = async_stream::stream! {
        while let Some(line) = rx.recv().await {
            yield Ok::<_, std::convert::Infallible>(line);
        }
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, X_JSON_STREAM)
        .body(Body::from_stream(body_stream))
        .map_err(|e| Problem::internal("failed to build response").with_source(e.into()))
}

/// Read and UTF-8 check the cursors header.
fn cursors_header(headers: &HeaderMap) -> Result<Option<String>, Problem> {
    match headers.get(CURSORS_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|raw| Some(raw.to_string()))
            .map_err(|_| Problem::bad_request("incorrect syntax of X-nakadi-cursors header")),
    }
}

/// Resolve the starting cursor set.
///
/// No header means "from newest, every partition". An explicit header is
/// parsed as a JSON array of `{partition, offset}`; `BEGIN` offsets are
/// substituted with the before-oldest position, loaded lazily once.
async fn streaming_start(
    repository: &dyn TopicRepository,
    topic: &str,
    header: Option<String>,
) -> Result<Vec<TopicPosition>, Problem> {
    let Some(raw) = header else {
        return repository
            .load_newest_positions(&[topic.to_string()])
            .await
            .map_err(Problem::from);
    };

    let views: Vec<CursorView> = serde_json::from_str(&raw)
        .map_err(|_| Problem::bad_request("incorrect syntax of X-nakadi-cursors header"))?;
    if views.is_empty() {
        return Err(Problem::precondition_failed("cursor INVALID_FORMAT"));
    }

    let mut before_oldest: Option<HashMap<String, String>> = None;
    let mut cursors = Vec::with_capacity(views.len());
    for view in views {
        let Some(partition) = view.partition else {
            return Err(Problem::precondition_failed("cursor NULL_PARTITION"));
        };
        let Some(offset) = view.offset else {
            return Err(Problem::precondition_failed("cursor NULL_OFFSET"));
        };

        if is_begin(&offset) {
            if before_oldest.is_none() {
                let positions = repository
                    .load_oldest_positions(&[topic.to_string()], false)
                    .await
                    .map_err(Problem::from)?;
                before_oldest = Some(
                    positions
                        .into_iter()
                        .filter_map(|p| Some((p.partition, p.offset?)))
                        .collect(),
                );
            }
            let oldest_offset = before_oldest
                .as_ref()
                .and_then(|map| map.get(&partition))
                .ok_or_else(|| Problem::precondition_failed("cursor PARTITION_NOT_FOUND"))?;
            cursors.push(TopicPosition::new(topic, partition, Some(oldest_offset.clone())));
        } else {
            cursors.push(TopicPosition::new(topic, partition, Some(offset)));
        }
    }
    Ok(cursors)
}

fn stream_config(query: &StreamQuery, defaults: &EventStreamConfig) -> EventStreamConfig {
    EventStreamConfig {
        batch_limit: query.batch_limit.unwrap_or(defaults.batch_limit).max(1),
        stream_limit: query.stream_limit.unwrap_or(defaults.stream_limit),
        batch_flush_timeout: query
            .batch_flush_timeout
            .map_or(defaults.batch_flush_timeout, Duration::from_secs),
        stream_timeout: query
            .stream_timeout
            .map_or(defaults.stream_timeout, Duration::from_secs),
        stream_keep_alive_limit: query
            .stream_keep_alive_limit
            .unwrap_or(defaults.stream_keep_alive_limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventgate_testing::InMemoryTopicRepository;

    fn repository() -> InMemoryTopicRepository {
        InMemoryTopicRepository::new()
            .with_partition("T", 0, 6, 100)
            .with_partition("T", 1, 0, 200)
    }

    #[tokio::test]
    async fn no_header_starts_from_newest() {
        let repository = repository();
        let cursors = streaming_start(&repository, "T", None)
            .await
            .expect("start cursors");

        assert_eq!(
            cursors,
            vec![
                TopicPosition::new("T", "0", Some("100")),
                TopicPosition::new("T", "1", Some("200")),
            ]
        );
    }

    #[tokio::test]
    async fn begin_is_substituted_with_before_oldest() {
        let repository = repository();
        let header = Some("[{\"partition\":\"0\",\"offset\":\"BEGIN\"}]".to_string());
        let cursors = streaming_start(&repository, "T", header)
            .await
            .expect("start cursors");

        assert_eq!(cursors, vec![TopicPosition::new("T", "0", Some("5"))]);
    }

    #[tokio::test]
    async fn begin_is_case_insensitive() {
        let repository = repository();
        let header = Some("[{\"partition\":\"1\",\"offset\":\"begin\"}]".to_string());
        let cursors = streaming_start(&repository, "T", header)
            .await
            .expect("start cursors");

        assert_eq!(cursors, vec![TopicPosition::new("T", "1", Some("-1"))]);
    }

    #[tokio::test]
    async fn invalid_json_is_a_bad_request() {
        let repository = repository();
        let header = Some("partition=0".to_string());
        let problem = streaming_start(&repository, "T", header)
            .await
            .expect_err("parse fails");

        assert_eq!(problem.status(), StatusCode::BAD_REQUEST);
        assert_eq!(problem.detail(), "incorrect syntax of X-nakadi-cursors header");
    }

    #[tokio::test]
    async fn empty_cursor_list_is_rejected() {
        let repository = repository();
        let problem = streaming_start(&repository, "T", Some("[]".to_string()))
            .await
            .expect_err("empty list rejected");

        assert_eq!(problem.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(problem.detail(), "cursor INVALID_FORMAT");
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let repository = repository();

        let no_offset = Some("[{\"partition\":\"0\"}]".to_string());
        let problem = streaming_start(&repository, "T", no_offset)
            .await
            .expect_err("missing offset rejected");
        assert_eq!(problem.detail(), "cursor NULL_OFFSET");

        let no_partition = Some("[{\"offset\":\"12\"}]".to_string());
        let problem = streaming_start(&repository, "T", no_partition)
            .await
            .expect_err("missing partition rejected");
        assert_eq!(problem.detail(), "cursor NULL_PARTITION");
    }

    #[test]
    fn query_overrides_defaults() {
        let query = StreamQuery {
            batch_limit: Some(25),
            stream_timeout: Some(60),
            ..StreamQuery::default()
        };
        let config = stream_config(&query, &EventStreamConfig::default());

        assert_eq!(config.batch_limit, 25);
        assert_eq!(config.stream_timeout, Duration::from_secs(60));
        assert_eq!(config.batch_flush_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_batch_limit_is_clamped() {
        let query = StreamQuery {
            batch_limit: Some(0),
            ..StreamQuery::default()
        };
        let config = stream_config(&query, &EventStreamConfig::default());
        assert_eq!(config.batch_limit, 1);
    }
}
