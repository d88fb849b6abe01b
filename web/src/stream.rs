//! Framed batch streaming over one consumer.
//!
//! [`EventStream`] drains an [`EventConsumer`] and writes
//! `application/x-json-stream` lines into the response-body channel. Each
//! line is one batch for one partition:
//!
//! ```text
//! {"cursor":{"partition":"0","offset":"102"},"events":[{...},{...}]}
//! ```
//!
//! The cursor is the read-after position of the batch's last event; a
//! client resuming with it sees the next record. Idle flush windows produce
//! cursor-only keep-alive lines so proxies do not sever the connection.

use crate::watcher::ConnectionReady;
use eventgate_core::consumer::EventConsumer;
use eventgate_core::cursor::TopicPosition;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;

/// Limits and cadence of one streaming response.
#[derive(Debug, Clone)]
pub struct EventStreamConfig {
    /// Events per partition batch before an early flush.
    pub batch_limit: usize,
    /// Total events after which the stream closes; 0 means unbounded.
    pub stream_limit: usize,
    /// Flush window for partial batches.
    pub batch_flush_timeout: Duration,
    /// Wall-clock bound on the whole stream; zero means unbounded.
    pub stream_timeout: Duration,
    /// Consecutive keep-alive rounds after which the stream closes;
    /// 0 means unbounded.
    pub stream_keep_alive_limit: usize,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            batch_limit: 1,
            stream_limit: 0,
            batch_flush_timeout: Duration::from_secs(30),
            stream_timeout: Duration::ZERO,
            stream_keep_alive_limit: 0,
        }
    }
}

#[derive(Serialize)]
struct CursorFrame<'a> {
    partition: &'a str,
    offset: &'a str,
}

#[derive(Serialize)]
struct BatchFrame<'a> {
    cursor: CursorFrame<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<serde_json::Value>,
}

/// Pulls from a consumer and writes framed batches until a limit is met,
/// the client disconnects, or the consumer fails.
pub struct EventStream {
    consumer: Box<dyn EventConsumer>,
    config: EventStreamConfig,
    /// Latest read-after cursor per partition, seeded from the start set.
    cursors: BTreeMap<String, TopicPosition>,
    pending: BTreeMap<String, Vec<String>>,
    out: mpsc::Sender<String>,
}

impl EventStream {
    /// Create a stream seeded with the negotiated start cursors.
    #[must_use]
    pub fn new(
        consumer: Box<dyn EventConsumer>,
        config: EventStreamConfig,
        start_cursors: Vec<TopicPosition>,
        out: mpsc::Sender<String>,
    ) -> Self {
        let cursors = start_cursors
            .into_iter()
            .map(|cursor| (cursor.partition.clone(), cursor))
            .collect();
        Self {
            consumer,
            config,
            cursors,
            pending: BTreeMap::new(),
            out,
        }
    }

    /// Run the streaming loop until a termination condition is met.
    ///
    /// Terminates when `connection` reports the client gone, the stream
    /// limit or timeout is reached, the keep-alive limit is exhausted, the
    /// consumer fails, or the response body is dropped.
    #[allow(clippy::cognitive_complexity)] // The loop is one policy unit
    pub async fn stream_events(mut self, connection: &ConnectionReady) {
        let started = Instant::now();
        let mut sent_events: usize = 0;
        let mut keepalive_rounds: usize = 0;

        'stream: loop {
            if !connection.is_up() || self.out_of_time(started) {
                break;
            }

            let window_end = Instant::now() + self.config.batch_flush_timeout;
            let mut window_events: usize = 0;

            while Instant::now() < window_end {
                if !connection.is_up() {
                    break 'stream;
                }
                match self.consumer.read_event().await {
                    Err(error) => {
                        tracing::warn!(error = %error, "consumer failed, closing stream");
                        break 'stream;
                    }
                    Ok(None) => {
                        if self.out_of_time(started) {
                            break;
                        }
                    }
                    Ok(Some(event)) => {
                        window_events += 1;
                        let partition = event.next_position.partition.clone();
                        self.cursors
                            .insert(partition.clone(), event.next_position);
                        let pending = self.pending.entry(partition.clone()).or_default();
                        pending.push(event.payload);

                        if pending.len() >= self.config.batch_limit {
                            match self.flush_partition(&partition).await {
                                Ok(count) => sent_events += count,
                                Err(_) => break 'stream,
                            }
                        }
                        if self.limit_hit(sent_events + self.pending_total()) {
                            break;
                        }
                    }
                }
            }

            match self.flush_all().await {
                Ok(count) => sent_events += count,
                Err(_) => break,
            }

            if self.limit_hit(sent_events) {
                tracing::debug!(sent_events, "stream limit reached");
                break;
            }

            if window_events == 0 && !self.out_of_time(started) {
                keepalive_rounds += 1;
                if self.send_keepalives().await.is_err() {
                    break;
                }
                let limit = self.config.stream_keep_alive_limit;
                if limit > 0 && keepalive_rounds >= limit {
                    tracing::debug!(keepalive_rounds, "keep-alive limit reached");
                    break;
                }
            } else {
                keepalive_rounds = 0;
            }
        }
    }

    fn out_of_time(&self, started: Instant) -> bool {
        self.config.stream_timeout > Duration::ZERO
            && started.elapsed() >= self.config.stream_timeout
    }

    const fn limit_hit(&self, sent: usize) -> bool {
        self.config.stream_limit > 0 && sent >= self.config.stream_limit
    }

    fn pending_total(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    async fn flush_partition(&mut self, partition: &str) -> Result<usize, SendError<String>> {
        let Some(events) = self.pending.remove(partition) else {
            return Ok(0);
        };
        let count = events.len();
        let Some(cursor) = self.cursors.get(partition) else {
            return Ok(0);
        };
        if let Some(line) = frame_line(cursor, events) {
            self.out.send(line).await?;
        }
        Ok(count)
    }

    async fn flush_all(&mut self) -> Result<usize, SendError<String>> {
        let partitions: Vec<String> = self.pending.keys().cloned().collect();
        let mut sent = 0;
        for partition in partitions {
            sent += self.flush_partition(&partition).await?;
        }
        Ok(sent)
    }

    async fn send_keepalives(&mut self) -> Result<(), SendError<String>> {
        for cursor in self.cursors.values() {
            if let Some(line) = frame_line(cursor, Vec::new()) {
                self.out.send(line).await?;
            }
        }
        Ok(())
    }
}

/// Serialize one batch line. Payloads are embedded as JSON when they parse,
/// as JSON strings otherwise.
fn frame_line(cursor: &TopicPosition, events: Vec<String>) -> Option<String> {
    let events = events
        .into_iter()
        .map(|payload| {
            serde_json::from_str(&payload).unwrap_or(serde_json::Value::String(payload))
        })
        .collect();
    let frame = BatchFrame {
        cursor: CursorFrame {
            partition: &cursor.partition,
            offset: cursor.offset.as_deref().unwrap_or_default(),
        },
        events,
    };
    match serde_json::to_string(&frame) {
        Ok(mut line) => {
            line.push('\n');
            Some(line)
        }
        Err(error) => {
            tracing::error!(error = %error, "failed to serialize batch frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventgate_core::consumer::ConsumedEvent;
    use eventgate_testing::ScriptedConsumer;

    fn event(partition: &str, offset: &str, payload: &str) -> ConsumedEvent {
        ConsumedEvent::new(payload, TopicPosition::new("T", partition, Some(offset)))
    }

    fn start_cursors() -> Vec<TopicPosition> {
        vec![
            TopicPosition::new("T", "0", Some("100")),
            TopicPosition::new("T", "1", Some("200")),
        ]
    }

    async fn run_stream(
        consumer: ScriptedConsumer,
        config: EventStreamConfig,
    ) -> Vec<String> {
        let (tx, mut rx) = mpsc::channel(64);
        let stream = EventStream::new(Box::new(consumer), config, start_cursors(), tx);
        let connection = ConnectionReady::new();
        stream.stream_events(&connection).await;

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn events_are_framed_per_partition_with_latest_cursor() {
        let consumer = ScriptedConsumer::new(vec![
            event("0", "101", "{\"a\":1}"),
            event("0", "102", "{\"a\":2}"),
            event("1", "201", "{\"b\":1}"),
        ]);
        let config = EventStreamConfig {
            batch_limit: 2,
            stream_limit: 3,
            batch_flush_timeout: Duration::from_millis(50),
            ..EventStreamConfig::default()
        };

        let lines = run_stream(consumer, config).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "{\"cursor\":{\"partition\":\"0\",\"offset\":\"102\"},\"events\":[{\"a\":1},{\"a\":2}]}\n"
        );
        assert_eq!(
            lines[1],
            "{\"cursor\":{\"partition\":\"1\",\"offset\":\"201\"},\"events\":[{\"b\":1}]}\n"
        );
    }

    #[tokio::test]
    async fn stream_limit_closes_after_enough_events() {
        let consumer = ScriptedConsumer::new(vec![
            event("0", "101", "{}"),
            event("0", "102", "{}"),
            event("0", "103", "{}"),
        ]);
        let config = EventStreamConfig {
            batch_limit: 1,
            stream_limit: 2,
            batch_flush_timeout: Duration::from_millis(50),
            ..EventStreamConfig::default()
        };

        let lines = run_stream(consumer, config).await;
        // One event per line; the third event never goes out.
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn idle_windows_emit_keepalives_until_the_limit() {
        let consumer = ScriptedConsumer::new(Vec::new());
        let config = EventStreamConfig {
            batch_limit: 1,
            batch_flush_timeout: Duration::from_millis(10),
            stream_keep_alive_limit: 2,
            ..EventStreamConfig::default()
        };

        let lines = run_stream(consumer, config).await;
        // Two keep-alive rounds, each covering both partitions.
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "{\"cursor\":{\"partition\":\"0\",\"offset\":\"100\"}}\n"
        );
        assert_eq!(
            lines[1],
            "{\"cursor\":{\"partition\":\"1\",\"offset\":\"200\"}}\n"
        );
    }

    #[tokio::test]
    async fn closed_connection_stops_the_stream_immediately() {
        let consumer = ScriptedConsumer::new(vec![event("0", "101", "{}")]);
        let (tx, mut rx) = mpsc::channel(8);
        let stream = EventStream::new(
            Box::new(consumer),
            EventStreamConfig::default(),
            start_cursors(),
            tx,
        );
        let connection = ConnectionReady::new();
        connection.mark_closed();

        stream.stream_events(&connection).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_json_payloads_are_framed_as_strings() {
        let consumer = ScriptedConsumer::new(vec![event("0", "101", "plain text")]);
        let config = EventStreamConfig {
            stream_limit: 1,
            batch_flush_timeout: Duration::from_millis(50),
            ..EventStreamConfig::default()
        };

        let lines = run_stream(consumer, config).await;
        assert_eq!(
            lines[0],
            "{\"cursor\":{\"partition\":\"0\",\"offset\":\"101\"},\"events\":[\"plain text\"]}\n"
        );
    }
}
