//! Closed-connection detection for long streaming responses.
//!
//! The streaming loop cannot see the HTTP socket; it sees a shared boolean.
//! [`ConnectionReady`] starts true, and [`watch_disconnect`] arms a task
//! against the response-body channel: when the client goes away the body is
//! dropped, the channel's receiver closes, and the flag flips. The
//! controller also clears the flag itself on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shared "client is still connected" flag.
///
/// Cheap to clone; clones share the flag.
#[derive(Debug, Clone)]
pub struct ConnectionReady {
    ready: Arc<AtomicBool>,
}

impl ConnectionReady {
    /// Create a flag in the connected state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the client is still considered connected.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Mark the connection closed. Never unset.
    pub fn mark_closed(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

impl Default for ConnectionReady {
    fn default() -> Self {
        Self::new()
    }
}

/// Flip `flag` when the response body is dropped.
///
/// `sender` must be a clone of the sender feeding the response body; its
/// `closed()` future resolves once the receiving body is gone, which is how
/// a client disconnect manifests here.
pub fn watch_disconnect<T: Send + 'static>(
    sender: mpsc::Sender<T>,
    flag: ConnectionReady,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        sender.closed().await;
        if flag.is_up() {
            tracing::debug!("client disconnected during streaming");
        }
        flag.mark_closed();
    })
}
