//! Per-item publish state for synchronous batch publication.
//!
//! A [`BatchItem`] is owned by exactly one publish call, but its state is
//! written from delivery callbacks racing the aggregate wait. The state
//! therefore lives behind a mutex, and the mutation API enforces the two
//! invariants the publish algorithm relies on:
//!
//! - once an item is [`SubmissionStatus::Submitted`] it is never downgraded;
//! - a failure detail, once set, is never overwritten by the fail-sweep.

use std::sync::Mutex;

/// Where an item is in the publish pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishingStep {
    /// Not yet handed to the producer.
    #[default]
    None,
    /// Send issued, outcome pending.
    Publishing,
    /// Delivery confirmed by the broker.
    Published,
}

/// Terminal classification of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    /// Accepted by the log store.
    Submitted,
    /// Not accepted; see the detail string.
    Failed,
    /// Abandoned before an attempt was made.
    Aborted,
}

/// Terminal `(status, detail)` pair reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResponse {
    /// Terminal status.
    pub status: SubmissionStatus,
    /// Human-readable failure detail; empty for submitted items.
    pub detail: String,
}

#[derive(Debug, Default)]
struct PublishState {
    broker_id: Option<String>,
    step: PublishingStep,
    response: Option<ItemResponse>,
}

/// One event of a publish batch, with its pre-assigned partition.
///
/// The payload is opaque to the broker frontend. The partition is mandatory
/// by construction; assigning events to partitions is the caller's job.
#[derive(Debug)]
pub struct BatchItem {
    payload: String,
    partition: String,
    state: Mutex<PublishState>,
}

impl BatchItem {
    /// Create an item targeting `partition`.
    pub fn new(payload: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            partition: partition.into(),
            state: Mutex::new(PublishState::default()),
        }
    }

    /// The opaque event payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The partition this item was assigned to.
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// The leader broker id assigned just before publishing, if any.
    #[must_use]
    pub fn broker_id(&self) -> Option<String> {
        self.lock().broker_id.clone()
    }

    /// Record the leader broker responsible for this item's partition.
    pub fn assign_broker(&self, broker_id: impl Into<String>) {
        self.lock().broker_id = Some(broker_id.into());
    }

    /// Current pipeline step.
    #[must_use]
    pub fn step(&self) -> PublishingStep {
        self.lock().step
    }

    /// Move the item into the publishing step.
    pub fn begin_publishing(&self) {
        self.lock().step = PublishingStep::Publishing;
    }

    /// Terminal response, if the item has one yet.
    #[must_use]
    pub fn response(&self) -> Option<ItemResponse> {
        self.lock().response.clone()
    }

    /// Mark the item submitted and published.
    ///
    /// A submitted status is terminal; later failure marks are ignored.
    pub fn mark_submitted(&self) {
        let mut state = self.lock();
        state.step = PublishingStep::Published;
        state.response = Some(ItemResponse {
            status: SubmissionStatus::Submitted,
            detail: String::new(),
        });
    }

    /// Mark the item failed with `detail`.
    ///
    /// No-op when the item is already submitted, or already failed with a
    /// non-empty detail (the fail-sweep must not overwrite callback details).
    pub fn mark_failed(&self, detail: impl Into<String>) {
        let mut state = self.lock();
        match &state.response {
            Some(response)
                if response.status == SubmissionStatus::Submitted
                    || !response.detail.is_empty() => {}
            _ => {
                state.response = Some(ItemResponse {
                    status: SubmissionStatus::Failed,
                    detail: detail.into(),
                });
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PublishState> {
        // Poisoning only happens when a holder panicked; the state is a plain
        // record with no broken invariants to observe.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
