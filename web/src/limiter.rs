//! Connection-slot admission for streaming consumers.
//!
//! Each active stream holds one slot per partition it reads, keyed by
//! `(client, event type, partition)`. Acquisition over a partition list is
//! atomic: either every slot is granted or none is, and a partial grant is
//! rolled back before the failure surfaces. Release is idempotent.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

/// Admission was denied because a partition has no free slots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "no free connection slots for client '{client_id}' on event type '{event_type}' partition {partition}"
)]
pub struct NoConnectionSlots {
    /// The requesting client.
    pub client_id: String,
    /// The event type being consumed.
    pub event_type: String,
    /// The partition that had no free slot.
    pub partition: String,
}

/// One granted reservation for `(client, event type, partition)`.
///
/// Opaque to holders; hand it back to [`ConsumerLimiter::release`].
#[derive(Debug)]
pub struct ConnectionSlot {
    client_id: String,
    event_type: String,
    partition: String,
    token: Uuid,
}

type SlotKey = (String, String, String);

/// Per-`(client, event type, partition)` admission with a bounded number of
/// concurrent streams.
#[derive(Debug)]
pub struct ConsumerLimiter {
    max_connections: usize,
    slots: Mutex<HashMap<SlotKey, HashSet<Uuid>>>,
}

impl ConsumerLimiter {
    /// Create a limiter allowing `max_connections` concurrent streams per
    /// `(client, event type, partition)`.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire one slot per partition, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`NoConnectionSlots`] naming the first full partition; any
    /// slots granted before the failure are rolled back.
    pub fn acquire(
        &self,
        client_id: &str,
        event_type: &str,
        partitions: &[String],
    ) -> Result<Vec<ConnectionSlot>, NoConnectionSlots> {
        let mut slots = self.lock();
        let mut granted = Vec::with_capacity(partitions.len());

        for partition in partitions {
            let key = (
                client_id.to_string(),
                event_type.to_string(),
                partition.clone(),
            );
            let holders = slots.entry(key).or_default();
            if holders.len() >= self.max_connections {
                for slot in &granted {
                    Self::remove(&mut slots, slot);
                }
                tracing::debug!(
                    client = %client_id,
                    event_type = %event_type,
                    partition = %partition,
                    "connection slot denied"
                );
                return Err(NoConnectionSlots {
                    client_id: client_id.to_string(),
                    event_type: event_type.to_string(),
                    partition: partition.clone(),
                });
            }
            let token = Uuid::new_v4();
            holders.insert(token);
            granted.push(ConnectionSlot {
                client_id: client_id.to_string(),
                event_type: event_type.to_string(),
                partition: partition.clone(),
                token,
            });
        }

        Ok(granted)
    }

    /// Release slots. Idempotent, and an empty list is a no-op.
    pub fn release(&self, slots: &[ConnectionSlot]) {
        if slots.is_empty() {
            return;
        }
        let mut held = self.lock();
        for slot in slots {
            Self::remove(&mut held, slot);
        }
    }

    /// Slots currently held for `(client, event type, partition)`.
    #[must_use]
    pub fn held(&self, client_id: &str, event_type: &str, partition: &str) -> usize {
        self.lock()
            .get(&(
                client_id.to_string(),
                event_type.to_string(),
                partition.to_string(),
            ))
            .map_or(0, HashSet::len)
    }

    fn remove(held: &mut HashMap<SlotKey, HashSet<Uuid>>, slot: &ConnectionSlot) {
        let key = (
            slot.client_id.clone(),
            slot.event_type.clone(),
            slot.partition.clone(),
        );
        if let Some(holders) = held.get_mut(&key) {
            holders.remove(&slot.token);
            if holders.is_empty() {
                held.remove(&key);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SlotKey, HashSet<Uuid>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
