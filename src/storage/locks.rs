//! Per-event reader/writer locks

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::embedding::EventId;

/// Registry handing out one lock per event.
///
/// The registry mutex is only held for the lookup, so operations on
/// different events never wait on each other. Entries live only while some
/// operation holds them; `release` drops idle ones.
#[derive(Debug, Default)]
pub struct EventLocks {
    locks: Mutex<HashMap<EventId, Arc<RwLock<()>>>>,
}

impl EventLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock of an event, creating it on first use
    pub fn get(&self, event_id: EventId) -> Arc<RwLock<()>> {
        self.locks.lock().entry(event_id).or_default().clone()
    }

    /// Forget the lock of an event unless another operation still holds it.
    ///
    /// Callers must have dropped their own handle first.
    pub fn release(&self, event_id: EventId) {
        let mut locks = self.locks.lock();
        if locks
            .get(&event_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&event_id);
        }
    }

    /// Number of events with a live lock
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
