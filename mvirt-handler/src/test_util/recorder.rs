//! Bounded in-memory event sink.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::events::{Event, EventSink, LifecycleEvent, SinkError};
use crate::spec::VmIdentity;

/// Keeps recorded events in order, up to `capacity`.
pub struct RecordingSink {
    capacity: usize,
    events: Mutex<Vec<Event>>,
    reject: AtomicBool,
}

impl RecordingSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(Vec::new()),
            reject: AtomicBool::new(false),
        }
    }

    /// A sink whose every record fails.
    pub fn rejecting() -> Self {
        let sink = Self::new(0);
        sink.reject.store(true, Ordering::SeqCst);
        sink
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<LifecycleEvent> {
        self.events.lock().await.iter().map(|e| e.kind).collect()
    }

    /// Take all recorded events, leaving the sink empty.
    pub async fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().await)
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn record(&self, identity: &VmIdentity, kind: LifecycleEvent) -> Result<(), SinkError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("recording disabled".into()));
        }
        let mut events = self.events.lock().await;
        if events.len() >= self.capacity {
            return Err(SinkError::Full(self.capacity));
        }
        events.push(Event::new(identity, kind));
        Ok(())
    }
}
