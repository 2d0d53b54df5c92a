//! Event batching: queued file events are drained on a timer and handed
//! to handlers as one batch per destination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::folder::FileEvent;

/// Callback invoked with a destination name and its drained batch.
pub type BatchHandler = Arc<dyn Fn(&str, &[FileEvent]) + Send + Sync>;

/// Accumulates file events between drains.
#[derive(Default)]
pub struct EventBatcher {
    queue: Mutex<Vec<FileEvent>>,
    handlers: Mutex<Vec<BatchHandler>>,
}

impl EventBatcher {
    /// Create an empty batcher with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one event for the next drain.
    pub fn enqueue(&self, event: FileEvent) {
        let mut queue = self.queue.lock().expect("batch queue poisoned");
        queue.push(event);
    }

    /// Register a handler. Every handler sees every batch.
    pub fn add_handler(&self, handler: BatchHandler) {
        let mut handlers = self.handlers.lock().expect("handler list poisoned");
        handlers.push(handler);
    }

    /// Number of events waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.queue.lock().expect("batch queue poisoned").len()
    }

    /// Take everything queued, group it by destination, and hand each
    /// group to every handler exactly once.
    pub fn drain(&self) {
        let events = {
            let mut queue = self.queue.lock().expect("batch queue poisoned");
            std::mem::take(&mut *queue)
        };
        if events.is_empty() {
            return;
        }

        let mut groups: HashMap<String, Vec<FileEvent>> = HashMap::new();
        for event in events {
            groups.entry(event.destination.clone()).or_default().push(event);
        }

        let handlers = {
            let handlers = self.handlers.lock().expect("handler list poisoned");
            handlers.clone()
        };
        for (destination, batch) in &groups {
            tracing::debug!("Draining {} event(s) for {}", batch.len(), destination);
            for handler in &handlers {
                handler(destination, batch);
            }
        }
    }
}

/// Spawn the periodic drain task.
pub fn spawn_drain_task(
    batcher: Arc<EventBatcher>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            batcher.drain();
        }
    })
}
