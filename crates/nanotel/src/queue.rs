//! Event Queue - ordered buffer of pending telemetry
//!
//! One FIFO buffer holds both log records and spans. Flushing drains a single
//! channel at a time: the buffer is swapped out under its lock, split by
//! channel, and the other channel's events are put back, so an event added
//! while a send is in flight lands in the fresh buffer and is never lost or
//! sent twice.
//!
//! Listeners observe every change (a devtools-style mirror attaches here).
//! They are invoked after the buffer lock is released and may call back into
//! the queue.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_drain_conserves;
use crate::lock;
use crate::otlp::{LogRecord, Span};

/// A buffered telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TelemetryEvent {
    Log(LogRecord),
    Span(Span),
}

impl TelemetryEvent {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Log(_) => Channel::Logs,
            Self::Span(_) => Channel::Spans,
        }
    }

    pub fn as_log(&self) -> Option<&LogRecord> {
        match self {
            Self::Log(record) => Some(record),
            Self::Span(_) => None,
        }
    }

    pub fn as_span(&self) -> Option<&Span> {
        match self {
            Self::Span(span) => Some(span),
            Self::Log(_) => None,
        }
    }
}

/// One of the two independent buffering/flush pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Logs,
    Spans,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Logs, Channel::Spans];

    /// Collector path for this channel's batches.
    pub const fn path(self) -> &'static str {
        match self {
            Self::Logs => "/v1/logs",
            Self::Spans => "/v1/traces",
        }
    }
}

/// Change notification delivered to queue listeners.
#[derive(Debug, Clone, Copy)]
pub enum QueueEvent<'a> {
    Added(&'a TelemetryEvent),
    Removed(&'a TelemetryEvent),
    Cleared,
}

/// Handle returned by [`EventQueue::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&QueueEvent<'_>) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

/// Ordered, listener-aware buffer of [`TelemetryEvent`]s.
#[derive(Default)]
pub struct EventQueue {
    events: Mutex<Vec<TelemetryEvent>>,
    listeners: Mutex<Listeners>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for add/remove/clear notifications.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&QueueEvent<'_>) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.entries.len();
        listeners.entries.retain(|(existing, _)| *existing != id);
        listeners.entries.len() != before
    }

    fn notify(&self, event: &QueueEvent<'_>) {
        // Snapshot so listeners can (un)subscribe from inside a callback
        let listeners: Vec<Listener> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Appends an event.
    pub fn add(&self, event: TelemetryEvent) {
        let snapshot = event.clone();
        lock(&self.events).push(event);
        self.notify(&QueueEvent::Added(&snapshot));
    }

    /// Removes the first event equal to `event`. Returns whether one was found.
    pub fn remove(&self, event: &TelemetryEvent) -> bool {
        let removed = {
            let mut events = lock(&self.events);
            let index = events.iter().position(|e| e == event);
            index.map(|index| events.remove(index))
        };
        match removed {
            Some(removed) => {
                self.notify(&QueueEvent::Removed(&removed));
                true
            }
            None => false,
        }
    }

    /// Removes everything, notifying once per removed event and then `Cleared`.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *lock(&self.events));
        for event in &removed {
            self.notify(&QueueEvent::Removed(event));
        }
        self.notify(&QueueEvent::Cleared);
    }

    /// Takes every buffered event of `channel`, in insertion order.
    pub fn drain(&self, channel: Channel) -> Vec<TelemetryEvent> {
        let drained = {
            let mut events = lock(&self.events);
            #[cfg(debug_assertions)]
            let before = events.len();
            let (drained, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *events)
                .into_iter()
                .partition(|event| event.channel() == channel);

            #[cfg(debug_assertions)]
            debug_assert_drain_conserves!(before, drained.len(), kept.len());

            *events = kept;
            drained
        };
        for event in &drained {
            self.notify(&QueueEvent::Removed(event));
        }
        drained
    }

    /// Puts a failed batch back in front of whatever arrived since it was drained.
    pub fn requeue(&self, batch: Vec<TelemetryEvent>) {
        if batch.is_empty() {
            return;
        }
        {
            let mut events = lock(&self.events);
            let newer = std::mem::replace(&mut *events, batch.clone());
            events.extend(newer);
        }
        for event in &batch {
            self.notify(&QueueEvent::Added(event));
        }
    }

    /// Copy of the buffered events, oldest first.
    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        lock(&self.events).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }

    /// Number of buffered events belonging to `channel`.
    pub fn pending(&self, channel: Channel) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| event.channel() == channel)
            .count()
    }
}
