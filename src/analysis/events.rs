//! Detection events
//!
//! Emits an event whenever a number is accepted, either from the camera after
//! double confirmation or from a completed manual entry.

use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use super::digits::DigitString;

/// Where an accepted number came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Camera,
    Manual,
}

/// An accepted number and its validity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionEvent {
    /// The normalized number
    pub number: DigitString,
    /// Whether the number is in the valid set
    pub is_valid: bool,
    /// Camera or keypad
    pub source: DetectionSource,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl DetectionEvent {
    pub fn new(number: DigitString, is_valid: bool, source: DetectionSource) -> Self {
        Self {
            number,
            is_valid,
            source,
            timestamp_ms: now_millis(),
        }
    }
}

/// Broadcasts events to any number of channel subscribers
pub struct EventEmitter<T = DetectionEvent> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> EventEmitter<T> {
    /// Create a new event emitter
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Emit an event to all subscribers, pruning the ones that hung up
    pub fn emit(&self, event: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        trace!(subscribers = subscribers.len(), "Event emitted");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: &str) -> DetectionEvent {
        DetectionEvent::new(
            DigitString::normalize(n).unwrap(),
            true,
            DetectionSource::Camera,
        )
    }

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let emitter: EventEmitter = EventEmitter::new();
        let a = emitter.subscribe();
        let b = emitter.subscribe();

        emitter.emit(event("1234"));

        assert_eq!(a.try_recv().unwrap().number.as_str(), "1234");
        assert_eq!(b.try_recv().unwrap().number.as_str(), "1234");
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let emitter: EventEmitter = EventEmitter::new();
        let kept = emitter.subscribe();
        drop(emitter.subscribe());
        assert_eq!(emitter.subscriber_count(), 2);

        emitter.emit(event("0001"));

        assert_eq!(emitter.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn test_event_serializes_with_source() {
        let json = serde_json::to_string(&event("0042")).unwrap();
        assert!(json.contains("\"number\":\"0042\""));
        assert!(json.contains("\"source\":\"camera\""));
    }
}
