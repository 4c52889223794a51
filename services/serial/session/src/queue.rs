//! Ordered buffer of events waiting for an observer.

use std::collections::VecDeque;

use crate::event::Event;

/// Unbounded FIFO of pending events.
///
/// Read batches pushed back-to-back are merged into the tail entry so a burst
/// that happens with no observer replays as one batch.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, merging consecutive read batches
    pub fn push(&mut self, event: Event) {
        if let Event::DataReceived(chunks) = event {
            if let Some(Event::DataReceived(tail)) = self.events.back_mut() {
                tail.extend(chunks);
            } else {
                self.events.push_back(Event::DataReceived(chunks));
            }
            return;
        }
        self.events.push_back(event);
    }

    /// Take every queued event, leaving the queue empty
    pub fn take(&mut self) -> VecDeque<Event> {
        std::mem::take(&mut self.events)
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SerialError;
    use bytes::Bytes;

    #[test]
    fn test_reads_merge_into_tail() {
        let mut queue = EventQueue::new();
        queue.push(Event::DataReceived(vec![Bytes::from_static(b"a")]));
        queue.push(Event::DataReceived(vec![Bytes::from_static(b"b")]));
        assert_eq!(queue.len(), 1);

        let events: Vec<Event> = queue.take().into_iter().collect();
        assert_eq!(
            events,
            vec![Event::DataReceived(vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
            ])]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_other_events_break_read_runs() {
        let mut queue = EventQueue::new();
        queue.push(Event::DataReceived(vec![Bytes::from_static(b"a")]));
        queue.push(Event::IoError(SerialError::Io("reset".to_string())));
        queue.push(Event::DataReceived(vec![Bytes::from_static(b"b")]));
        queue.push(Event::Connected);
        queue.push(Event::Connected);

        let kinds: Vec<&str> = queue.take().iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec!["data_received", "io_error", "data_received", "connected", "connected"]
        );
    }
}
