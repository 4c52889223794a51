//! Read coalescing between producer callbacks and the delivery context.

use bytes::Bytes;
use std::sync::{Mutex, PoisonError};

/// Accumulates read chunks until the delivery context drains them.
///
/// Has its own lock so appending data never contends with the observer slot.
#[derive(Debug, Default)]
pub struct ReadCoalescer {
    pending: Mutex<Vec<Bytes>>,
}

impl ReadCoalescer {
    /// Create an empty coalescer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Returns true when it opened a new burst, i.e. the
    /// batch was empty and the caller must schedule a drain.
    pub fn push(&self, chunk: Bytes) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let first = pending.is_empty();
        pending.push(chunk);
        first
    }

    /// Swap out the accumulated batch
    pub fn drain(&self) -> Vec<Bytes> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending)
    }

    /// Number of chunks waiting for a drain
    pub fn pending_chunks(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_chunk_opens_burst() {
        let coalescer = ReadCoalescer::new();
        assert!(coalescer.push(Bytes::from_static(b"one")));
        assert!(!coalescer.push(Bytes::from_static(b"two")));
        assert_eq!(coalescer.pending_chunks(), 2);

        let batch = coalescer.drain();
        assert_eq!(batch, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
        assert_eq!(coalescer.pending_chunks(), 0);

        // Next chunk starts a new burst
        assert!(coalescer.push(Bytes::from_static(b"three")));
    }

    #[test]
    fn test_concurrent_producers_open_one_burst() {
        let coalescer = Arc::new(ReadCoalescer::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let coalescer = coalescer.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|j| coalescer.push(Bytes::from(format!("{}-{}", i, j))))
                        .count()
                })
            })
            .collect();

        let openings: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(openings, 1);
        assert_eq!(coalescer.drain().len(), 400);
    }
}
