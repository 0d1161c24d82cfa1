//! Bounded dead-letter queue for workflow runs that exhausted their retries.
//!
//! Entries keep the original payload so an operator can inspect and replay
//! them. The queue drops its oldest entry when full.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// A run that failed permanently.
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The failed payload
    pub payload: T,
    /// Attempts made before giving up
    pub attempts: u32,
    /// Error from the last attempt
    pub error_message: String,
    /// When the entry was dead-lettered
    pub failed_at: DateTime<Utc>,
}

/// Shared, bounded FIFO of [`DeadLetter`] entries.
///
/// Clones share the same storage.
///
/// # Example
///
/// ```
/// use rewardflow_runtime::dlq::DeadLetterQueue;
///
/// let dlq = DeadLetterQueue::new(2);
/// dlq.push("a", "boom".to_string(), 3);
/// dlq.push("b", "boom".to_string(), 3);
/// dlq.push("c", "boom".to_string(), 3);
///
/// assert_eq!(dlq.len(), 2);
/// assert_eq!(dlq.peek().map(|e| e.payload), Some("b"));
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create an empty queue holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size: max_size.max(1),
        }
    }

    /// Record a permanently failed payload, evicting the oldest entry if full.
    pub fn push(&self, payload: T, error_message: String, attempts: u32) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if queue.len() >= self.max_size {
            queue.pop_front();
            metrics::counter!("dispatcher_dead_letters_dropped_total").increment(1);
            tracing::warn!(
                max_size = self.max_size,
                "Dead letter queue at capacity, dropping oldest entry"
            );
        }

        queue.push_back(DeadLetter {
            payload,
            attempts,
            error_message,
            failed_at: Utc::now(),
        });

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("dispatcher_dead_letter_queue_size").set(queue.len() as f64);
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the queue holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();
        metrics::gauge!("dispatcher_dead_letter_queue_size").set(0.0);
        tracing::info!(count = entries.len(), "Drained dead letter queue");
        entries
    }

    /// The oldest entry, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Capacity of the queue.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_and_preserves_order() {
        let dlq = DeadLetterQueue::new(10);
        dlq.push(1, "first".to_string(), 1);
        dlq.push(2, "second".to_string(), 2);

        let entries = dlq.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, 1);
        assert_eq!(entries[1].attempts, 2);
        assert!(dlq.is_empty());
    }

    #[test]
    fn clones_share_storage() {
        let dlq = DeadLetterQueue::new(10);
        let other = dlq.clone();
        other.push("x", "err".to_string(), 1);
        assert_eq!(dlq.len(), 1);
    }
}
