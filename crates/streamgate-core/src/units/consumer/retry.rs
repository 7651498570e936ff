// Retry bookkeeping for failed deliveries

use std::collections::VecDeque;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A body that could not be delivered yet.
#[derive(Debug, Clone)]
pub struct RetryItem {
    pub body: Bytes,
    /// Failed deliveries so far.
    pub failures: u32,
    pub first_failure: DateTime<Utc>,
}

impl RetryItem {
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            failures: 0,
            first_failure: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub enum RetryOutcome {
    Requeued { failures: u32 },
    /// The item reached the failure limit and was dropped.
    Exhausted(RetryItem),
}

/// FIFO of items awaiting another attempt.
#[derive(Debug)]
pub struct RetryBuffer {
    items: VecDeque<RetryItem>,
    max_failures: u32,
}

impl RetryBuffer {
    pub fn new(max_failures: u32) -> Self {
        Self {
            items: VecDeque::new(),
            max_failures: max_failures.max(1),
        }
    }

    /// Count one more failure for `item`; requeue it unless that was the last allowed.
    pub fn record_failure(&mut self, mut item: RetryItem) -> RetryOutcome {
        item.failures += 1;
        if item.failures >= self.max_failures {
            return RetryOutcome::Exhausted(item);
        }
        let failures = item.failures;
        self.items.push_back(item);
        RetryOutcome::Requeued { failures }
    }

    /// Take everything queued so far. Items that fail again are requeued
    /// by the caller and wait for the next drain.
    pub fn drain(&mut self) -> Vec<RetryItem> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_is_dropped_on_reaching_the_limit() {
        let mut buffer = RetryBuffer::new(3);
        let mut item = RetryItem::new(Bytes::from_static(b"{}"));

        for expected in 1..3 {
            match buffer.record_failure(item) {
                RetryOutcome::Requeued { failures } => assert_eq!(failures, expected),
                RetryOutcome::Exhausted(_) => panic!("dropped too early"),
            }
            let mut drained = buffer.drain();
            assert_eq!(drained.len(), 1);
            item = drained.remove(0);
        }

        match buffer.record_failure(item) {
            RetryOutcome::Exhausted(item) => assert_eq!(item.failures, 3),
            RetryOutcome::Requeued { .. } => panic!("kept past the limit"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_is_a_snapshot() {
        let mut buffer = RetryBuffer::new(10);
        buffer.record_failure(RetryItem::new(Bytes::from_static(b"a")));
        buffer.record_failure(RetryItem::new(Bytes::from_static(b"b")));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
        assert_eq!(drained[0].body, Bytes::from_static(b"a"));
    }
}
