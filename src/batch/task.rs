//! Batch tasks and their ordering.
//!
//! Tasks compare by priority (higher first), then by submission order
//! (older first). The ordering is total, so the same relation drives both
//! the per-type queue and the order of tasks inside a flushed batch.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use crate::payload::Payload;

/// A unit of work queued for a task type
#[derive(Debug, Clone)]
pub struct BatchTask {
    task_id: String,
    payload: Payload,
    task_type: String,
    priority: i32,
    enqueued_at: Instant,
    /// Submission sequence, breaks priority ties
    seq: u64,
}

impl BatchTask {
    pub fn new(
        task_id: impl Into<String>,
        payload: Payload,
        task_type: impl Into<String>,
        priority: i32,
        seq: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            payload,
            task_type: task_type.into(),
            priority,
            enqueued_at: Instant::now(),
            seq,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Time spent waiting since submission
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Hand the task to a handler as an `(id, payload)` pair
    pub fn into_pair(self) -> (String, Payload) {
        (self.task_id, self.payload)
    }

    /// Processing order: `Less` means `self` runs first
    pub fn processing_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialEq for BatchTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for BatchTask {}

impl PartialOrd for BatchTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Greater means more urgent, so a `BinaryHeap` pops the next task to run
impl Ord for BatchTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.processing_order(other).reverse()
    }
}

/// Sort tasks into processing order
pub fn sort_for_processing(tasks: &mut [BatchTask]) {
    tasks.sort_unstable_by(BatchTask::processing_order);
}
