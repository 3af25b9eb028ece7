//! Per-type task queue and result buffer.
//!
//! The task queue is a bounded priority heap with a single consumer (the
//! type's worker). The result buffer is an unbounded FIFO that any number of
//! callers may drain.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use super::task::BatchTask;
use crate::payload::Payload;

/// Why a task was not queued
#[derive(Debug)]
pub enum PushError {
    /// Queue is at capacity
    Full(BatchTask),
    /// Queue no longer accepts tasks
    Closed(BatchTask),
}

/// Bounded priority queue for one task type
#[derive(Debug)]
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<BatchTask>>,
    capacity: usize,
    /// Signalled on push (single consumer)
    available: Notify,
    /// Signalled when space frees up or the queue closes
    space: Notify,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            capacity,
            available: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue without waiting
    pub fn push(&self, task: BatchTask) -> Result<(), PushError> {
        if self.is_closed() {
            return Err(PushError::Closed(task));
        }
        {
            let mut heap = self.heap.lock();
            if heap.len() >= self.capacity {
                return Err(PushError::Full(task));
            }
            heap.push(task);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Enqueue, waiting up to `timeout` for space
    pub async fn push_wait(&self, task: BatchTask, timeout: Duration) -> Result<(), PushError> {
        let deadline = Instant::now() + timeout;
        let mut task = task;
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.push(task) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(t)) => task = t,
                Err(closed) => return Err(closed),
            }

            if timeout_at(deadline, notified).await.is_err() {
                return self.push(task);
            }
        }
    }

    /// Dequeue the most urgent task, if any
    pub fn try_pop(&self) -> Option<BatchTask> {
        let task = self.heap.lock().pop();
        if task.is_some() {
            self.space.notify_waiters();
        }
        task
    }

    /// Dequeue, waiting up to `timeout` for a task
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<BatchTask> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_pop() {
                return Some(task);
            }
            if timeout_at(deadline, self.available.notified()).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Drop every queued task, returning how many were dropped
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut heap = self.heap.lock();
            let n = heap.len();
            heap.clear();
            n
        };
        if dropped > 0 {
            self.space.notify_waiters();
        }
        dropped
    }

    /// Stop accepting tasks; queued tasks stay poppable
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.space.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Unbounded FIFO of handler results for one task type
#[derive(Debug, Default)]
pub struct ResultBuffer {
    items: Mutex<VecDeque<Payload>>,
    available: Notify,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Payload) {
        self.items.lock().push_back(result);
        self.available.notify_one();
    }

    pub fn extend<I: IntoIterator<Item = Payload>>(&self, results: I) {
        let added = {
            let mut items = self.items.lock();
            let before = items.len();
            items.extend(results);
            items.len() - before
        };
        for _ in 0..added {
            self.available.notify_one();
        }
    }

    pub fn try_pop(&self) -> Option<Payload> {
        self.items.lock().pop_front()
    }

    /// Oldest result, waiting up to `timeout`
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Payload> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.try_pop() {
                return Some(result);
            }
            if timeout_at(deadline, self.available.notified()).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Take up to `count` results without waiting (`None` = all)
    pub fn drain(&self, count: Option<usize>) -> Vec<Payload> {
        let mut items = self.items.lock();
        let n = count.map_or(items.len(), |c| c.min(items.len()));
        items.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn task(id: &str, priority: i32, seq: u64) -> BatchTask {
        BatchTask::new(id, Payload::from(id), "t", priority, seq)
    }

    #[test]
    fn test_push_respects_capacity() {
        let queue = TaskQueue::new(2);
        assert!(queue.push(task("a", 0, 0)).is_ok());
        assert!(queue.push(task("b", 0, 1)).is_ok());
        assert_matches!(queue.push(task("c", 0, 2)), Err(PushError::Full(_)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_in_priority_order() {
        let queue = TaskQueue::new(10);
        queue.push(task("low", 1, 0)).unwrap();
        queue.push(task("high", 9, 1)).unwrap();
        queue.push(task("mid", 5, 2)).unwrap();

        assert_eq!(queue.try_pop().unwrap().task_id(), "high");
        assert_eq!(queue.try_pop().unwrap().task_id(), "mid");
        assert_eq!(queue.try_pop().unwrap().task_id(), "low");
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_close_and_clear() {
        let queue = TaskQueue::new(10);
        queue.push(task("a", 0, 0)).unwrap();
        queue.push(task("b", 0, 1)).unwrap();

        queue.close();
        assert_matches!(queue.push(task("c", 0, 2)), Err(PushError::Closed(_)));
        // queued tasks survive close
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_timeout_wakes_on_push() {
        let queue = Arc::new(TaskQueue::new(10));
        let q = Arc::clone(&queue);
        let consumer = tokio::spawn(async move { q.pop_timeout(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(task("a", 0, 0)).unwrap();

        let popped = consumer.await.unwrap();
        assert_eq!(popped.unwrap().task_id(), "a");
    }

    #[tokio::test]
    async fn test_pop_timeout_expires() {
        let queue = TaskQueue::new(10);
        assert!(queue.pop_timeout(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_push_wait_gets_space() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.push(task("a", 0, 0)).unwrap();

        let q = Arc::clone(&queue);
        let producer =
            tokio::spawn(async move { q.push_wait(task("b", 0, 1), Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.try_pop().unwrap().task_id(), "a");

        assert!(producer.await.unwrap().is_ok());
        assert_eq!(queue.try_pop().unwrap().task_id(), "b");
    }

    #[tokio::test]
    async fn test_push_wait_times_out() {
        let queue = TaskQueue::new(1);
        queue.push(task("a", 0, 0)).unwrap();
        let result = queue.push_wait(task("b", 0, 1), Duration::from_millis(20)).await;
        assert_matches!(result, Err(PushError::Full(_)));
    }

    #[tokio::test]
    async fn test_result_buffer() {
        let results = ResultBuffer::new();
        results.extend(vec![Payload::from("1"), Payload::from("2"), Payload::from("3")]);

        assert_eq!(results.pop_timeout(Duration::from_millis(10)).await, Some(Payload::from("1")));
        assert_eq!(results.drain(Some(1)), vec![Payload::from("2")]);
        assert_eq!(results.drain(None), vec![Payload::from("3")]);
        assert!(results.pop_timeout(Duration::from_millis(10)).await.is_none());
    }
}
