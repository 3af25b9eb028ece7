//! Batch Processing
//!
//! Two ways to group work:
//!
//! - [`BatchProcessor`]: long-lived per-type queues drained by worker tasks,
//!   flushing on size or timeout. `add_task` never blocks and reports a full
//!   queue; `add_task_wait` waits for space.
//! - [`PrioritySplitter`]: call-and-block processing of a task list the caller
//!   already holds.

mod processor;
mod queue;
mod splitter;
mod task;

pub use processor::{
    BatchConfig, BatchHandler, BatchOutput, BatchProcessor, HandlerError, ProcessorStats,
    WorkerState, DEFAULT_BATCH_SIZE, DEFAULT_MAX_QUEUE_SIZE,
};
pub use queue::{PushError, ResultBuffer, TaskQueue};
pub use splitter::{
    ChunkedOutcome, PriorityOutcome, PrioritySplitter, PriorityTask, SplitterConfig,
    DEFAULT_HIGH_PRIORITY_THRESHOLD,
};
pub use task::{sort_for_processing, BatchTask};
