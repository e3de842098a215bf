use ::sesame::error::{DaemonError, Result};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

pub type Action<C> = Box<dyn FnOnce(&mut C) -> Result<()> + Send>;

pub struct PendingTask<C> {
    // taken from the shared counter at enqueue time
    seq: u64,
    label: String,
    action: Action<C>,
}

/// Producer half. Cheap to clone and hand to any thread; `enqueue` never blocks.
pub struct TaskSender<C> {
    sender: Sender<PendingTask<C>>,
    next_seq: Arc<AtomicU64>,
}

impl<C> Clone for TaskSender<C> {
    fn clone(&self) -> Self {
        TaskSender {
            sender: self.sender.clone(),
            next_seq: self.next_seq.clone(),
        }
    }
}

impl<C> TaskSender<C> {
    pub fn enqueue<F>(&self, label: impl Into<String>, action: F) -> Result<()>
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        let task = PendingTask {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            label: label.into(),
            action: Box::new(action),
        };
        self.sender.send(task).map_err(|_| DaemonError::QueueClosed)
    }
}

#[derive(Debug)]
pub struct TaskFailure {
    pub label: String,
    pub error: DaemonError,
}

#[derive(Debug, Default)]
pub struct DrainReport {
    pub executed: usize,
    pub failures: Vec<TaskFailure>,
}

/// Consumer half. Owned by the main loop; the receiver is not `Sync`, so there is
/// exactly one place tasks can run.
pub struct TaskQueue<C> {
    receiver: Receiver<PendingTask<C>>,
    next_seq: Arc<AtomicU64>,
    // first task past the last cutoff, pulled off the channel but not yet run
    held: Option<PendingTask<C>>,
}

impl<C> TaskQueue<C> {
    pub fn new() -> (TaskSender<C>, TaskQueue<C>) {
        let (sender, receiver) = channel::<PendingTask<C>>();
        let next_seq = Arc::new(AtomicU64::new(0));
        let tasks = TaskSender {
            sender,
            next_seq: next_seq.clone(),
        };
        (tasks, TaskQueue { receiver, next_seq, held: None })
    }

    /// Runs everything enqueued before the call, oldest first. Tasks enqueued after
    /// it starts, from any thread, wait for the next drain. A failing or panicking
    /// task is reported and skipped; the rest still run.
    pub fn drain_all(&mut self, ctx: &mut C) -> DrainReport {
        let cutoff = self.next_seq.load(Ordering::SeqCst);
        self.drain_before(cutoff, ctx)
    }

    fn drain_before(&mut self, cutoff: u64, ctx: &mut C) -> DrainReport {
        let batch = self.take_batch(cutoff);
        let mut report = DrainReport::default();

        for task in batch {
            let PendingTask { label, action, .. } = task;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| action(ctx)));
            report.executed += 1;
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(_) => DaemonError::TaskPanicked(label.clone()),
            };
            report.failures.push(TaskFailure { label, error });
        }
        report
    }

    // Stops at the first task at or past `cutoff`, so a busy producer cannot stretch
    // the batch. That task is kept for the next drain to preserve channel order.
    fn take_batch(&mut self, cutoff: u64) -> Vec<PendingTask<C>> {
        let mut batch = Vec::new();
        while let Some(task) = self.held.take().or_else(|| self.receiver.try_recv().ok()) {
            if task.seq >= cutoff {
                self.held = Some(task);
                break;
            }
            batch.push(task);
        }
        batch
    }

    /// Drops whatever is still queued; used once at shutdown.
    pub fn discard_pending(&mut self) -> usize {
        let held = usize::from(self.held.take().is_some());
        held + self.receiver.try_iter().count()
    }
}
