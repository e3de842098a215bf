use crate::environment::Environment;
use crate::queue::{DrainReport, TaskQueue, TaskSender};
use crate::state::StateStore;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Everything a deferred task is allowed to touch.
pub struct Stage {
    pub store: StateStore,
    pub environment: Box<dyn Environment>,
}

/// The single serialized context. Owns the stage and the consuming half of the queue,
/// so nothing outside a `tick` can reach either.
pub struct MainLoop {
    queue: TaskQueue<Stage>,
    stage: Stage,
}

impl MainLoop {
    pub fn new(stage: Stage) -> (TaskSender<Stage>, MainLoop) {
        let (tasks, queue) = TaskQueue::new();
        return (tasks, MainLoop { queue, stage });
    }

    /// One host frame: run everything queued so far.
    pub fn tick(&mut self) -> DrainReport {
        let report = self.queue.drain_all(&mut self.stage);
        for failure in &report.failures {
            tracing::warn!(task = %failure.label, error = %failure.error, "deferred task failed");
        }
        if report.executed > 0 {
            tracing::trace!(executed = report.executed, failed = report.failures.len(), "tick");
        }
        return report;
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Ticks at `cadence` until `shutdown` is raised. Stands in for a host renderer's frame callback.
    pub fn run(&mut self, cadence: Duration, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            let frame_start = Instant::now();
            self.tick();
            if let Some(rest) = cadence.checked_sub(frame_start.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    /// Last drain before exit; whatever arrives after it is dropped.
    pub fn finish(&mut self) {
        self.tick();
        let dropped = self.queue.discard_pending();
        if dropped > 0 {
            tracing::warn!(dropped, "discarded tasks queued during shutdown");
        }
    }
}
