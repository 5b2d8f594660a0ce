//! A demonstration task: counts through a fixed number of steps.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::info;

use crate::state_machine::{OperationResult, PauseOrCancel, Task, WorkerContext};

/// Loops `iterations` times over (suspension point + `step` sleep).
///
/// Returns success early when canceled. `completed` counts finished steps of
/// the current run and is reset on every (re)initialization.
pub struct CountingTask {
    iterations: u32,
    step: Duration,
    completed: AtomicU32,
}

impl CountingTask {
    pub fn new(iterations: u32, step: Duration) -> Self {
        Self {
            iterations,
            step,
            completed: AtomicU32::new(0),
        }
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Task for CountingTask {
    fn name(&self) -> &str {
        "counting"
    }

    fn on_initialize(&self) -> anyhow::Result<OperationResult> {
        self.completed.store(0, Ordering::SeqCst);
        Ok(OperationResult::succeed())
    }

    async fn on_start(&self, ctx: WorkerContext) -> anyhow::Result<OperationResult> {
        for step in 0..self.iterations {
            match ctx.pause_or_cancel_if_requested().await? {
                Some(PauseOrCancel::Canceled) => {
                    info!(step, "counting task canceled");
                    return Ok(OperationResult::succeed());
                }
                Some(PauseOrCancel::Resumed) => info!(step, "counting task resumed"),
                None => {}
            }
            tokio::time::sleep(self.step).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(OperationResult::succeed())
    }

    fn on_pause(&self) -> anyhow::Result<()> {
        info!(completed = self.completed(), "counting task pausing");
        Ok(())
    }

    fn on_cancel(&self) -> anyhow::Result<()> {
        info!(completed = self.completed(), "counting task canceling");
        Ok(())
    }
}
