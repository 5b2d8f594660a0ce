use std::future::Future;

use super::machine::WorkerContext;
use super::outcome::OperationResult;

/// The lifecycle hooks a long-running task implements.
///
/// The machine drives these: `on_initialize` when the machine is built (and on
/// every restart), `on_start` on a dedicated background task after `start`,
/// and `on_pause`/`on_resume`/`on_cancel` on the command caller's side while
/// the worker is parked at its suspension point.
///
/// A hook that returns `Err` drives the machine to `Faulted`.
pub trait Task: Send + Sync + 'static {
    /// Short name used in logs and run reports.
    fn name(&self) -> &str {
        "task"
    }

    fn on_initialize(&self) -> anyhow::Result<OperationResult> {
        Ok(OperationResult::succeed())
    }

    /// The unit of work. Must call
    /// [`WorkerContext::pause_or_cancel_if_requested`] periodically to remain
    /// pausable and cancelable, and return once it reports a cancellation.
    fn on_start(
        &self,
        ctx: WorkerContext,
    ) -> impl Future<Output = anyhow::Result<OperationResult>> + Send;

    fn on_pause(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_resume(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_cancel(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
