//! # taskfsm
//!
//! A supervisor for one long-running asynchronous unit of work. A
//! [`TaskMachine`] wraps a [`Task`] and lets callers start, pause, resume,
//! cancel and restart it while `on_start` runs on a background tokio task.
//!
//! The worker cooperates through a single suspension point,
//! [`WorkerContext::pause_or_cancel_if_requested`]. Commands are serialized per
//! machine; `pause` and `cancel` wait (up to the configured limits) for the
//! worker to reach that point before handing it the decision.
//!
//! ```no_run
//! use taskfsm::{OperationResult, PauseOrCancel, Task, TaskMachine, WorkerContext};
//!
//! struct Crawl;
//!
//! impl Task for Crawl {
//!     async fn on_start(&self, ctx: WorkerContext) -> anyhow::Result<OperationResult> {
//!         for _page in 0..10 {
//!             if ctx.pause_or_cancel_if_requested().await? == Some(PauseOrCancel::Canceled) {
//!                 break;
//!             }
//!             // fetch a page...
//!         }
//!         Ok(OperationResult::succeed())
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let machine = TaskMachine::new(Crawl)?;
//! machine.start().await;
//! machine.pause().await;
//! machine.resume().await;
//! machine.cancel().await;
//! println!("{:?}", machine.state_history());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod demo;
pub mod error;
pub mod logging;
pub mod runner;
pub mod state_machine;

pub use error::{Hook, HookError, RendezvousError, SuspendError, TaskfsmError};
pub use state_machine::{
    Command, CommandResult, ErrorCode, ErrorInfo, MachineConfig, OperationResult, PauseOrCancel,
    Rendezvous, State, Task, TaskMachine, TransitionRecord, WorkerContext,
};
