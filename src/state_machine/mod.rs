mod machine;
mod outcome;
mod rendezvous;
mod state;
mod task;
mod transitions;

pub use machine::{MachineConfig, TaskMachine, TransitionRecord, WorkerContext};
pub use outcome::{CommandResult, ErrorCode, ErrorInfo, OperationResult};
pub use rendezvous::Rendezvous;
pub use state::{Command, PauseOrCancel, State};
pub use task::Task;
