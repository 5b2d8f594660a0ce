use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::state_machine::State;

#[derive(Debug, Error)]
pub enum TaskfsmError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid script entry `{entry}`: {reason}")]
    Script { entry: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Names the task hook an error escaped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Hook {
    Initialize,
    Start,
    Pause,
    Resume,
    Cancel,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Initialize => write!(f, "on_initialize"),
            Hook::Start => write!(f, "on_start"),
            Hook::Pause => write!(f, "on_pause"),
            Hook::Resume => write!(f, "on_resume"),
            Hook::Cancel => write!(f, "on_cancel"),
        }
    }
}

/// An error returned (or a panic raised) by a task hook.
///
/// Cloneable so that the same failure can be reported to the command caller and
/// re-raised at the worker's suspension point.
#[derive(Debug, Clone, Error)]
#[error("{hook} failed: {cause}")]
pub struct HookError {
    hook: Hook,
    cause: Arc<anyhow::Error>,
}

impl HookError {
    pub fn new(hook: Hook, cause: anyhow::Error) -> Self {
        Self {
            hook,
            cause: Arc::new(cause),
        }
    }

    pub fn hook(&self) -> Hook {
        self.hook
    }

    /// The error the hook produced.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// True when both values carry the very same underlying error.
    pub fn same_cause(&self, other: &HookError) -> bool {
        Arc::ptr_eq(&self.cause, &other.cause)
    }
}

/// Errors settling or awaiting a rendezvous.
#[derive(Debug, Clone, Error)]
pub enum RendezvousError {
    /// The command side settled the rendezvous with a hook failure.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// The rendezvous was cleared without being settled.
    #[error("rendezvous was withdrawn before it was settled")]
    Withdrawn,

    #[error("rendezvous already has a waiter")]
    AlreadyAwaited,

    #[error("rendezvous was already settled")]
    AlreadySettled,
}

/// Errors surfaced by `WorkerContext::pause_or_cancel_if_requested`.
#[derive(Debug, Clone, Error)]
pub enum SuspendError {
    /// A pause/resume/cancel hook failed while the worker was parked.
    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("suspension point reached while {0}, expected WORKING")]
    NotWorking(State),

    #[error("suspension point reached by a worker from a previous run")]
    StaleRun,

    #[error("pause and cancel requested at the same time")]
    ConflictingRequests,

    #[error("another caller is already parked at the suspension point")]
    AlreadyParked,
}
