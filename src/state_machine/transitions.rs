//! Per-state handling of every command.
//!
//! Each public command takes the machine's command lock and dispatches on the
//! current state with an exhaustive `match`:
//!
//! | state                               | start   | pause   | resume  | cancel  | restart        |
//! |-------------------------------------|---------|---------|---------|---------|----------------|
//! | INITIAL                             | ✗       | ✗       | ✗       | ✗       | ✗              |
//! | INITIALIZED                         | WORKING | ✗       | ✗       | CANCELED| cancel+restart |
//! | WORKING                             | ✗       | PAUSING | ✗       | CANCELED| cancel+restart |
//! | PAUSING                             | ✗       | ✗       | WORKING | CANCELED| cancel+restart |
//! | FINISHED / CANCELED / FAILED / FAULTED | ✗    | ✗       | ✗       | ✗       | reinit+start   |
//!
//! Hook errors move the machine to FAULTED from any of the ✓ cells.

use std::sync::Arc;

use tracing::warn;

use super::machine::{TaskMachine, within};
use super::outcome::{CommandResult, ErrorCode, ErrorInfo, OperationResult};
use super::rendezvous::Rendezvous;
use super::state::{CancelHandling, Command, Ended, PauseOrCancel, Phase, State};
use super::task::Task;
use crate::error::{Hook, HookError};

enum Rendezvoused {
    Parked,
    Terminal(Ended),
    TimedOut,
}

enum CancelWait {
    Handled,
    Terminal(Ended),
    TimedOut,
}

/// Fixed failure for a command issued against a run-terminal state.
fn already(command: Command, ended: Ended) -> CommandResult {
    let code = match ended {
        Ended::Finished => ErrorCode::AlreadyFinished,
        Ended::Canceled => ErrorCode::AlreadyCanceled,
        Ended::Failed => ErrorCode::AlreadyFailed,
        Ended::Faulted => ErrorCode::AlreadyFaulted,
    };
    let state = ended.state().to_string().to_lowercase();
    CommandResult::rejected(code, format!("Cannot {command}, already {state}"))
}

fn while_initializing(command: Command) -> CommandResult {
    let code = match command {
        Command::Start => ErrorCode::StartWhileInitializing,
        Command::Pause => ErrorCode::PauseWhileInitializing,
        Command::Resume => ErrorCode::ResumeWhileInitializing,
        Command::Cancel => ErrorCode::CancelWhileInitializing,
        Command::Restart => ErrorCode::RestartWhileInitializing,
    };
    CommandResult::rejected(code, format!("Cannot {command} while initializing"))
}

/// Resolves once the published state is run-terminal.
async fn run_ended(
    states: &mut tokio::sync::watch::Receiver<State>,
) -> Result<Phase, tokio::sync::watch::error::RecvError> {
    states.wait_for(|s| s.is_terminal()).await.map(|s| s.phase())
}

fn hook_failed(err: HookError) -> CommandResult {
    CommandResult::fail_with(
        ErrorInfo::system(ErrorCode::HookFaulted, err.to_string()).with_cause(err),
    )
}

impl<T: Task> TaskMachine<T> {
    pub async fn start(&self) -> CommandResult {
        let _guard = self.commands.lock().await;
        self.start_locked()
    }

    pub async fn pause(&self) -> CommandResult {
        let _guard = self.commands.lock().await;
        self.pause_locked().await
    }

    pub async fn resume(&self) -> CommandResult {
        let _guard = self.commands.lock().await;
        self.resume_locked()
    }

    pub async fn cancel(&self) -> CommandResult {
        let _guard = self.commands.lock().await;
        self.cancel_locked().await
    }

    pub async fn restart(&self) -> CommandResult {
        let _guard = self.commands.lock().await;
        self.restart_locked().await
    }

    /// Issues `command`; convenience for scripted drivers.
    pub async fn execute(&self, command: Command) -> CommandResult {
        match command {
            Command::Start => self.start().await,
            Command::Pause => self.pause().await,
            Command::Resume => self.resume().await,
            Command::Cancel => self.cancel().await,
            Command::Restart => self.restart().await,
        }
    }

    /// Runs `on_initialize`. Only meaningful in INITIAL.
    pub(crate) fn initialize(&self) -> Result<OperationResult, HookError> {
        let state = self.current_state();
        if state != State::Initial {
            return Ok(OperationResult::fail_with(ErrorInfo::system(
                ErrorCode::InitializationFailed,
                format!("Cannot initialize, already {}", state.to_string().to_lowercase()),
            )));
        }

        match self.task.on_initialize() {
            Ok(result) if result.success() => {
                self.shared.transition(State::Initialized);
                Ok(result)
            }
            Ok(result) => {
                self.shared.transition(State::Failed);
                Ok(result)
            }
            Err(err) => {
                let err = HookError::new(Hook::Initialize, err);
                self.shared.fault(err.clone());
                Err(err)
            }
        }
    }

    fn start_locked(&self) -> CommandResult {
        match self.current_state().phase() {
            Phase::Initial => while_initializing(Command::Start),
            Phase::Initialized => {
                self.spawn_worker();
                CommandResult::succeed()
            }
            Phase::Working => {
                CommandResult::rejected(ErrorCode::StartWhileWorking, "Cannot start, already working")
            }
            Phase::Pausing => CommandResult::rejected(
                ErrorCode::StartWhilePausing,
                "Cannot start, already started and paused",
            ),
            Phase::Ended(ended) => already(Command::Start, ended),
        }
    }

    async fn pause_locked(&self) -> CommandResult {
        match self.current_state().phase() {
            Phase::Initial => while_initializing(Command::Pause),
            Phase::Initialized => {
                CommandResult::rejected(ErrorCode::PauseBeforeStart, "Cannot pause, not started yet")
            }
            Phase::Working => self.pause_working().await,
            Phase::Pausing => {
                CommandResult::rejected(ErrorCode::PauseWhilePausing, "Cannot pause, already paused")
            }
            Phase::Ended(ended) => already(Command::Pause, ended),
        }
    }

    fn resume_locked(&self) -> CommandResult {
        match self.current_state().phase() {
            Phase::Initial => while_initializing(Command::Resume),
            Phase::Initialized => CommandResult::rejected(
                ErrorCode::ResumeBeforeStart,
                "Cannot resume, not started yet",
            ),
            Phase::Working => {
                CommandResult::rejected(ErrorCode::ResumeWhileWorking, "Cannot resume, not paused")
            }
            Phase::Pausing => self.resume_pausing(),
            Phase::Ended(ended) => already(Command::Resume, ended),
        }
    }

    async fn cancel_locked(&self) -> CommandResult {
        match self.current_state().phase() {
            Phase::Initial => while_initializing(Command::Cancel),
            Phase::Initialized => self.cancel_initialized(),
            Phase::Working => self.cancel_working().await,
            Phase::Pausing => self.cancel_pausing().await,
            Phase::Ended(ended) => already(Command::Cancel, ended),
        }
    }

    async fn restart_locked(&self) -> CommandResult {
        match self.current_state().phase() {
            Phase::Initial => while_initializing(Command::Restart),
            Phase::Initialized | Phase::Working | Phase::Pausing => {
                let canceled = self.cancel_locked().await;
                if !canceled.success() {
                    return canceled;
                }
                self.reinitialize_and_start()
            }
            Phase::Ended(_) => self.reinitialize_and_start(),
        }
    }

    fn reinitialize_and_start(&self) -> CommandResult {
        // The previous worker may still be unwinding; cut it off before INITIAL
        // so its late outcome cannot land on the new run.
        self.shared.retire_run();
        match self.initialize() {
            Ok(result) if result.success() => self.start_locked(),
            Ok(result) => CommandResult::fail_with(result.error().cloned().unwrap_or_else(|| {
                ErrorInfo::system(ErrorCode::InitializationFailed, "Initialization failed")
            })),
            Err(err) => hook_failed(err),
        }
    }

    async fn pause_working(&self) -> CommandResult {
        let signal = Arc::new(Rendezvous::new());
        self.shared.lock_core().pause_signal = Some(Arc::clone(&signal));

        let limit = self.max_wait_for_pause_or_cancel();
        match self.await_parked(&signal, limit).await {
            Rendezvoused::TimedOut => {
                self.withdraw_pause_signal();
                warn!(machine = %self.id(), ?limit, "task did not pause in time");
                CommandResult::rejected(ErrorCode::PauseTimeout, "Task did not pause in time")
            }
            Rendezvoused::Terminal(ended) => {
                self.withdraw_pause_signal();
                already(Command::Pause, ended)
            }
            Rendezvoused::Parked => match self.task.on_pause() {
                Ok(()) => {
                    // The worker stays parked on the signal until resume or cancel.
                    self.shared.transition(State::Pausing);
                    CommandResult::succeed()
                }
                Err(err) => {
                    let err = HookError::new(Hook::Pause, err);
                    {
                        let mut core = self.shared.lock_core();
                        core.pause_signal = None;
                        self.shared.fault_locked(&mut core, err.clone());
                    }
                    let _ = signal.set_exception(err.clone());
                    hook_failed(err)
                }
            },
        }
    }

    fn resume_pausing(&self) -> CommandResult {
        let resumed = self.task.on_resume().map_err(|err| HookError::new(Hook::Resume, err));

        // Clear the slot before settling so the woken worker never sees it again.
        let signal = {
            let mut core = self.shared.lock_core();
            let signal = core.pause_signal.take();
            match &resumed {
                Ok(()) => self.shared.transition_locked(&mut core, State::Working),
                Err(err) => self.shared.fault_locked(&mut core, err.clone()),
            }
            signal
        };

        match (resumed, signal) {
            (Ok(()), Some(signal)) => {
                let _ = signal.set_result(PauseOrCancel::Resumed);
                CommandResult::succeed()
            }
            (Ok(()), None) => CommandResult::succeed(),
            (Err(err), signal) => {
                if let Some(signal) = signal {
                    let _ = signal.set_exception(err.clone());
                }
                hook_failed(err)
            }
        }
    }

    fn cancel_initialized(&self) -> CommandResult {
        match self.task.on_cancel() {
            Ok(()) => {
                self.shared.transition(State::Canceled);
                CommandResult::succeed()
            }
            Err(err) => {
                // No worker yet, so the command result is the only report.
                let err = HookError::new(Hook::Cancel, err);
                self.shared.fault(err.clone());
                hook_failed(err)
            }
        }
    }

    async fn cancel_working(&self) -> CommandResult {
        let signal = Arc::new(Rendezvous::new());
        self.shared.lock_core().cancel_signal = Some(Arc::clone(&signal));

        let limit = self.max_wait_for_pause_or_cancel();
        match self.await_parked(&signal, limit).await {
            Rendezvoused::TimedOut => {
                self.withdraw_cancel_signal();
                warn!(machine = %self.id(), ?limit, "task did not respond to cancellation in time");
                CommandResult::rejected(
                    ErrorCode::CancelTimeout,
                    "Task did not respond to cancellation in time",
                )
            }
            Rendezvoused::Terminal(ended) => {
                self.withdraw_cancel_signal();
                already(Command::Cancel, ended)
            }
            Rendezvoused::Parked => {
                self.shared.lock_core().cancel_signal = None;
                self.deliver_cancel(signal).await
            }
        }
    }

    /// The worker is already parked on the pause signal, so only the
    /// acknowledgement wait applies here.
    async fn cancel_pausing(&self) -> CommandResult {
        let signal = self.shared.lock_core().pause_signal.take();
        match signal {
            Some(signal) => self.deliver_cancel(signal).await,
            None => CommandResult::rejected(
                ErrorCode::CancelWithoutParkedWorker,
                "Cannot cancel, no worker is parked",
            ),
        }
    }

    /// Runs `on_cancel`, hands the decision to the parked worker, then waits for
    /// the worker to return.
    async fn deliver_cancel(&self, signal: Arc<Rendezvous>) -> CommandResult {
        if let Err(err) = self.task.on_cancel() {
            let err = HookError::new(Hook::Cancel, err);
            self.shared.fault(err.clone());
            let _ = signal.set_exception(err.clone());
            return hook_failed(err);
        }

        {
            let _core = self.shared.lock_core();
            self.shared
                .cancel_handling
                .send_replace(CancelHandling::Pending);
        }
        let _ = signal.set_result(PauseOrCancel::Canceled);

        let limit = self.max_wait_for_cancel_handling();
        match self.await_cancel_handled(limit).await {
            CancelWait::Handled => {
                let mut core = self.shared.lock_core();
                self.shared
                    .cancel_handling
                    .send_replace(CancelHandling::Unset);
                self.shared.transition_locked(&mut core, State::Canceled);
                CommandResult::succeed()
            }
            CancelWait::Terminal(ended) => {
                {
                    let _core = self.shared.lock_core();
                    self.shared
                        .cancel_handling
                        .send_replace(CancelHandling::Unset);
                }
                already(Command::Cancel, ended)
            }
            CancelWait::TimedOut => {
                let mut core = self.shared.lock_core();
                if self.shared.cancel_handling() == CancelHandling::Handled {
                    self.shared
                        .cancel_handling
                        .send_replace(CancelHandling::Unset);
                    self.shared.transition_locked(&mut core, State::Canceled);
                    return CommandResult::succeed();
                }
                self.shared
                    .cancel_handling
                    .send_replace(CancelHandling::Detached);
                drop(core);
                warn!(machine = %self.id(), ?limit, "task did not handle cancellation in time");
                CommandResult::rejected(
                    ErrorCode::CancelHandlingTimeout,
                    "Task did not handle cancellation in time",
                )
            }
        }
    }

    /// Waits for the worker to park on `signal`, or for the run to end on its own.
    async fn await_parked(
        &self,
        signal: &Rendezvous,
        limit: Option<std::time::Duration>,
    ) -> Rendezvoused {
        let mut states = self.shared.subscribe();
        let wait = async {
            tokio::select! {
                () = signal.parked() => Rendezvoused::Parked,
                Ok(Phase::Ended(ended)) = run_ended(&mut states) => {
                    Rendezvoused::Terminal(ended)
                }
            }
        };
        within(limit, wait).await.unwrap_or(Rendezvoused::TimedOut)
    }

    async fn await_cancel_handled(&self, limit: Option<std::time::Duration>) -> CancelWait {
        let mut handling = self.shared.cancel_handling.subscribe();
        let mut states = self.shared.subscribe();
        let wait = async {
            tokio::select! {
                Ok(()) = async {
                    handling
                        .wait_for(|h| *h == CancelHandling::Handled)
                        .await
                        .map(|_| ())
                } => CancelWait::Handled,
                Ok(Phase::Ended(ended)) = run_ended(&mut states) => {
                    CancelWait::Terminal(ended)
                }
            }
        };
        within(limit, wait).await.unwrap_or(CancelWait::TimedOut)
    }

    fn withdraw_pause_signal(&self) {
        if let Some(signal) = self.shared.lock_core().pause_signal.take() {
            signal.withdraw();
        }
    }

    fn withdraw_cancel_signal(&self) {
        if let Some(signal) = self.shared.lock_core().cancel_signal.take() {
            signal.withdraw();
        }
    }
}
