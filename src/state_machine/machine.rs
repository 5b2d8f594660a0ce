//! The machine orchestrator: current state, transition history, the two
//! rendezvous slots and the lifecycle of the background worker.
//!
//! Command dispatch (what each state does with start/pause/resume/cancel/
//! restart) lives in `transitions.rs`; this module holds the shared core both
//! parties touch and the hook surface handed to the worker.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::outcome::OperationResult;
use super::rendezvous::Rendezvous;
use super::state::{CancelHandling, PauseOrCancel, State};
use super::task::Task;
use crate::error::{Hook, HookError, RendezvousError, SuspendError};

/// Per-instance bounded waits. `None` waits without limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineConfig {
    /// How long `pause`/`cancel` wait for the worker to reach its suspension point.
    pub max_wait_for_pause_or_cancel: Option<Duration>,
    /// How long `cancel` waits for the worker to return after being told to cancel.
    pub max_wait_for_cancel_handling: Option<Duration>,
}

/// One entry of the transition history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub state: State,
    pub at: DateTime<Utc>,
}

pub(crate) struct Core {
    pub(crate) history: Vec<TransitionRecord>,
    pub(crate) pause_signal: Option<Arc<Rendezvous>>,
    pub(crate) cancel_signal: Option<Arc<Rendezvous>>,
    /// Bumped on every start; a worker only touches the run it was spawned for.
    pub(crate) generation: u64,
    pub(crate) last_fault: Option<HookError>,
}

/// State shared between the command side and the worker.
pub(crate) struct Shared {
    pub(crate) id: Uuid,
    state: watch::Sender<State>,
    pub(crate) cancel_handling: watch::Sender<CancelHandling>,
    core: Mutex<Core>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(State::Initial);
        let (cancel_handling, _) = watch::channel(CancelHandling::Unset);
        Self {
            id: Uuid::new_v4(),
            state,
            cancel_handling,
            core: Mutex::new(Core {
                history: vec![TransitionRecord {
                    state: State::Initial,
                    at: Utc::now(),
                }],
                pause_signal: None,
                cancel_signal: None,
                generation: 0,
                last_fault: None,
            }),
        }
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current_state(&self) -> State {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    pub(crate) fn cancel_handling(&self) -> CancelHandling {
        *self.cancel_handling.borrow()
    }

    /// Appends to the history and publishes the new state. Caller holds the core lock.
    pub(crate) fn transition_locked(&self, core: &mut Core, to: State) {
        let from = self.current_state();
        core.history.push(TransitionRecord {
            state: to,
            at: Utc::now(),
        });
        self.state.send_replace(to);
        debug!(machine = %self.id, %from, %to, "state transition");
    }

    pub(crate) fn transition(&self, to: State) {
        let mut core = self.lock_core();
        self.transition_locked(&mut core, to);
    }

    pub(crate) fn fault_locked(&self, core: &mut Core, err: HookError) {
        error!(machine = %self.id, hook = %err.hook(), error = %err.cause(), "task hook faulted");
        core.last_fault = Some(err);
        if self.current_state() != State::Faulted {
            self.transition_locked(core, State::Faulted);
        }
    }

    pub(crate) fn fault(&self, err: HookError) {
        let mut core = self.lock_core();
        self.fault_locked(&mut core, err);
    }

    /// Moves back to INITIAL for a restart and detaches any worker still
    /// running from the previous run.
    pub(crate) fn retire_run(&self) {
        let mut core = self.lock_core();
        core.generation += 1;
        for signal in [core.pause_signal.take(), core.cancel_signal.take()]
            .into_iter()
            .flatten()
        {
            signal.withdraw();
        }
        self.cancel_handling.send_replace(CancelHandling::Unset);
        self.transition_locked(&mut core, State::Initial);
    }

    /// Applies the worker's final outcome to the run it belonged to.
    fn complete_run(&self, generation: u64, outcome: &Result<OperationResult, HookError>) {
        let mut core = self.lock_core();
        if core.generation != generation {
            debug!(machine = %self.id, generation, "worker from a previous run finished");
            return;
        }

        let state = self.current_state();
        match outcome {
            Err(err) => {
                if state != State::Faulted {
                    self.fault_locked(&mut core, err.clone());
                }
            }
            // Faulted (or otherwise settled) while the worker was winding down.
            Ok(_) if state.is_terminal() => {}
            Ok(result) if !result.success() => {
                info!(machine = %self.id, %result, "worker returned a failure");
                self.transition_locked(&mut core, State::Failed);
            }
            Ok(_) => match self.cancel_handling() {
                CancelHandling::Pending => {
                    // The in-flight cancel owns the move to CANCELED.
                    self.cancel_handling.send_replace(CancelHandling::Handled);
                }
                CancelHandling::Detached => {
                    self.cancel_handling.send_replace(CancelHandling::Unset);
                    self.transition_locked(&mut core, State::Canceled);
                }
                CancelHandling::Unset | CancelHandling::Handled => {
                    self.transition_locked(&mut core, State::Finished);
                }
            },
        }
    }
}

/// Handle given to `Task::on_start`.
#[derive(Clone)]
pub struct WorkerContext {
    shared: Arc<Shared>,
    generation: u64,
}

impl WorkerContext {
    /// The single cooperative suspension point.
    ///
    /// Returns `Ok(None)` immediately when nothing is requested. When a pause or
    /// cancel is pending, parks until the command side decides and returns that
    /// decision, or re-raises the hook failure that faulted the machine.
    pub async fn pause_or_cancel_if_requested(
        &self,
    ) -> Result<Option<PauseOrCancel>, SuspendError> {
        let signal = {
            let core = self.shared.lock_core();
            if core.generation != self.generation {
                return Err(SuspendError::StaleRun);
            }
            let state = self.shared.current_state();
            if state != State::Working {
                return Err(SuspendError::NotWorking(state));
            }
            match (&core.pause_signal, &core.cancel_signal) {
                (None, None) => return Ok(None),
                (Some(signal), None) | (None, Some(signal)) => Arc::clone(signal),
                (Some(_), Some(_)) => return Err(SuspendError::ConflictingRequests),
            }
        };

        match signal.wait().await {
            Ok(decision) => Ok(Some(decision)),
            Err(RendezvousError::Hook(err)) => Err(SuspendError::Hook(err)),
            Err(RendezvousError::Withdrawn) => Ok(None),
            Err(RendezvousError::AlreadyAwaited | RendezvousError::AlreadySettled) => {
                Err(SuspendError::AlreadyParked)
            }
        }
    }

    pub fn machine_id(&self) -> Uuid {
        self.shared.id
    }
}

type WorkerHandle = JoinHandle<Result<OperationResult, HookError>>;

/// Supervises one [`Task`]: lets callers start, pause, resume, cancel and
/// restart it while `on_start` runs on a background tokio task.
///
/// Every command holds a per-instance lock for its whole duration, so commands
/// never interleave. `pause` and `cancel` may wait up to the configured
/// timeouts for the worker to reach its suspension point.
pub struct TaskMachine<T: Task> {
    pub(crate) task: Arc<T>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) commands: tokio::sync::Mutex<()>,
    config: Mutex<MachineConfig>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl<T: Task> TaskMachine<T> {
    /// Builds the machine and runs `on_initialize`.
    ///
    /// A hook error leaves the (discarded) machine `Faulted` and is returned. A
    /// returned failure yields a machine in `Failed`.
    pub fn new(task: T) -> Result<Self, HookError> {
        Self::with_config(task, MachineConfig::default())
    }

    pub fn with_config(task: T, config: MachineConfig) -> Result<Self, HookError> {
        let machine = Self {
            task: Arc::new(task),
            shared: Arc::new(Shared::new()),
            commands: tokio::sync::Mutex::new(()),
            config: Mutex::new(config),
            worker: Mutex::new(None),
        };
        machine.initialize()?;
        Ok(machine)
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn current_state(&self) -> State {
        self.shared.current_state()
    }

    /// Snapshot of every state entered so far, starting with `Initial`.
    pub fn state_history(&self) -> Vec<State> {
        self.shared
            .lock_core()
            .history
            .iter()
            .map(|record| record.state)
            .collect()
    }

    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.shared.lock_core().history.clone()
    }

    /// The hook failure that last faulted the machine, if any.
    pub fn last_fault(&self) -> Option<HookError> {
        self.shared.lock_core().last_fault.clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.shared.subscribe()
    }

    /// Waits until the current state satisfies `predicate`.
    pub async fn wait_for_state(&self, mut predicate: impl FnMut(State) -> bool) -> State {
        let mut rx = self.shared.subscribe();
        match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            Err(_) => self.current_state(),
        }
    }

    pub fn config(&self) -> MachineConfig {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_wait_for_pause_or_cancel(&self) -> Option<Duration> {
        self.config().max_wait_for_pause_or_cancel
    }

    pub fn set_max_wait_for_pause_or_cancel(&self, limit: Option<Duration>) {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .max_wait_for_pause_or_cancel = limit;
    }

    pub fn max_wait_for_cancel_handling(&self) -> Option<Duration> {
        self.config().max_wait_for_cancel_handling
    }

    pub fn set_max_wait_for_cancel_handling(&self, limit: Option<Duration>) {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .max_wait_for_cancel_handling = limit;
    }

    /// Awaits the most recently started worker.
    ///
    /// Returns `None` when no worker was started (or it was already joined). An
    /// error raised out of `on_start`, including a panic, comes back as `Err`.
    pub async fn join_worker(&self) -> Option<Result<OperationResult, HookError>> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(match handle.await {
            Ok(outcome) => outcome,
            Err(join) => Err(HookError::new(
                Hook::Start,
                anyhow::anyhow!("worker task failed: {join}"),
            )),
        })
    }

    /// Moves to `Working` and launches `on_start` in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn_worker(&self) {
        let generation = {
            let mut core = self.shared.lock_core();
            core.generation += 1;
            self.shared
                .cancel_handling
                .send_replace(CancelHandling::Unset);
            self.shared.transition_locked(&mut core, State::Working);
            core.generation
        };

        let ctx = WorkerContext {
            shared: Arc::clone(&self.shared),
            generation,
        };
        let task = Arc::clone(&self.task);
        let shared = Arc::clone(&self.shared);
        info!(machine = %shared.id, task = task.name(), generation, "worker starting");

        let handle = tokio::spawn(async move {
            // Run the hook on its own task so a panic is observed as a fault.
            let run = tokio::spawn(async move { task.on_start(ctx).await });
            let outcome = match run.await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(err)) => Err(reraised(err)),
                Err(join) if join.is_panic() => Err(HookError::new(
                    Hook::Start,
                    anyhow::anyhow!("worker panicked: {join}"),
                )),
                Err(join) => Err(HookError::new(
                    Hook::Start,
                    anyhow::anyhow!("worker aborted: {join}"),
                )),
            };
            shared.complete_run(generation, &outcome);
            info!(machine = %shared.id, generation, ok = outcome.is_ok(), "worker finished");
            outcome
        });

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

/// A hook failure the worker got from its suspension point and propagated
/// keeps its identity; anything else is a fault of `on_start` itself.
fn reraised(err: anyhow::Error) -> HookError {
    match err.downcast_ref::<SuspendError>() {
        Some(SuspendError::Hook(hook)) => hook.clone(),
        _ => HookError::new(Hook::Start, err),
    }
}

/// Runs `fut` to completion, or gives up after `limit`.
pub(crate) async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::ErrorInfo;

    struct Idle;

    impl Task for Idle {
        async fn on_start(&self, _ctx: WorkerContext) -> anyhow::Result<OperationResult> {
            Ok(OperationResult::succeed())
        }
    }

    struct Refuses;

    impl Task for Refuses {
        fn on_initialize(&self) -> anyhow::Result<OperationResult> {
            Ok(OperationResult::fail_with(ErrorInfo::new("missing input")))
        }

        async fn on_start(&self, _ctx: WorkerContext) -> anyhow::Result<OperationResult> {
            Ok(OperationResult::succeed())
        }
    }

    struct Explodes;

    impl Task for Explodes {
        fn on_initialize(&self) -> anyhow::Result<OperationResult> {
            anyhow::bail!("no config")
        }

        async fn on_start(&self, _ctx: WorkerContext) -> anyhow::Result<OperationResult> {
            Ok(OperationResult::succeed())
        }
    }

    struct Panics;

    impl Task for Panics {
        async fn on_start(&self, _ctx: WorkerContext) -> anyhow::Result<OperationResult> {
            panic!("worker blew up");
        }
    }

    #[test]
    fn construction_initializes() {
        let machine = TaskMachine::new(Idle).unwrap();
        assert_eq!(machine.current_state(), State::Initialized);
        assert_eq!(
            machine.state_history(),
            vec![State::Initial, State::Initialized]
        );
        assert_eq!(machine.config(), MachineConfig::default());
    }

    #[test]
    fn initialization_failure_lands_in_failed() {
        let machine = TaskMachine::new(Refuses).unwrap();
        assert_eq!(machine.current_state(), State::Failed);
        assert_eq!(machine.state_history(), vec![State::Initial, State::Failed]);
    }

    #[test]
    fn initialization_error_fails_construction() {
        let err = TaskMachine::new(Explodes).err().expect("construction should fail");
        assert_eq!(err.hook(), Hook::Initialize);
        assert_eq!(err.cause().to_string(), "no config");
    }

    #[test]
    fn timeouts_are_mutable() {
        let machine = TaskMachine::new(Idle).unwrap();
        assert_eq!(machine.max_wait_for_pause_or_cancel(), None);
        machine.set_max_wait_for_pause_or_cancel(Some(Duration::from_millis(10)));
        machine.set_max_wait_for_cancel_handling(Some(Duration::from_millis(20)));
        assert_eq!(
            machine.max_wait_for_pause_or_cancel(),
            Some(Duration::from_millis(10))
        );
        assert_eq!(
            machine.max_wait_for_cancel_handling(),
            Some(Duration::from_millis(20))
        );
    }

    #[tokio::test]
    async fn worker_success_finishes() {
        let machine = TaskMachine::new(Idle).unwrap();
        assert!(machine.start().await.success());
        let outcome = machine.join_worker().await.unwrap();
        assert!(outcome.unwrap().success());
        assert_eq!(machine.current_state(), State::Finished);
        assert!(machine.join_worker().await.is_none());
    }

    #[tokio::test]
    async fn worker_panic_faults() {
        let machine = TaskMachine::new(Panics).unwrap();
        machine.start().await;
        let err = machine.join_worker().await.unwrap().unwrap_err();
        assert_eq!(err.hook(), Hook::Start);
        assert!(err.cause().to_string().contains("worker panicked"));
        assert_eq!(machine.current_state(), State::Faulted);
        assert!(machine.last_fault().is_some());
    }

    #[tokio::test]
    async fn transitions_are_timestamped_in_order() {
        let machine = TaskMachine::new(Idle).unwrap();
        machine.start().await;
        machine.join_worker().await;
        let records = machine.transitions();
        assert_eq!(records.len(), 4);
        assert!(records.windows(2).all(|pair| pair[0].at <= pair[1].at));
    }

    #[tokio::test]
    async fn suspension_point_outside_working_is_rejected() {
        let machine = TaskMachine::new(Idle).unwrap();
        let ctx = WorkerContext {
            shared: Arc::clone(&machine.shared),
            generation: 0,
        };
        assert!(matches!(
            ctx.pause_or_cancel_if_requested().await,
            Err(SuspendError::NotWorking(State::Initialized))
        ));
    }

    #[tokio::test]
    async fn retired_run_ignores_its_late_worker() {
        let machine = TaskMachine::new(Idle).unwrap();
        machine.start().await;
        machine.join_worker().await;
        let finished_run = machine.shared.lock_core().generation;

        machine.shared.retire_run();
        let late = Err(HookError::new(Hook::Start, anyhow::anyhow!("late")));
        machine.shared.complete_run(finished_run, &late);

        assert_eq!(machine.current_state(), State::Initial);
        assert!(machine.last_fault().is_none());
        assert_eq!(
            machine.state_history()[3..],
            [State::Finished, State::Initial]
        );
    }

    #[test]
    fn propagated_hook_failure_keeps_its_identity() {
        let hook = HookError::new(Hook::Cancel, anyhow::anyhow!("cancel broke"));
        let propagated = anyhow::Error::from(SuspendError::Hook(hook.clone()));
        assert!(reraised(propagated).same_cause(&hook));

        let own = reraised(anyhow::anyhow!("bad input"));
        assert_eq!(own.hook(), Hook::Start);
    }

    #[tokio::test]
    async fn both_signals_pending_is_an_invariant_violation() {
        let machine = TaskMachine::new(Idle).unwrap();
        let ctx = WorkerContext {
            shared: Arc::clone(&machine.shared),
            generation: 0,
        };
        {
            let mut core = machine.shared.lock_core();
            machine.shared.transition_locked(&mut core, State::Working);
            core.pause_signal = Some(Arc::new(Rendezvous::new()));
            core.cancel_signal = Some(Arc::new(Rendezvous::new()));
        }
        assert!(matches!(
            ctx.pause_or_cancel_if_requested().await,
            Err(SuspendError::ConflictingRequests)
        ));
    }
}
