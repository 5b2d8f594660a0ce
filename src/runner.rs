//! Drives a machine through a timed script of commands and records what happened.
//!
//! A [`Script`] is written as `"pause@1500,resume@2500,cancel@4000"`: each entry
//! is a command and an offset in milliseconds from the moment the run starts.
//! [`ScriptRunner::run`] starts the machine, issues each command at its offset,
//! waits (bounded) for the worker, and produces a serializable [`RunReport`].

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::info;
use uuid::Uuid;

use crate::error::TaskfsmError;
use crate::state_machine::{Command, CommandResult, State, Task, TaskMachine, TransitionRecord};

/// One scripted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledCommand {
    pub command: Command,
    pub at: Duration,
}

impl FromStr for ScheduledCommand {
    type Err = TaskfsmError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| TaskfsmError::Script {
            entry: entry.to_string(),
            reason,
        };
        let (command, at) = entry
            .split_once('@')
            .ok_or_else(|| invalid("expected COMMAND@MILLIS".into()))?;
        let command = command.parse::<Command>().map_err(invalid)?;
        let at = at
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid(format!("bad offset: {e}")))?;
        Ok(Self {
            command,
            at: Duration::from_millis(at),
        })
    }
}

/// Commands ordered by offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    commands: Vec<ScheduledCommand>,
}

impl Script {
    pub fn new(mut commands: Vec<ScheduledCommand>) -> Self {
        commands.sort_by_key(|c| c.at);
        Self { commands }
    }

    pub fn commands(&self) -> &[ScheduledCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Pause, resume, pause, cancel: exercises every rendezvous path.
    pub fn demo(step: Duration) -> Self {
        let step_ms = u64::try_from(step.as_millis()).unwrap_or(u64::MAX);
        let at = |tenths: u64| Duration::from_millis(step_ms.saturating_mul(tenths) / 10);
        Self::new(vec![
            ScheduledCommand { command: Command::Pause, at: at(15) },
            ScheduledCommand { command: Command::Resume, at: at(25) },
            ScheduledCommand { command: Command::Pause, at: at(32) },
            ScheduledCommand { command: Command::Cancel, at: at(40) },
        ])
    }
}

impl FromStr for Script {
    type Err = TaskfsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let commands = s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(commands))
    }
}

/// What a scripted command returned.
#[derive(Debug, Clone, Serialize)]
pub struct CommandLog {
    pub command: Command,
    pub issued_at_ms: u64,
    pub success: bool,
    pub code: Option<i32>,
    pub result: String,
    pub state_after: State,
}

/// Structured record produced at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub machine_id: Uuid,
    pub task: String,
    pub final_state: State,
    pub transitions: Vec<TransitionRecord>,
    pub commands: Vec<CommandLog>,
    pub worker_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunReport {
    pub fn state_history(&self) -> Vec<State> {
        self.transitions.iter().map(|t| t.state).collect()
    }
}

/// Plays a [`Script`] against a machine.
pub struct ScriptRunner {
    /// Upper bound on waiting for the worker once the script is exhausted.
    pub settle_timeout: Duration,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(60),
        }
    }
}

impl ScriptRunner {
    pub fn new(settle_timeout: Duration) -> Self {
        Self { settle_timeout }
    }

    /// Starts `machine`, plays `script`, then waits for the run to settle.
    pub async fn run<T: Task>(&self, machine: &TaskMachine<T>, script: &Script) -> RunReport {
        let started_at = Utc::now();
        let origin = Instant::now();
        let mut commands = Vec::with_capacity(script.commands().len() + 1);

        let start = machine.start().await;
        commands.push(log_entry(Command::Start, Duration::ZERO, &start, machine.current_state()));

        for scheduled in script.commands() {
            sleep(scheduled.at.saturating_sub(origin.elapsed())).await;
            let issued = origin.elapsed();
            let result = machine.execute(scheduled.command).await;
            info!(command = %scheduled.command, %result, "scripted command");
            commands.push(log_entry(scheduled.command, issued, &result, machine.current_state()));
        }

        let worker_error = match tokio::time::timeout(self.settle_timeout, machine.join_worker()).await {
            Ok(Some(Err(err))) => Some(err.to_string()),
            Ok(_) => None,
            Err(_) => Some(format!(
                "worker still running after {}ms",
                self.settle_timeout.as_millis()
            )),
        };

        let completed_at = Utc::now();
        RunReport {
            machine_id: machine.id(),
            task: machine.task().name().to_string(),
            final_state: machine.current_state(),
            transitions: machine.transitions(),
            commands,
            worker_error,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        }
    }
}

fn log_entry(
    command: Command,
    issued: Duration,
    result: &CommandResult,
    state_after: State,
) -> CommandLog {
    CommandLog {
        command,
        issued_at_ms: issued.as_millis() as u64,
        success: result.success(),
        code: result.error().map(|e| e.numeric_code()),
        result: result.to_string(),
        state_after,
    }
}
