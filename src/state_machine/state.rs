use std::fmt;

use serde::{Deserialize, Serialize};

/// The eight states of a task machine.
///
/// A run flows through: INITIAL → INITIALIZED → WORKING ⇄ PAUSING → one of
/// FINISHED, CANCELED, FAILED or FAULTED. The four run-terminal states only
/// move again through a restart, which loops back to INITIAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Initial,
    Initialized,
    Working,
    Pausing,
    Finished,
    Canceled,
    Failed,
    Faulted,
}

impl State {
    /// True for the states a run ends in.
    pub fn is_terminal(self) -> bool {
        matches!(self.phase(), Phase::Ended(_))
    }

    /// Splits the run-terminal states off so dispatch can handle them as one case.
    pub(crate) fn phase(self) -> Phase {
        match self {
            State::Initial => Phase::Initial,
            State::Initialized => Phase::Initialized,
            State::Working => Phase::Working,
            State::Pausing => Phase::Pausing,
            State::Finished => Phase::Ended(Ended::Finished),
            State::Canceled => Phase::Ended(Ended::Canceled),
            State::Failed => Phase::Ended(Ended::Failed),
            State::Faulted => Phase::Ended(Ended::Faulted),
        }
    }
}

/// [`State`] as seen by command dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Initial,
    Initialized,
    Working,
    Pausing,
    Ended(Ended),
}

/// A run-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ended {
    Finished,
    Canceled,
    Failed,
    Faulted,
}

impl Ended {
    pub(crate) fn state(self) -> State {
        match self {
            Ended::Finished => State::Finished,
            Ended::Canceled => State::Canceled,
            Ended::Failed => State::Failed,
            Ended::Faulted => State::Faulted,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Initial => write!(f, "INITIAL"),
            State::Initialized => write!(f, "INITIALIZED"),
            State::Working => write!(f, "WORKING"),
            State::Pausing => write!(f, "PAUSING"),
            State::Finished => write!(f, "FINISHED"),
            State::Canceled => write!(f, "CANCELED"),
            State::Failed => write!(f, "FAILED"),
            State::Faulted => write!(f, "FAULTED"),
        }
    }
}

/// A user-issued command against a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Start,
    Pause,
    Resume,
    Cancel,
    Restart,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => write!(f, "start"),
            Command::Pause => write!(f, "pause"),
            Command::Resume => write!(f, "resume"),
            Command::Cancel => write!(f, "cancel"),
            Command::Restart => write!(f, "restart"),
        }
    }
}

impl std::str::FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "cancel" => Ok(Command::Cancel),
            "restart" => Ok(Command::Restart),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

/// What the command side hands to a worker parked at its suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseOrCancel {
    /// The pause is over; keep working.
    Resumed,
    /// Stop working and return from `on_start`.
    Canceled,
}

/// Tri-state acknowledgement of a delivered cancellation, plus the case where
/// the canceller gave up waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelHandling {
    Unset,
    Pending,
    Handled,
    /// The cancel command timed out; a late successful return still cancels.
    Detached,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        let terminal: Vec<State> = [
            State::Initial,
            State::Initialized,
            State::Working,
            State::Pausing,
            State::Finished,
            State::Canceled,
            State::Failed,
            State::Faulted,
        ]
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();
        assert_eq!(
            terminal,
            vec![State::Finished, State::Canceled, State::Failed, State::Faulted]
        );
    }

    #[test]
    fn phase_keeps_the_ended_state() {
        assert_eq!(State::Working.phase(), Phase::Working);
        assert_eq!(State::Failed.phase(), Phase::Ended(Ended::Failed));
        assert_eq!(Ended::Canceled.state(), State::Canceled);
    }

    #[test]
    fn state_display() {
        assert_eq!(State::Initial.to_string(), "INITIAL");
        assert_eq!(State::Pausing.to_string(), "PAUSING");
        assert_eq!(State::Faulted.to_string(), "FAULTED");
    }

    #[test]
    fn command_parses_case_insensitively() {
        assert_eq!(" Pause ".parse::<Command>(), Ok(Command::Pause));
        assert_eq!("RESTART".parse::<Command>(), Ok(Command::Restart));
        assert!("explode".parse::<Command>().is_err());
    }

    #[test]
    fn state_serializes_by_name() {
        let json = serde_json::to_string(&vec![State::Initial, State::Working]).unwrap();
        assert_eq!(json, r#"["Initial","Working"]"#);
    }
}
