//! Replica processing state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a replica may pick up new work items.
///
/// Transitions:
/// - Initializing -> Working      (start signal)
/// - Initializing -> Stopped      (initialization finished without a start)
/// - Initializing/Working -> Stopping (drain requested)
/// - Stopping -> Stopped          (last in-flight item finished)
///
/// A replica with no persisted state is `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessingState {
    Initializing,
    Working,
    Stopping,
    #[default]
    Stopped,
}

impl ProcessingState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingState::Initializing => "Initializing",
            ProcessingState::Working => "Working",
            ProcessingState::Stopping => "Stopping",
            ProcessingState::Stopped => "Stopped",
        }
    }

    /// Is new work allowed to start?
    pub fn accepts_work(self) -> bool {
        matches!(self, ProcessingState::Working)
    }

    /// May a drain be requested from this state?
    pub fn can_stop(self) -> bool {
        matches!(self, ProcessingState::Working | ProcessingState::Initializing)
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown processing state '{0}'")]
pub struct UnknownProcessingState(pub String);

impl FromStr for ProcessingState {
    type Err = UnknownProcessingState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initializing" => Ok(ProcessingState::Initializing),
            "Working" => Ok(ProcessingState::Working),
            "Stopping" => Ok(ProcessingState::Stopping),
            "Stopped" => Ok(ProcessingState::Stopped),
            other => Err(UnknownProcessingState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::initializing(ProcessingState::Initializing)]
    #[case::working(ProcessingState::Working)]
    #[case::stopping(ProcessingState::Stopping)]
    #[case::stopped(ProcessingState::Stopped)]
    fn state_parses_from_its_own_name(#[case] state: ProcessingState) {
        assert_eq!(state.to_string().parse::<ProcessingState>(), Ok(state));
    }

    #[test]
    fn absent_state_defaults_to_stopped() {
        assert_eq!(ProcessingState::default(), ProcessingState::Stopped);
    }

    #[test]
    fn only_working_accepts_work() {
        assert!(ProcessingState::Working.accepts_work());
        assert!(!ProcessingState::Initializing.accepts_work());
        assert!(!ProcessingState::Stopping.accepts_work());
        assert!(!ProcessingState::Stopped.accepts_work());
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!("Paused".parse::<ProcessingState>().is_err());
    }
}
