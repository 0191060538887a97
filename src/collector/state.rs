use serde::Serialize;
use std::fmt;

/// Lifecycle of one collection run.
///
/// Idle -> Running -> (Draining | Aborted) -> Finalized. A sink that cannot be
/// opened sends Idle straight to Aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CollectorState {
    Idle,
    Running,
    Draining,
    Aborted,
    Finalized,
}

impl CollectorState {
    pub fn can_transition_to(self, next: CollectorState) -> bool {
        use CollectorState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Idle, Aborted)
                | (Running, Draining)
                | (Running, Aborted)
                | (Draining, Finalized)
                | (Aborted, Finalized)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == CollectorState::Finalized
    }
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectorState::Idle => "idle",
            CollectorState::Running => "running",
            CollectorState::Draining => "draining",
            CollectorState::Aborted => "aborted",
            CollectorState::Finalized => "finalized",
        };
        write!(f, "{}", name)
    }
}
