use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// State of one `(technique, file)` unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Skipped,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Pending => "pending",
            UnitState::Running => "running",
            UnitState::Completed => "completed",
            UnitState::Failed => "failed",
            UnitState::TimedOut => "timed_out",
            UnitState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitState::Pending | UnitState::Running)
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit state machine
///
/// ```text
/// Pending ─▶ Running ─▶ Completed | Failed | TimedOut
///    └────▶ Skipped
/// ```
#[derive(Debug, Clone)]
pub struct Unit {
    pub technique: String,
    /// Empty for global techniques
    pub path: String,
    state: UnitState,
}

impl Unit {
    pub fn new(technique: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            technique: technique.into(),
            path: path.into(),
            state: UnitState::Pending,
        }
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Transition: PENDING → RUNNING
    pub fn start(&mut self) -> Result<()> {
        self.transition(UnitState::Pending, UnitState::Running)
    }

    /// Transition: RUNNING → COMPLETED
    pub fn complete(&mut self) -> Result<()> {
        self.transition(UnitState::Running, UnitState::Completed)
    }

    /// Transition: RUNNING → FAILED
    pub fn fail(&mut self) -> Result<()> {
        self.transition(UnitState::Running, UnitState::Failed)
    }

    /// Transition: RUNNING → TIMED_OUT
    pub fn time_out(&mut self) -> Result<()> {
        self.transition(UnitState::Running, UnitState::TimedOut)
    }

    /// Transition: PENDING → SKIPPED (file was a cache hit)
    pub fn skip(&mut self) -> Result<()> {
        self.transition(UnitState::Pending, UnitState::Skipped)
    }

    fn transition(&mut self, from: UnitState, to: UnitState) -> Result<()> {
        if self.state != from {
            return Err(EngineError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_lifecycle() {
        let mut unit = Unit::new("todo-scan", "src/a.rs");
        assert_eq!(unit.state(), UnitState::Pending);
        assert!(!unit.state().is_terminal());

        unit.start().unwrap();
        assert_eq!(unit.state(), UnitState::Running);

        unit.complete().unwrap();
        assert_eq!(unit.state(), UnitState::Completed);
        assert!(unit.state().is_terminal());
    }

    #[test]
    fn test_failure_paths() {
        let mut failed = Unit::new("t", "a.rs");
        failed.start().unwrap();
        failed.fail().unwrap();
        assert_eq!(failed.state(), UnitState::Failed);

        let mut slow = Unit::new("t", "a.rs");
        slow.start().unwrap();
        slow.time_out().unwrap();
        assert_eq!(slow.state(), UnitState::TimedOut);
    }

    #[test]
    fn test_skip_only_from_pending() {
        let mut unit = Unit::new("t", "a.rs");
        unit.skip().unwrap();
        assert_eq!(unit.state(), UnitState::Skipped);

        let mut running = Unit::new("t", "a.rs");
        running.start().unwrap();
        let err = running.skip().unwrap_err();
        assert_eq!(err.to_string(), "Invalid unit transition: running -> skipped");
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut unit = Unit::new("t", "a.rs");
        unit.start().unwrap();
        unit.complete().unwrap();

        assert!(unit.start().is_err());
        assert!(unit.fail().is_err());
        assert_eq!(unit.state(), UnitState::Completed);
    }
}
