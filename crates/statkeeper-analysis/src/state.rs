//! Lifecycle state shared by analysis jobs and their tasks.
//!
//! ```text
//! PENDING ──► RUNNING ──► FINISHED
//!    │           │
//!    └───────────┴──────► FAILED
//! ```
//!
//! States are ranked `PENDING < RUNNING < FINISHED < FAILED`. A state only
//! ever moves up the ranking, and the two terminal states never change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// State of an analysis job or task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisState {
    /// Created, not started.
    #[default]
    Pending,
    /// At least one unit of work has started.
    Running,
    /// Completed successfully.
    Finished,
    /// Failed or was cancelled.
    Failed,
}

impl AnalysisState {
    /// Returns true for FINISHED and FAILED.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Position in the monotonic ordering; higher ranks dominate.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Finished => 2,
            Self::Failed => 3,
        }
    }

    /// Returns true if moving from `self` to `target` is allowed.
    ///
    /// Re-applying the current state is allowed (idempotent). Terminal
    /// states accept nothing else.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        if self.rank() == target.rank() {
            return true;
        }
        !self.is_terminal() && target.rank() > self.rank()
    }

    /// Validates a transition, returning an error describing a rejected one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] when
    /// [`can_transition_to`](Self::can_transition_to) is false.
    pub fn check_transition(&self, target: Self) -> Result<()> {
        if self.can_transition_to(target) {
            return Ok(());
        }
        let reason = if self.is_terminal() {
            "terminal states are final"
        } else {
            "states never regress"
        };
        Err(Error::InvalidStateTransition {
            from: self.to_string(),
            to: target.to_string(),
            reason: reason.into(),
        })
    }

    /// Returns the higher-ranked of the two states.
    #[must_use]
    pub const fn max(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }

    /// Returns a lowercase label suitable for metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            _ => Err(Error::data_definition(format!(
                "unknown analysis state '{s}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AnalysisState; 4] = [
        AnalysisState::Pending,
        AnalysisState::Running,
        AnalysisState::Finished,
        AnalysisState::Failed,
    ];

    #[test]
    fn terminal_states() {
        assert!(!AnalysisState::Pending.is_terminal());
        assert!(!AnalysisState::Running.is_terminal());
        assert!(AnalysisState::Finished.is_terminal());
        assert!(AnalysisState::Failed.is_terminal());
    }

    #[test]
    fn transitions_never_regress() {
        for from in ALL {
            for to in ALL {
                if to.rank() < from.rank() {
                    assert!(!from.can_transition_to(to), "{from} -> {to}");
                }
            }
        }
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(!AnalysisState::Finished.can_transition_to(AnalysisState::Failed));
        assert!(AnalysisState::Finished.can_transition_to(AnalysisState::Finished));
        assert!(AnalysisState::Failed.check_transition(AnalysisState::Finished).is_err());
    }

    #[test]
    fn pending_may_skip_running() {
        assert!(AnalysisState::Pending.can_transition_to(AnalysisState::Finished));
        assert!(AnalysisState::Pending.can_transition_to(AnalysisState::Failed));
    }

    #[test]
    fn max_prefers_higher_rank() {
        assert_eq!(
            AnalysisState::Running.max(AnalysisState::Pending),
            AnalysisState::Running
        );
        assert_eq!(
            AnalysisState::Finished.max(AnalysisState::Failed),
            AnalysisState::Failed
        );
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&AnalysisState::Finished).unwrap();
        assert_eq!(json, "\"FINISHED\"");
        let parsed: AnalysisState = "running".parse().unwrap();
        assert_eq!(parsed, AnalysisState::Running);
    }
}
