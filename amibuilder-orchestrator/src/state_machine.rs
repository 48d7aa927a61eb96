use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Provisioning,
    Launching,
    Dispatching,
    Collecting,
    TearingDown,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Pending => "pending",
            RunPhase::Provisioning => "provisioning",
            RunPhase::Launching => "launching",
            RunPhase::Dispatching => "dispatching",
            RunPhase::Collecting => "collecting",
            RunPhase::TearingDown => "tearing_down",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }

    /// Allowed moves. Every working phase may bail out to teardown; only
    /// teardown (or a run that never started) reaches a terminal phase.
    pub fn can_transition_to(&self, to: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (*self, to),
            (Pending, Provisioning)
                | (Pending, TearingDown)
                | (Pending, Failed)
                | (Provisioning, Launching)
                | (Provisioning, TearingDown)
                | (Launching, Dispatching)
                | (Launching, TearingDown)
                | (Dispatching, Collecting)
                | (Dispatching, TearingDown)
                | (Collecting, TearingDown)
                | (TearingDown, Completed)
                | (TearingDown, Failed)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid run transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunPhase,
    pub to: RunPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    pub from: RunPhase,
    pub to: RunPhase,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Phase tracker of one build run, with its transition history.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    run_id: String,
    phase: RunPhase,
    history: Vec<PhaseTransition>,
}

impl RunStateMachine {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            phase: RunPhase::Pending,
            history: Vec::new(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub fn into_history(self) -> Vec<PhaseTransition> {
        self.history
    }

    pub fn transition(&mut self, to: RunPhase, reason: &str) -> Result<(), InvalidTransition> {
        let from = self.phase;
        if !from.can_transition_to(to) {
            tracing::warn!(run_id = %self.run_id, %from, %to, "⚠️ [state_machine] rejected transition");
            return Err(InvalidTransition { from, to });
        }
        logger::log_quick(
            "RUN_TRANSITION",
            &self.run_id,
            Some(&format!("{} -> {} ({})", from, to, reason)),
        );
        self.phase = to;
        self.history.push(PhaseTransition {
            from,
            to,
            reason: reason.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut sm = RunStateMachine::new("r1");
        for to in [
            RunPhase::Provisioning,
            RunPhase::Launching,
            RunPhase::Dispatching,
            RunPhase::Collecting,
            RunPhase::TearingDown,
            RunPhase::Completed,
        ] {
            sm.transition(to, "step").unwrap();
        }
        assert!(sm.phase().is_terminal());
        assert_eq!(sm.history().len(), 6);
        assert_eq!(sm.history()[0].from, RunPhase::Pending);
    }

    #[test]
    fn skipping_teardown_is_rejected() {
        let mut sm = RunStateMachine::new("r2");
        sm.transition(RunPhase::Provisioning, "start").unwrap();
        let err = sm.transition(RunPhase::Completed, "done").unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                from: RunPhase::Provisioning,
                to: RunPhase::Completed
            }
        );
        assert_eq!(sm.phase(), RunPhase::Provisioning);
        sm.transition(RunPhase::TearingDown, "provision failed").unwrap();
        sm.transition(RunPhase::Failed, "provision failed").unwrap();
        assert!(!RunPhase::Failed.can_transition_to(RunPhase::Pending));
    }
}
