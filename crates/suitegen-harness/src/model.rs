//! Thin driver over an opaque behavioral model.

use suitegen_error::{GenError, Result};
use thiserror::Error;
use tracing::debug;

/// Outcome of one model step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The run continues.
    Continue,
    /// This step concluded the run; the model is ready to begin a fresh one.
    Restart,
}

impl StepOutcome {
    #[must_use]
    pub fn is_restart(self) -> bool {
        self == Self::Restart
    }
}

/// A model-internal failure, as opposed to a clean restart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ModelError(pub String);

/// An opaque stepping oracle.
///
/// `step` exercises exactly one action against the running SUT and writes
/// the model's own trace for that action to its log channel.
pub trait BehaviorModel {
    fn step(&mut self) -> std::result::Result<StepOutcome, ModelError>;
}

/// Wraps a [`BehaviorModel`] with step accounting and a per-run step ceiling.
#[derive(Debug)]
pub struct ModelDriver<M> {
    model: M,
    max_steps_per_run: u64,
    steps_in_run: u64,
    total_steps: u64,
    runs_completed: u64,
}

impl<M: BehaviorModel> ModelDriver<M> {
    #[must_use]
    pub fn new(model: M, max_steps_per_run: u64) -> Self {
        Self {
            model,
            max_steps_per_run: max_steps_per_run.max(1),
            steps_in_run: 0,
            total_steps: 0,
            runs_completed: 0,
        }
    }

    /// Advance by one action. Returns `true` when the run concluded.
    pub fn step(&mut self) -> Result<bool> {
        if self.steps_in_run >= self.max_steps_per_run {
            return Err(GenError::StepBudgetExceeded {
                max_steps: self.max_steps_per_run,
            });
        }
        self.steps_in_run += 1;
        self.total_steps = self.total_steps.saturating_add(1);
        debug!(step = self.steps_in_run, "stepping");
        let outcome = self
            .model
            .step()
            .map_err(|err| GenError::model_fault(self.total_steps, err.0))?;
        debug!(step = self.steps_in_run, outcome = ?outcome, "stepped");
        if outcome.is_restart() {
            self.steps_in_run = 0;
            self.runs_completed = self.runs_completed.saturating_add(1);
        }
        Ok(outcome.is_restart())
    }

    /// Steps taken in the current, unfinished run.
    #[must_use]
    pub fn steps_in_run(&self) -> u64 {
        self.steps_in_run
    }

    #[must_use]
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    #[must_use]
    pub fn runs_completed(&self) -> u64 {
        self.runs_completed
    }

    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Restarts after every `period` steps; fails on step `fail_at`.
    struct Periodic {
        period: u64,
        taken: u64,
        fail_at: Option<u64>,
    }

    impl BehaviorModel for Periodic {
        fn step(&mut self) -> std::result::Result<StepOutcome, ModelError> {
            self.taken += 1;
            if Some(self.taken) == self.fail_at {
                return Err(ModelError("no enabled action".to_owned()));
            }
            Ok(if self.taken % self.period == 0 {
                StepOutcome::Restart
            } else {
                StepOutcome::Continue
            })
        }
    }

    #[test]
    fn restart_resets_run_step_count() {
        let mut driver = ModelDriver::new(
            Periodic {
                period: 3,
                taken: 0,
                fail_at: None,
            },
            10,
        );
        let outcomes: Vec<bool> = (0..6).map(|_| driver.step().expect("step")).collect();
        assert_eq!(outcomes, [false, false, true, false, false, true]);
        assert_eq!(driver.runs_completed(), 2);
        assert_eq!(driver.steps_in_run(), 0);
        assert_eq!(driver.total_steps(), 6);
    }

    #[test]
    fn model_error_becomes_model_fault() {
        let mut driver = ModelDriver::new(
            Periodic {
                period: 5,
                taken: 0,
                fail_at: Some(2),
            },
            10,
        );
        driver.step().expect("first step");
        let err = driver.step().expect_err("second step should fail");
        assert!(matches!(err, GenError::ModelFault { step: 2, .. }));
        assert_eq!(err.to_string(), "model fault at step 2: no enabled action");
    }

    #[test]
    fn model_error_displays_its_detail() {
        let err: Box<dyn std::error::Error> = Box::new(ModelError("no enabled action".to_owned()));
        assert_eq!(err.to_string(), "no enabled action");
    }

    #[test]
    fn step_ceiling_is_enforced() {
        let mut driver = ModelDriver::new(
            Periodic {
                period: 100,
                taken: 0,
                fail_at: None,
            },
            2,
        );
        driver.step().expect("step 1");
        driver.step().expect("step 2");
        let err = driver.step().expect_err("ceiling reached");
        assert!(matches!(err, GenError::StepBudgetExceeded { max_steps: 2 }));
    }
}
