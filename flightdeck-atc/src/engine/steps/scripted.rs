//! Scripted fake steps for composite-operator tests

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{Step, StepError, StepResult};

/// A step that plays back a canned outcome, recording that it ran.
pub struct ScriptedStep {
    outcome: Outcome,
    delay: Duration,
    runs: Arc<AtomicUsize>,
}

enum Outcome {
    Succeed,
    Fail,
    Error(String),
}

impl ScriptedStep {
    pub fn succeeding() -> Self {
        Self::new(Outcome::Succeed)
    }

    pub fn failing() -> Self {
        Self::new(Outcome::Fail)
    }

    pub fn erroring(message: &str) -> Self {
        Self::new(Outcome::Error(message.to_string()))
    }

    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep this long before finishing, unless aborted first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// A counter observing how many times this step ran.
    pub fn run_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }
}

#[async_trait]
impl Step for ScriptedStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = abort.cancelled() => return Ok(StepResult::aborted()),
            }
        } else if abort.is_cancelled() {
            return Ok(StepResult::aborted());
        }

        match &self.outcome {
            Outcome::Succeed => Ok(StepResult::success()),
            Outcome::Fail => Ok(StepResult::failure()),
            Outcome::Error(message) => Err(StepError::InvalidPlan(message.clone())),
        }
    }
}
