//! Ensure: always run `next` after `step`
//!
//! Final success = success(step) ∧ success(next). The hook runs even when the
//! step errored or the build is aborting; the step's error, if any, still
//! wins.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Step, StepError, StepResult};

pub struct EnsureStep {
    step: Box<dyn Step>,
    next: Box<dyn Step>,
}

impl EnsureStep {
    pub fn new(step: Box<dyn Step>, next: Box<dyn Step>) -> Self {
        Self { step, next }
    }
}

#[async_trait]
impl Step for EnsureStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let first = self.step.run(abort).await;
        let second = self.next.run(abort).await;

        match (first, second) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(a), Ok(b)) => Ok(StepResult {
                succeeded: a.succeeded && b.succeeded,
                aborted: a.aborted || b.aborted,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::steps::scripted::ScriptedStep;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_hook_runs_on_success_and_failure() {
        for (outcome, expected) in [
            (ScriptedStep::succeeding(), true),
            (ScriptedStep::failing(), false),
        ] {
            let hook = ScriptedStep::succeeding();
            let ran = hook.run_counter();

            let mut step = EnsureStep::new(Box::new(outcome), Box::new(hook));
            let result = step.run(&CancellationToken::new()).await.unwrap();
            assert_eq!(result.succeeded, expected);
            assert_eq!(ran.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_hook_runs_even_when_step_errors() {
        let hook = ScriptedStep::succeeding();
        let ran = hook.run_counter();

        let mut step = EnsureStep::new(Box::new(ScriptedStep::erroring("x")), Box::new(hook));
        assert!(step.run(&CancellationToken::new()).await.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_hook_fails_the_whole() {
        let mut step = EnsureStep::new(
            Box::new(ScriptedStep::succeeding()),
            Box::new(ScriptedStep::failing()),
        );
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(!result.succeeded);
    }
}
