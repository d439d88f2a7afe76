//! OnFailure: run `next` only if `step` ran and failed
//!
//! Fires on ran ∧ ¬success. Errored and aborted steps do not count as
//! failures.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Step, StepError, StepResult};

pub struct OnFailureStep {
    step: Box<dyn Step>,
    next: Box<dyn Step>,
}

impl OnFailureStep {
    pub fn new(step: Box<dyn Step>, next: Box<dyn Step>) -> Self {
        Self { step, next }
    }
}

#[async_trait]
impl Step for OnFailureStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let first = self.step.run(abort).await?;

        if first.aborted || first.succeeded {
            return Ok(first);
        }

        let hook = self.next.run(abort).await?;

        // The hook does not redeem the failure.
        Ok(StepResult {
            succeeded: false,
            aborted: hook.aborted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::steps::scripted::ScriptedStep;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_hook_runs_on_failure_and_failure_stands() {
        let hook = ScriptedStep::succeeding();
        let ran = hook.run_counter();

        let mut step = OnFailureStep::new(Box::new(ScriptedStep::failing()), Box::new(hook));
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(!result.succeeded);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_skipped_on_success() {
        let hook = ScriptedStep::succeeding();
        let ran = hook.run_counter();

        let mut step = OnFailureStep::new(Box::new(ScriptedStep::succeeding()), Box::new(hook));
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(result.succeeded);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hook_skipped_on_error() {
        let hook = ScriptedStep::succeeding();
        let ran = hook.run_counter();

        let mut step = OnFailureStep::new(Box::new(ScriptedStep::erroring("x")), Box::new(hook));
        assert!(step.run(&CancellationToken::new()).await.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hook_skipped_on_abort() {
        let hook = ScriptedStep::succeeding();
        let ran = hook.run_counter();

        let token = CancellationToken::new();
        token.cancel();

        let mut step = OnFailureStep::new(
            Box::new(ScriptedStep::failing().with_delay(std::time::Duration::from_secs(5))),
            Box::new(hook),
        );
        let result = step.run(&token).await.unwrap();
        assert!(result.aborted);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
