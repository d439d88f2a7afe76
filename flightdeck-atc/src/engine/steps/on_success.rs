//! OnSuccess: run `next` only if `step` succeeded

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Step, StepError, StepResult};

pub struct OnSuccessStep {
    step: Box<dyn Step>,
    next: Box<dyn Step>,
}

impl OnSuccessStep {
    pub fn new(step: Box<dyn Step>, next: Box<dyn Step>) -> Self {
        Self { step, next }
    }
}

#[async_trait]
impl Step for OnSuccessStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let first = self.step.run(abort).await?;

        if first.aborted || !first.succeeded {
            return Ok(first);
        }

        self.next.run(abort).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::steps::scripted::ScriptedStep;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_next_runs_after_success() {
        let next = ScriptedStep::succeeding();
        let ran = next.run_counter();

        let mut step = OnSuccessStep::new(Box::new(ScriptedStep::succeeding()), Box::new(next));
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(result.succeeded);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_next_skipped_after_failure() {
        let next = ScriptedStep::succeeding();
        let ran = next.run_counter();

        let mut step = OnSuccessStep::new(Box::new(ScriptedStep::failing()), Box::new(next));
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(!result.succeeded);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_short_circuits() {
        let next = ScriptedStep::succeeding();
        let ran = next.run_counter();

        let mut step = OnSuccessStep::new(Box::new(ScriptedStep::erroring("nope")), Box::new(next));
        assert!(step.run(&CancellationToken::new()).await.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overall_failure_when_next_fails() {
        let mut step = OnSuccessStep::new(
            Box::new(ScriptedStep::succeeding()),
            Box::new(ScriptedStep::failing()),
        );
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(!result.succeeded);
    }
}
