//! Timeout: abort the child subtree if it is not done in time
//!
//! Expiry synthesizes an abort scoped to the child and counts as failure,
//! not error, and not as an abort of the surrounding build.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use flightdeck_core::duration;

use super::{Step, StepError, StepResult};

pub struct TimeoutStep {
    step: Box<dyn Step>,
    duration: String,
}

impl TimeoutStep {
    pub fn new(step: Box<dyn Step>, duration: String) -> Self {
        Self { step, duration }
    }
}

#[async_trait]
impl Step for TimeoutStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let limit = duration::parse(&self.duration)
            .map_err(|e| StepError::InvalidPlan(format!("timeout duration: {}", e)))?;

        let child_token = abort.child_token();

        let fut = self.step.run(&child_token);
        tokio::pin!(fut);

        tokio::select! {
            result = &mut fut => return result,
            _ = tokio::time::sleep(limit) => {}
        }

        // Expired: cancel the subtree and wait for it to unwind so worker
        // processes get stopped before we report.
        child_token.cancel();
        let _ = fut.await;

        Ok(StepResult {
            succeeded: false,
            aborted: abort.is_cancelled(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::steps::aggregate::AggregateStep;
    use crate::engine::steps::scripted::ScriptedStep;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_fast_child_passes_through() {
        let mut step = TimeoutStep::new(Box::new(ScriptedStep::succeeding()), "5s".to_string());
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(result.succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_failure_not_error() {
        let mut step = TimeoutStep::new(
            Box::new(ScriptedStep::succeeding().with_delay(Duration::from_secs(60))),
            "5s".to_string(),
        );
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(!result.succeeded);
        assert!(!result.aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_inside_aggregate_fails_only_that_branch() {
        // Left child times out at 5s; right child succeeds; the aggregate
        // fails without erroring.
        let slow = TimeoutStep::new(
            Box::new(ScriptedStep::succeeding().with_delay(Duration::from_secs(60))),
            "5s".to_string(),
        );
        let fast = ScriptedStep::succeeding();
        let fast_ran = fast.run_counter();

        let mut aggregate = AggregateStep::new(vec![Box::new(slow), Box::new(fast)]);
        let result = aggregate.run(&CancellationToken::new()).await.unwrap();

        assert!(!result.succeeded);
        assert!(!result.aborted);
        assert_eq!(fast_ran.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_duration_is_a_plan_error() {
        let mut step = TimeoutStep::new(Box::new(ScriptedStep::succeeding()), "sideways".to_string());
        assert!(step.run(&CancellationToken::new()).await.is_err());
    }
}
