//! Aggregate: run children in parallel, succeed iff all succeed

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{Step, StepError, StepResult};

pub struct AggregateStep {
    children: Vec<Box<dyn Step>>,
}

impl AggregateStep {
    pub fn new(children: Vec<Box<dyn Step>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl Step for AggregateStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let mut set = JoinSet::new();

        for mut child in self.children.drain(..) {
            let token = abort.clone();
            set.spawn(async move { child.run(&token).await });
        }

        // Every child runs to completion even when a sibling fails or errors;
        // a failed child must not cancel a sibling mid-operation.
        let mut succeeded = true;
        let mut aborted = false;
        let mut first_error: Option<StepError> = None;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(result)) => {
                    succeeded &= result.succeeded;
                    aborted |= result.aborted;
                }
                Ok(Err(e)) => {
                    succeeded = false;
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_error) => {
                    succeeded = false;
                    if first_error.is_none() {
                        first_error = Some(StepError::InvalidPlan(format!(
                            "aggregate child panicked: {}",
                            join_error
                        )));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(StepResult { succeeded, aborted }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::steps::scripted::ScriptedStep;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_all_succeed() {
        let mut step = AggregateStep::new(vec![
            Box::new(ScriptedStep::succeeding()),
            Box::new(ScriptedStep::succeeding()),
        ]);
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(result.succeeded);
        assert!(!result.aborted);
    }

    #[tokio::test]
    async fn test_one_failure_fails_the_aggregate_but_siblings_run() {
        let ok = ScriptedStep::succeeding();
        let ran = ok.run_counter();

        let mut step = AggregateStep::new(vec![
            Box::new(ScriptedStep::failing()),
            Box::new(ok),
        ]);
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(!result.succeeded);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_child_error_bubbles_after_all_complete() {
        let ok = ScriptedStep::succeeding();
        let ran = ok.run_counter();

        let mut step = AggregateStep::new(vec![
            Box::new(ScriptedStep::erroring("boom")),
            Box::new(ok),
        ]);
        assert!(step.run(&CancellationToken::new()).await.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
