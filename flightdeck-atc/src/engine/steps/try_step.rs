//! Try: mask failure to success; errors still propagate

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Step, StepError, StepResult};

pub struct TryStep {
    step: Box<dyn Step>,
}

impl TryStep {
    pub fn new(step: Box<dyn Step>) -> Self {
        Self { step }
    }
}

#[async_trait]
impl Step for TryStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let result = self.step.run(abort).await?;

        if result.aborted {
            return Ok(result);
        }

        Ok(StepResult::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::steps::scripted::ScriptedStep;

    #[tokio::test]
    async fn test_failure_is_masked() {
        let mut step = TryStep::new(Box::new(ScriptedStep::failing()));
        let result = step.run(&CancellationToken::new()).await.unwrap();
        assert!(result.succeeded);
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let mut step = TryStep::new(Box::new(ScriptedStep::erroring("x")));
        assert!(step.run(&CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_abort_is_not_masked() {
        let token = CancellationToken::new();
        token.cancel();

        let mut step = TryStep::new(Box::new(
            ScriptedStep::succeeding().with_delay(std::time::Duration::from_secs(5)),
        ));
        let result = step.run(&token).await.unwrap();
        assert!(result.aborted);
        assert!(!result.succeeded);
    }
}
