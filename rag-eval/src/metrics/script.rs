//! Verification by external script.

use super::{Metric, MetricScore, ScoreError};
use crate::example::{EvaluationExample, ExampleField};
use crate::script::ScriptRunner;
use async_trait::async_trait;
use rag_eval_core::truncate;

/// Runs the example's `verify_script`: exit status 0 scores 1.0,
/// anything else 0.0.
///
/// A script that cannot be run at all is an error, not a failing score.
#[derive(Debug, Clone, Default)]
pub struct ScriptVerification {
    runner: ScriptRunner,
}

impl ScriptVerification {
    pub fn new(runner: ScriptRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Metric for ScriptVerification {
    fn name(&self) -> &str {
        "script"
    }

    fn required_fields(&self) -> &[ExampleField] {
        &[ExampleField::VerifyScript]
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        let Some(path) = &example.verify_script else {
            return Err(ScoreError::IncompleteExample {
                field: ExampleField::VerifyScript,
            });
        };

        let output = self
            .runner
            .run(path)
            .await
            .map_err(|e| ScoreError::computation(self.name(), e.to_string()))?;

        if output.success() {
            Ok(MetricScore::new(1.0))
        } else {
            let detail = if output.stderr.is_empty() {
                &output.stdout
            } else {
                &output.stderr
            };
            Ok(MetricScore::new(0.0).with_reason(format!(
                "verification exited with {:?}: {}",
                output.code,
                truncate(detail, 200)
            )))
        }
    }
}
