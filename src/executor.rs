use crate::error::{RelayError, Result};
use crate::path_strategy::PromptLink;
use async_trait::async_trait;
use tracing::{debug, warn};

/// One unit of work the inference worker applies to an uploaded image.
pub struct InferenceTask {
    pub raw: PromptLink,
    pub result: PromptLink,
}

#[async_trait]
pub trait InferenceStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, task: &InferenceTask) -> Result<()>;
}

/// Stand-in for the model: leaves storage untouched and only logs. Real
/// deployments register a step that downloads `raw`, runs the model and
/// uploads to `result`.
pub struct PassThroughStep;

#[async_trait]
impl InferenceStep for PassThroughStep {
    fn name(&self) -> &'static str {
        "PassThroughStep"
    }

    async fn process(&self, task: &InferenceTask) -> Result<()> {
        debug!(raw = %task.raw.key_path, result = %task.result.key_path, "Pass-through inference");
        Ok(())
    }
}

pub struct InferenceExecutor {
    steps: Vec<Box<dyn InferenceStep>>,
}

impl InferenceExecutor {
    pub fn new(steps: Vec<Box<dyn InferenceStep>>) -> Self {
        if steps.is_empty() {
            warn!("Inference executor created with no steps.");
        }
        InferenceExecutor { steps }
    }

    /// Runs every step in order, stopping at the first failure.
    pub async fn run(&self, task: &InferenceTask) -> Result<()> {
        for step in &self.steps {
            debug!("Running inference step: {}", step.name());
            step.process(task)
                .await
                .map_err(|e| RelayError::HandlerError {
                    handler: step.name(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}
