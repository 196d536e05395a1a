use std::{sync::Arc, time::Instant};

use tokio::task;
use tracing::{debug, info};

use crate::{
    config::SamplingConfig,
    error::ServiceError,
    model::{ModelMetadata, ModelRuntime, PredictRequest, PredictResponse},
};

/// Owns the process-wide model runtime and turns predict requests into
/// generation calls.
pub struct ModelRegistry {
    runtime: Arc<dyn ModelRuntime>,
    sampling: SamplingConfig,
}

impl ModelRegistry {
    pub fn new(runtime: Arc<dyn ModelRuntime>, sampling: SamplingConfig) -> Self {
        Self { runtime, sampling }
    }

    #[cfg(feature = "tch-backend")]
    pub fn initialize(config: &crate::config::AppConfig) -> Result<Self, ServiceError> {
        let model = crate::model::Seq2SeqModel::load(config)?;
        Ok(Self::new(Arc::new(model), config.sampling))
    }

    pub fn metadata(&self) -> ModelMetadata {
        self.runtime.metadata()
    }

    pub fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }

    pub async fn predict(&self, request: PredictRequest) -> Result<PredictResponse, ServiceError> {
        request.validate()?;

        let runtime = self.runtime.clone();
        let params = self.sampling.params(request.max_new_tokens);
        let prompt = request.prompt;

        info!(
            prompt_chars = prompt.chars().count(),
            max_new_tokens = params.max_new_tokens,
            "predict"
        );

        task::spawn_blocking(move || {
            let start = Instant::now();
            let input_ids = runtime.tokenize(&prompt)?;
            let output_ids = runtime.generate(&input_ids, &params)?;
            let result = runtime.decode(&output_ids)?;
            debug!(
                input_tokens = input_ids.len(),
                output_tokens = output_ids.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "generation finished"
            );
            Ok(PredictResponse { result })
        })
        .await
        .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }
}
