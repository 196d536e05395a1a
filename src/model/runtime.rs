use crate::{
    error::ServiceError,
    model::{GenerationParams, ModelMetadata},
};

/// A loaded sequence-to-sequence model together with its tokenizer.
///
/// Implementations are constructed once at startup and shared read-only
/// across requests. All methods are blocking; callers run them off the
/// async executor.
pub trait ModelRuntime: Send + Sync {
    /// Encodes `text` into model input ids, including special tokens.
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, ServiceError>;

    /// Runs generation for a single input sequence and returns the output ids.
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<u32>, ServiceError>;

    /// Decodes output ids to text, skipping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String, ServiceError>;

    fn metadata(&self) -> ModelMetadata;
}
