mod registry;
mod runtime;
mod types;

#[cfg(feature = "tch-backend")]
mod loader;
#[cfg(feature = "tch-backend")]
mod sampling;

#[cfg(feature = "tch-backend")]
pub use loader::Seq2SeqModel;
pub use registry::ModelRegistry;
pub use runtime::ModelRuntime;
pub use types::{GenerationParams, ModelMetadata, PredictRequest, PredictResponse};
