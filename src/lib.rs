pub mod config;
pub mod error;
pub mod model;
pub mod server;

pub use config::{AppConfig, SamplingConfig};
pub use error::ServiceError;
pub use model::{
    GenerationParams, ModelMetadata, ModelRegistry, ModelRuntime, PredictRequest, PredictResponse,
};
pub use server::build_router;
