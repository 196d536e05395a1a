use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ServiceError;

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub prompt: String,
    /// Falls back to the configured default (256) when absent. An explicit
    /// `null` is rejected.
    #[serde(default, deserialize_with = "present_integer")]
    pub max_new_tokens: Option<usize>,
}

fn present_integer<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    usize::deserialize(deserializer).map(Some)
}

impl PredictRequest {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.prompt.is_empty() {
            return Err(ServiceError::Validation("prompt must not be empty".into()));
        }
        if self.max_new_tokens == Some(0) {
            return Err(ServiceError::Validation(
                "max_new_tokens must be >= 1, got 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub result: String,
}

/// Decoding parameters handed to [`ModelRuntime::generate`](crate::model::ModelRuntime::generate).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub do_sample: bool,
    pub temperature: f64,
    pub top_k: usize,
    pub top_p: f64,
    pub max_new_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub dtype: String,
    pub device: String,
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str, max_new_tokens: Option<usize>) -> PredictRequest {
        PredictRequest {
            prompt: prompt.to_string(),
            max_new_tokens,
        }
    }

    #[test]
    fn accepts_plain_prompt() {
        assert!(request("Translate to French: Hello", None).validate().is_ok());
        assert!(request("x", Some(5)).validate().is_ok());
    }

    #[test]
    fn rejects_empty_prompt_and_zero_length() {
        assert!(matches!(
            request("", None).validate(),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            request("x", Some(0)).validate(),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn max_new_tokens_is_optional_in_json() {
        let parsed: PredictRequest =
            serde_json::from_str(r#"{"prompt": "Translate to French: Hello"}"#).unwrap();
        assert_eq!(parsed.max_new_tokens, None);

        let err = serde_json::from_str::<PredictRequest>(r#"{"max_new_tokens": 5}"#);
        assert!(err.is_err());
    }

    #[test]
    fn explicit_null_max_new_tokens_is_rejected() {
        let parsed: PredictRequest =
            serde_json::from_str(r#"{"prompt": "x", "max_new_tokens": 5}"#).unwrap();
        assert_eq!(parsed.max_new_tokens, Some(5));

        let err =
            serde_json::from_str::<PredictRequest>(r#"{"prompt": "x", "max_new_tokens": null}"#);
        assert!(err.is_err());
    }
}
