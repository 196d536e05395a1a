//! TorchScript seq2seq backend.
//!
//! The model is expected as two traced modules:
//!
//! * encoder: `forward(input_ids: i64[1, L], attention_mask: i64[1, L]) -> f32[1, L, d]`
//! * decoder: `forward(decoder_input_ids: i64[1, T], encoder_hidden_states: f32[1, L, d],
//!   attention_mask: i64[1, L]) -> f32[1, T, V]`
//!
//! The decoder may also return a tuple whose first element is the logits.

use std::{fs, path::Path, time::Instant};

use parking_lot::Mutex;
use tch::{CModule, Device, IValue, Kind, Tensor, no_grad};
use tokenizers::{FromPretrainedParameters, Tokenizer};
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{GenerationParams, ModelMetadata, ModelRuntime, sampling},
};

struct Modules {
    encoder: CModule,
    decoder: CModule,
}

pub struct Seq2SeqModel {
    name: String,
    size_bytes: u64,
    device: Device,
    decoder_start_token_id: u32,
    eos_token_id: u32,
    tokenizer: Tokenizer,
    modules: Mutex<Modules>,
}

impl Seq2SeqModel {
    pub fn load(config: &AppConfig) -> Result<Self, ServiceError> {
        let tokenizer = load_tokenizer(config)?;

        if let Some(seed) = config.seed {
            tch::manual_seed(seed as i64);
        }

        let (encoder, encoder_bytes) = load_module(&config.encoder_module_path, config.device)?;
        let (decoder, decoder_bytes) = load_module(&config.decoder_module_path, config.device)?;

        info!(
            model = %config.model_id,
            device = ?config.device,
            size_bytes = encoder_bytes + decoder_bytes,
            "model loaded"
        );

        Ok(Self {
            name: config.model_id.clone(),
            size_bytes: encoder_bytes + decoder_bytes,
            device: config.device,
            decoder_start_token_id: config.decoder_start_token_id,
            eos_token_id: config.eos_token_id,
            tokenizer,
            modules: Mutex::new(Modules { encoder, decoder }),
        })
    }

    fn run(&self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<u32>, ServiceError> {
        let ids: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
        let len = ids.len() as i64;
        let input = Tensor::from_slice(&ids).reshape([1, len]).to(self.device);
        let attention_mask = Tensor::ones([1, len], (Kind::Int64, self.device));

        let modules = self.modules.lock();

        let encoder_states = modules
            .encoder
            .forward_ts(&[&input, &attention_mask])
            .map_err(|e| ServiceError::Inference(e.to_string()))?;

        decode_tokens(
            self.decoder_start_token_id,
            self.eos_token_id,
            params,
            |prefix| {
                let decoder_input = Tensor::from_slice(prefix)
                    .reshape([1, prefix.len() as i64])
                    .to(self.device);

                let raw = modules
                    .decoder
                    .forward_is(&[
                        IValue::Tensor(decoder_input),
                        IValue::Tensor(encoder_states.shallow_clone()),
                        IValue::Tensor(attention_mask.shallow_clone()),
                    ])
                    .map_err(|e| ServiceError::Inference(e.to_string()))?;

                Ok(logits_from(raw)?.select(1, -1).squeeze_dim(0))
            },
        )
    }
}

/// Autoregressive decoder loop. `step` receives the tokens produced so far
/// (starting with `start_token_id`) and returns the logits for the next
/// position. The returned ids exclude the start token and include EOS when
/// it was produced.
fn decode_tokens<F>(
    start_token_id: u32,
    eos_token_id: u32,
    params: &GenerationParams,
    mut step: F,
) -> Result<Vec<u32>, ServiceError>
where
    F: FnMut(&[i64]) -> Result<Tensor, ServiceError>,
{
    let mut output = vec![start_token_id as i64];
    for _ in 0..params.max_new_tokens {
        let logits = step(&output)?;
        let next = sampling::next_token(&logits, params)?;

        output.push(next);
        if next == eos_token_id as i64 {
            break;
        }
    }

    Ok(output[1..].iter().map(|&id| id as u32).collect())
}

impl ModelRuntime for Seq2SeqModel {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>, ServiceError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        if encoding.get_ids().is_empty() {
            return Err(ServiceError::Tokenizer(
                "prompt produced no tokens".to_string(),
            ));
        }
        Ok(encoding.get_ids().to_vec())
    }

    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<u32>, ServiceError> {
        let start = Instant::now();
        let output = no_grad(|| self.run(input_ids, params))?;
        tracing::debug!(
            generated = output.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "decoder loop finished"
        );
        Ok(output)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, ServiceError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            name: self.name.clone(),
            dtype: "float32".to_string(),
            device: format!("{:?}", self.device),
            size_bytes: self.size_bytes,
        }
    }
}

fn load_tokenizer(config: &AppConfig) -> Result<Tokenizer, ServiceError> {
    match config.tokenizer_path.as_ref() {
        Some(path) => {
            info!(path = %path.display(), "loading tokenizer from file");
            Tokenizer::from_file(path).map_err(|e| ServiceError::Tokenizer(e.to_string()))
        }
        None => {
            info!(model = %config.model_id, "fetching tokenizer from hub");
            let params = FromPretrainedParameters {
                revision: config
                    .revision
                    .clone()
                    .unwrap_or_else(|| "main".to_string()),
                ..Default::default()
            };
            Tokenizer::from_pretrained(&config.model_id, Some(params))
                .map_err(|e| ServiceError::Tokenizer(e.to_string()))
        }
    }
}

fn load_module(path: &Path, device: Device) -> Result<(CModule, u64), ServiceError> {
    if !path.exists() {
        return Err(ServiceError::Config(format!(
            "model artifact missing: {}",
            path.display()
        )));
    }
    let size_bytes = fs::metadata(path)?.len();
    let mut module = CModule::load_on_device(path, device)
        .map_err(|e| ServiceError::Inference(e.to_string()))?;
    module.set_eval();
    info!(path = %path.display(), size_bytes, "loaded TorchScript module");
    Ok((module, size_bytes))
}

fn logits_from(output: IValue) -> Result<Tensor, ServiceError> {
    match output {
        IValue::Tensor(t) => Ok(t),
        IValue::Tuple(mut items) if !items.is_empty() => match items.swap_remove(0) {
            IValue::Tensor(t) => Ok(t),
            _ => Err(ServiceError::Inference(
                "expected tensor as first tuple element".into(),
            )),
        },
        _ => Err(ServiceError::Inference(
            "unexpected decoder output format".into(),
        )),
    }
}
