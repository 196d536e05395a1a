use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

use serde::Serialize;
#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::model::GenerationParams;

pub const DEFAULT_MODEL_ID: &str = "google/flan-t5-base";
pub const DEFAULT_PORT: u16 = 8000;

/// Sampling settings applied to every `/predict` call. Only
/// `max_new_tokens` can be overridden per request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingConfig {
    pub do_sample: bool,
    pub temperature: f64,
    /// Keep only the `top_k` most likely tokens before the nucleus cut; 0 disables.
    pub top_k: usize,
    pub top_p: f64,
    /// Used when the request omits `max_new_tokens`.
    pub max_new_tokens: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            do_sample: true,
            temperature: 0.7,
            top_k: 50,
            top_p: 0.9,
            max_new_tokens: 256,
        }
    }
}

impl SamplingConfig {
    pub fn params(&self, max_new_tokens: Option<usize>) -> GenerationParams {
        GenerationParams {
            do_sample: self.do_sample,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            max_new_tokens: max_new_tokens.unwrap_or(self.max_new_tokens),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_id: String,
    pub revision: Option<String>,
    pub encoder_module_path: PathBuf,
    pub decoder_module_path: PathBuf,
    /// Local `tokenizer.json`. When unset the tokenizer is fetched from the
    /// hub by `model_id`.
    pub tokenizer_path: Option<PathBuf>,
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
    pub sampling: SamplingConfig,
    pub seed: Option<u64>,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: None,
            encoder_module_path: PathBuf::from("models/flan-t5-base/encoder.ts"),
            decoder_module_path: PathBuf::from("models/flan-t5-base/decoder.ts"),
            tokenizer_path: None,
            decoder_start_token_id: 0,
            eos_token_id: 1,
            sampling: SamplingConfig::default(),
            seed: None,
            #[cfg(feature = "tch-backend")]
            device: Device::Cpu,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let listen_addr = env_or("SERVER_ADDR", defaults.listen_addr);
        let model_id = env::var("MODEL_ID").unwrap_or(defaults.model_id);
        let revision = env::var("MODEL_REVISION").ok();

        let encoder_module_path = env::var("ENCODER_MODULE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.encoder_module_path);
        let decoder_module_path = env::var("DECODER_MODULE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.decoder_module_path);
        let tokenizer_path = env::var("TOKENIZER_PATH").ok().map(PathBuf::from);

        let decoder_start_token_id =
            env_or("DECODER_START_TOKEN_ID", defaults.decoder_start_token_id);
        let eos_token_id = env_or("EOS_TOKEN_ID", defaults.eos_token_id);

        let sampling = SamplingConfig {
            do_sample: env_or("DO_SAMPLE", defaults.sampling.do_sample),
            temperature: env_or("TEMPERATURE", defaults.sampling.temperature),
            top_k: env_or("TOP_K", defaults.sampling.top_k),
            top_p: env_or("TOP_P", defaults.sampling.top_p),
            max_new_tokens: env_or("MAX_NEW_TOKENS", defaults.sampling.max_new_tokens),
        };
        if !(0.0..=1.0).contains(&sampling.top_p) {
            anyhow::bail!("TOP_P must be in [0, 1], got {}", sampling.top_p);
        }
        if !sampling.temperature.is_finite() || sampling.temperature < 0.0 {
            anyhow::bail!(
                "TEMPERATURE must be finite and >= 0, got {}",
                sampling.temperature
            );
        }

        let seed = env::var("SEED").ok().and_then(|v| v.parse().ok());

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            model_id,
            revision,
            encoder_module_path,
            decoder_module_path,
            tokenizer_path,
            decoder_start_token_id,
            eos_token_id,
            sampling,
            seed,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    parse_or(env::var(key).ok().as_deref(), default)
}

fn parse_or<T: FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA not available, falling back to cpu");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
