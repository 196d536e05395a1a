use tch::{Kind, Tensor};

use crate::{error::ServiceError, model::GenerationParams};

/// Picks the next token id from a 1-D logits tensor.
///
/// With sampling enabled the logits are scaled by `temperature`, cut to the
/// `top_k` most likely tokens, reduced to the smallest set whose renormalized
/// probability mass reaches `top_p`, and a token is drawn from that set.
/// Otherwise the argmax is returned.
pub fn next_token(logits: &Tensor, params: &GenerationParams) -> Result<i64, ServiceError> {
    let logits = logits.to_kind(Kind::Float);
    if !params.do_sample || params.temperature <= 0.0 {
        return Ok(logits.argmax(0, false).int64_value(&[]));
    }

    let probs = (&logits / params.temperature).softmax(-1, Kind::Float);
    let (mut sorted, indices) = probs.sort(-1, true);

    let vocab = sorted.size()[0];
    let top_k = params.top_k as i64;
    if top_k > 0 && top_k < vocab {
        let _ = sorted.narrow(0, top_k, vocab - top_k).fill_(0.0);
        sorted = &sorted / sorted.sum(Kind::Float);
    }

    // Mass of all strictly more likely tokens. The head token is always kept.
    let preceding = sorted.cumsum(-1, Kind::Float) - &sorted;
    let keep = preceding.lt(params.top_p).to_kind(Kind::Float);
    let _ = keep.get(0).fill_(1.0);
    let nucleus = &sorted * &keep;

    let choice = nucleus
        .f_multinomial(1, false)
        .map_err(|e| ServiceError::Inference(format!("sampling failed: {e}")))?
        .int64_value(&[0]);

    Ok(indices.int64_value(&[choice]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(do_sample: bool, temperature: f64, top_p: f64) -> GenerationParams {
        GenerationParams {
            do_sample,
            temperature,
            top_k: 0,
            top_p,
            max_new_tokens: 1,
        }
    }

    #[test]
    fn greedy_picks_argmax() {
        let logits = Tensor::from_slice(&[0.1f32, 2.5, -1.0, 0.7]);
        let token = next_token(&logits, &params(false, 0.7, 0.9)).unwrap();
        assert_eq!(token, 1);
    }

    #[test]
    fn zero_temperature_is_greedy() {
        let logits = Tensor::from_slice(&[3.0f32, 0.0, 1.0]);
        let token = next_token(&logits, &params(true, 0.0, 0.9)).unwrap();
        assert_eq!(token, 0);
    }

    #[test]
    fn nucleus_excludes_the_tail() {
        tch::manual_seed(7);
        // Token 2 carries nearly all of the mass, so top_p = 0.9 keeps only it.
        let logits = Tensor::from_slice(&[0.0f32, 0.0, 12.0, 0.0]);
        for _ in 0..32 {
            let token = next_token(&logits, &params(true, 0.7, 0.9)).unwrap();
            assert_eq!(token, 2);
        }
    }

    #[test]
    fn tiny_top_p_still_keeps_one_token() {
        tch::manual_seed(11);
        let logits = Tensor::from_slice(&[1.0f32, 1.5, 0.5]);
        let token = next_token(&logits, &params(true, 1.0, 0.0)).unwrap();
        assert_eq!(token, 1);
    }

    #[test]
    fn samples_stay_within_the_nucleus() {
        tch::manual_seed(3);
        // Two equally likely heads and a negligible tail.
        let logits = Tensor::from_slice(&[5.0f32, 5.0, -20.0, -20.0]);
        for _ in 0..64 {
            let token = next_token(&logits, &params(true, 0.7, 0.9)).unwrap();
            assert!(token == 0 || token == 1, "sampled tail token {token}");
        }
    }

    #[test]
    fn top_k_cuts_tokens_the_nucleus_would_keep() {
        // Near-uniform mass: top_p = 0.9 alone keeps all four tokens.
        let logits = Tensor::from_slice(&[3.0f32, 2.9, 2.8, 2.7]);

        tch::manual_seed(5);
        let mut seen = [false; 4];
        for _ in 0..256 {
            let token = next_token(&logits, &params(true, 1.0, 0.9)).unwrap();
            seen[token as usize] = true;
        }
        assert!(seen[2] || seen[3], "nucleus alone should reach the tail");

        let with_top_k = GenerationParams {
            top_k: 2,
            ..params(true, 1.0, 0.9)
        };
        tch::manual_seed(5);
        for _ in 0..256 {
            let token = next_token(&logits, &with_top_k).unwrap();
            assert!(token == 0 || token == 1, "sampled token {token} outside top_k");
        }
    }
}
