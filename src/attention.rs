use ndarray::{s, Array1, Array2, Array3, Axis};

use crate::checkpoint::Checkpoint;
use crate::common::{softmax, LayerNorm, Linear};
use crate::error::{EvalError, Result};

/// Added to the scores of padded key positions before the softmax.
const MASKED_SCORE: f32 = -10000.0;

/// Bidirectional multi-head self-attention with its output projection and
/// post-attention residual LayerNorm.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    pub(crate) n_head: usize,
    pub(crate) hidden_size: usize,
    pub(crate) head_dim: usize,
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    output_norm: LayerNorm,
}

impl MultiHeadAttention {
    pub fn new(
        n_head: usize,
        query: Linear,
        key: Linear,
        value: Linear,
        output: Linear,
        output_norm: LayerNorm,
    ) -> Result<Self> {
        let hidden_size = output.out_dim();
        if n_head == 0 || hidden_size % n_head != 0 {
            return Err(EvalError::ModelLoad(format!(
                "hidden size ({}) must be divisible by n_head ({})",
                hidden_size, n_head
            )));
        }
        Ok(Self {
            n_head,
            hidden_size,
            head_dim: hidden_size / n_head,
            query,
            key,
            value,
            output,
            output_norm,
        })
    }

    /// Restores `<prefix>.self.{query,key,value}` and `<prefix>.output.{dense,LayerNorm}`.
    pub fn restore(
        checkpoint: &Checkpoint,
        prefix: &str,
        n_head: usize,
        hidden_size: usize,
        epsilon: f32,
    ) -> Result<Self> {
        let linear = |name: &str| {
            Linear::restore(checkpoint, &format!("{}.{}", prefix, name), hidden_size, hidden_size)
        };
        Self::new(
            n_head,
            linear("self.query")?,
            linear("self.key")?,
            linear("self.value")?,
            linear("output.dense")?,
            LayerNorm::restore(
                checkpoint,
                &format!("{}.output.LayerNorm", prefix),
                hidden_size,
                epsilon,
            )?,
        )
    }

    /// `hidden_states`: `[seq_len, hidden]`; `input_mask`: 1 for real positions, 0 for padding.
    ///
    /// Returns the normalized layer output and the attention probabilities
    /// `[n_head, seq_len, seq_len]`.
    pub fn forward(
        &self,
        hidden_states: &Array2<f32>,
        input_mask: &[u32],
    ) -> Result<(Array2<f32>, Array3<f32>)> {
        let seq_len = hidden_states.nrows();
        if input_mask.len() != seq_len {
            return Err(EvalError::ModelInference(format!(
                "attention mask has {} positions, hidden states have {}",
                input_mask.len(),
                seq_len
            )));
        }

        let q = self.query.forward(hidden_states);
        let k = self.key.forward(hidden_states);
        let v = self.value.forward(hidden_states);

        let mask_bias: Array1<f32> = input_mask
            .iter()
            .map(|&m| if m == 0 { MASKED_SCORE } else { 0.0 })
            .collect();
        let scale = (self.head_dim as f32).sqrt();

        let mut attn_scores = Array3::<f32>::zeros((self.n_head, seq_len, seq_len));
        for h in 0..self.n_head {
            let cols = h * self.head_dim..(h + 1) * self.head_dim;
            let q_h = q.slice(s![.., cols.clone()]);
            let k_h = k.slice(s![.., cols]);
            let scores = q_h.dot(&k_h.t()) / scale + &mask_bias;
            attn_scores.slice_mut(s![h, .., ..]).assign(&scores);
        }

        let attn_probs = softmax(&attn_scores.into_dyn(), 2)
            .into_dimensionality::<ndarray::Ix3>()?;

        let mut context = Array2::<f32>::zeros((seq_len, self.hidden_size));
        for (h, probs_h) in attn_probs.axis_iter(Axis(0)).enumerate() {
            let cols = h * self.head_dim..(h + 1) * self.head_dim;
            let ctx_h = probs_h.dot(&v.slice(s![.., cols.clone()]));
            context.slice_mut(s![.., cols]).assign(&ctx_h);
        }

        let projected = self.output.forward(&context);
        let output = self.output_norm.forward(&(projected + hidden_states));
        Ok((output, attn_probs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;

    fn identity_linear(dim: usize) -> Linear {
        Linear::new(Array2::eye(dim), Array1::zeros(dim))
    }

    fn mha(n_head: usize, dim: usize) -> Result<MultiHeadAttention> {
        MultiHeadAttention::new(
            n_head,
            identity_linear(dim),
            identity_linear(dim),
            identity_linear(dim),
            identity_linear(dim),
            LayerNorm::new(Array1::ones(dim), Array1::zeros(dim), 1e-12),
        )
    }

    #[test]
    fn test_mha_new_invalid_params() {
        assert!(mha(3, 4).is_err(), "hidden size not divisible by n_head should be an error");
        assert!(mha(0, 4).is_err(), "n_head cannot be zero");
    }

    #[test]
    fn test_mha_forward_shapes() {
        let attention = mha(2, 4).unwrap();
        assert_eq!(attention.head_dim, 2);
        let hidden = Array::from_shape_fn((5, 4), |(i, j)| (i * 4 + j) as f32 * 0.1);
        let (output, probs) = attention.forward(&hidden, &[1, 1, 1, 0, 0]).unwrap();
        assert_eq!(output.dim(), (5, 4));
        assert_eq!(probs.dim(), (2, 5, 5));
    }

    #[test]
    fn test_padding_receives_no_attention() {
        let attention = mha(2, 4).unwrap();
        let hidden = Array::from_shape_fn((4, 4), |(i, j)| ((i + j) % 3) as f32);
        let (_, probs) = attention.forward(&hidden, &[1, 1, 0, 0]).unwrap();
        for h in 0..2usize {
            for i in 0..4usize {
                let row = probs.slice(s![h, i, ..]);
                assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-5);
                assert!(row[2] < 1e-6 && row[3] < 1e-6);
            }
        }
    }

    #[test]
    fn test_mask_length_mismatch_is_inference_error() {
        let attention = mha(1, 2).unwrap();
        let hidden = Array2::zeros((3, 2));
        assert!(matches!(
            attention.forward(&hidden, &[1, 1]),
            Err(EvalError::ModelInference(_))
        ));
    }
}
