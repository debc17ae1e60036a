use ndarray::Array2;

use crate::checkpoint::Checkpoint;
use crate::common::{Activation, LayerNorm, Linear};
use crate::error::{EvalError, Result};

/// Position-wise feed-forward block: `hidden -> intermediate -> hidden`, then
/// residual + LayerNorm.
#[derive(Debug, Clone)]
pub struct MLP {
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
    activation: Activation,
}

impl MLP {
    pub fn new(
        intermediate: Linear,
        output: Linear,
        output_norm: LayerNorm,
        activation: Activation,
    ) -> Result<Self> {
        if intermediate.out_dim() == 0 || output.out_dim() == 0 {
            return Err(EvalError::ModelLoad(
                "hidden and intermediate sizes must be positive".to_string(),
            ));
        }
        Ok(Self {
            intermediate,
            output,
            output_norm,
            activation,
        })
    }

    /// Restores `<prefix>.intermediate.dense` and `<prefix>.output.{dense,LayerNorm}`.
    pub fn restore(
        checkpoint: &Checkpoint,
        prefix: &str,
        hidden_size: usize,
        intermediate_size: usize,
        activation: Activation,
        epsilon: f32,
    ) -> Result<Self> {
        let name = |suffix: &str| format!("{}.{}", prefix, suffix);
        Self::new(
            Linear::restore(
                checkpoint,
                &name("intermediate.dense"),
                hidden_size,
                intermediate_size,
            )?,
            Linear::restore(checkpoint, &name("output.dense"), intermediate_size, hidden_size)?,
            LayerNorm::restore(checkpoint, &name("output.LayerNorm"), hidden_size, epsilon)?,
            activation,
        )
    }

    pub fn forward(&self, hidden_states: &Array2<f32>) -> Array2<f32> {
        let activation = self.activation;
        let inner = self.intermediate.forward(hidden_states).mapv(|x| activation.apply(x));
        let projected = self.output.forward(&inner);
        self.output_norm.forward(&(projected + hidden_states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Axis};

    fn mlp(n_embd: usize, n_inner: usize) -> Result<MLP> {
        MLP::new(
            Linear::new(Array2::from_elem((n_embd, n_inner), 0.1), Array1::zeros(n_inner)),
            Linear::new(Array2::from_elem((n_inner, n_embd), 0.1), Array1::zeros(n_embd)),
            LayerNorm::new(Array1::ones(n_embd), Array1::zeros(n_embd), 1e-12),
            Activation::Gelu,
        )
    }

    #[test]
    fn test_mlp_new_invalid_params() {
        assert!(mlp(4, 0).is_err());
        assert!(mlp(0, 16).is_err());
    }

    #[test]
    fn test_mlp_forward_shape_and_normalization() {
        let block = mlp(4, 16).unwrap();
        let input = Array2::from_shape_fn((3, 4), |(i, j)| (i as f32) - (j as f32));
        let output = block.forward(&input);
        assert_eq!(output.dim(), (3, 4));
        for mean in output.mean_axis(Axis(1)).unwrap().iter() {
            assert_abs_diff_eq!(*mean, 0.0, epsilon = 1e-5);
        }
    }
}
