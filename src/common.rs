use libm::{erff, tanhf};
use ndarray::{Array1, Array2, ArrayD, Axis};

use crate::checkpoint::Checkpoint;
use crate::error::Result;

/// Numerically stable softmax along `axis`.
pub fn softmax(input: &ArrayD<f32>, axis_index: usize) -> ArrayD<f32> {
    let axis = Axis(axis_index);
    let max_val = input.fold_axis(axis, f32::NEG_INFINITY, |&a, &b| a.max(b));
    let max_val_broadcastable = max_val.insert_axis(axis);

    let exp_values = (input - &max_val_broadcastable).mapv(f32::exp);

    let sum_exp_values = exp_values.sum_axis(axis);
    let sum_exp_values_broadcastable = sum_exp_values.insert_axis(axis);

    &exp_values / &sum_exp_values_broadcastable
}

pub fn softmax1(input: &Array1<f32>) -> Array1<f32> {
    let max_val = input.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_values = input.mapv(|x| (x - max_val).exp());
    let sum = exp_values.sum();
    exp_values / sum
}

/// Exact GELU, as in the original BERT.
pub fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + erff(x / std::f32::consts::SQRT_2))
}

/// Tanh approximation used by GPT-2 style checkpoints.
pub fn gelu_new(x: f32) -> f32 {
    0.5 * x * (1.0 + tanhf((2.0f32 / std::f32::consts::PI).sqrt() * (x + 0.044715 * x.powi(3))))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Gelu,
    GeluNew,
    Relu,
    Tanh,
}

impl Activation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gelu" => Some(Activation::Gelu),
            "gelu_new" => Some(Activation::GeluNew),
            "relu" => Some(Activation::Relu),
            "tanh" => Some(Activation::Tanh),
            _ => None,
        }
    }

    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Gelu => gelu(x),
            Activation::GeluNew => gelu_new(x),
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
        }
    }
}

/// Dense layer stored `[in, out]` so the forward pass is `x.dot(w) + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    pub(crate) weight: Array2<f32>,
    pub(crate) bias: Array1<f32>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Self {
        Self { weight, bias }
    }

    /// Restores `<prefix>.weight` (stored `[out, in]`, PyTorch layout) and `<prefix>.bias`.
    pub fn restore(
        checkpoint: &Checkpoint,
        prefix: &str,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Self> {
        let weight = checkpoint
            .matrix(&format!("{}.weight", prefix), out_dim, in_dim)?
            .reversed_axes()
            .as_standard_layout()
            .to_owned();
        let bias = checkpoint.vector(&format!("{}.bias", prefix), out_dim)?;
        Ok(Self { weight, bias })
    }

    pub fn out_dim(&self) -> usize {
        self.bias.len()
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weight) + &self.bias
    }

    pub fn forward1(&self, x: &Array1<f32>) -> Array1<f32> {
        x.dot(&self.weight) + &self.bias
    }
}

#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Array1<f32>, // gamma
    bias: Array1<f32>,   // beta
    epsilon: f32,
}

impl LayerNorm {
    pub fn new(weight: Array1<f32>, bias: Array1<f32>, epsilon: f32) -> Self {
        Self { weight, bias, epsilon }
    }

    /// Restores `<prefix>.weight` / `<prefix>.bias`.
    pub fn restore(
        checkpoint: &Checkpoint,
        prefix: &str,
        dim: usize,
        epsilon: f32,
    ) -> Result<Self> {
        Ok(Self {
            weight: checkpoint.vector(&format!("{}.weight", prefix), dim)?,
            bias: checkpoint.vector(&format!("{}.bias", prefix), dim)?,
            epsilon,
        })
    }

    /// Normalizes every row of `[positions, dim]`.
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let axis = Axis(1);
        let mean = x.mean_axis(axis).unwrap_or_else(|| Array1::zeros(x.nrows()));
        let variance = x.var_axis(axis, 0.0);

        let x_minus_mean = x - &mean.insert_axis(axis);
        let std_dev_inv = (variance + self.epsilon)
            .mapv(f32::sqrt)
            .mapv(|v| 1.0 / v)
            .insert_axis(axis);

        let normalized_x = x_minus_mean * std_dev_inv;
        normalized_x * &self.weight + &self.bias
    }
}
