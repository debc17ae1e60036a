//! Character-aware bidirectional language model (ELMo style) and the learned
//! scalar mix over its layers.

use ndarray::{concatenate, s, Array1, Array2, Axis};

use crate::checkpoint::Checkpoint;
use crate::common::{softmax1, Activation, Linear};
use crate::config::ElmoOptions;
use crate::error::{EvalError, Result};
use crate::framing::{CharFramedInput, PAD_CHAR};
use crate::runner::InferenceRunner;

const FORGET_BIAS: f32 = 1.0;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone)]
struct ConvFilter {
    width: usize,
    /// `[width * char_dim, num_filters]`, windows flattened row-major.
    weight: Array2<f32>,
    bias: Array1<f32>,
}

/// Char embedding → max-pooled convolutions → highway layers → projection.
#[derive(Debug, Clone)]
pub struct CharCnnEncoder {
    char_embedding: Array2<f32>,
    filters: Vec<ConvFilter>,
    activation: Activation,
    highway: Vec<(Linear, Linear)>,
    projection: Linear,
}

impl CharCnnEncoder {
    fn restore(checkpoint: &Checkpoint, options: &ElmoOptions) -> Result<Self> {
        let cnn = &options.char_cnn;
        let char_dim = cnn.embedding.dim;
        let char_embedding =
            checkpoint.matrix("char_cnn.char_embedding", cnn.n_characters, char_dim)?;

        let filters = cnn
            .filters
            .iter()
            .enumerate()
            .map(|(i, &(width, num))| {
                let weight = checkpoint
                    .tensor(&format!("char_cnn.filters.{}.weight", i), &[width, char_dim, num])?
                    .into_shape((width * char_dim, num))?;
                let bias = checkpoint.vector(&format!("char_cnn.filters.{}.bias", i), num)?;
                Ok(ConvFilter { width, weight, bias })
            })
            .collect::<Result<Vec<_>>>()?;

        let n_filters = options.n_filters();
        let highway = (0..cnn.n_highway)
            .map(|i| {
                let layer = |part: &str| {
                    let name = format!("char_cnn.highway.{}.{}", i, part);
                    Linear::restore(checkpoint, &name, n_filters, n_filters)
                };
                Ok((layer("carry")?, layer("transform")?))
            })
            .collect::<Result<Vec<_>>>()?;
        let projection = Linear::restore(
            checkpoint,
            "char_cnn.projection",
            n_filters,
            options.lstm.projection_dim,
        )?;

        let activation = Activation::from_name(&cnn.activation).ok_or_else(|| {
            EvalError::ModelLoad(format!("unsupported activation '{}'", cnn.activation))
        })?;
        Ok(Self {
            char_embedding,
            filters,
            activation,
            highway,
            projection,
        })
    }

    fn max_filter_width(&self) -> usize {
        self.filters.iter().map(|f| f.width).max().unwrap_or(0)
    }

    /// `char_ids`: `[tokens, max_chars]` → `[tokens, projection_dim]`.
    pub fn forward(&self, char_ids: &Array2<u32>) -> Result<Array2<f32>> {
        let (n_tokens, max_chars) = char_ids.dim();
        let char_dim = self.char_embedding.ncols();
        let n_filters: usize = self.filters.iter().map(|f| f.bias.len()).sum();

        let mut pooled = Array2::<f32>::zeros((n_tokens, n_filters));
        for (t, row) in char_ids.outer_iter().enumerate() {
            let mut embedded = Array2::<f32>::zeros((max_chars, char_dim));
            for (c, &id) in row.iter().enumerate() {
                let id = id as usize;
                if id >= self.char_embedding.nrows() {
                    return Err(EvalError::ModelInference(format!(
                        "character id {} out of range {}",
                        id,
                        self.char_embedding.nrows()
                    )));
                }
                embedded.row_mut(c).assign(&self.char_embedding.row(id));
            }

            let mut offset = 0;
            for filter in &self.filters {
                let num = filter.bias.len();
                let mut best = Array1::from_elem(num, f32::NEG_INFINITY);
                for start in 0..=(max_chars - filter.width) {
                    let window = embedded
                        .slice(s![start..start + filter.width, ..])
                        .to_owned()
                        .into_shape(filter.width * char_dim)?;
                    let response = window.dot(&filter.weight) + &filter.bias;
                    best.zip_mut_with(&response, |b, &r| *b = b.max(r));
                }
                let activation = self.activation;
                pooled
                    .slice_mut(s![t, offset..offset + num])
                    .assign(&best.mapv(|x| activation.apply(x)));
                offset += num;
            }
        }

        let mut x = pooled;
        for (carry, transform) in &self.highway {
            let gate = carry.forward(&x).mapv(sigmoid);
            let candidate = transform.forward(&x).mapv(|v| v.max(0.0));
            x = &gate * &candidate + &gate.mapv(|g| 1.0 - g) * &x;
        }
        Ok(self.projection.forward(&x))
    }
}

/// LSTM cell with a recurrent projection and optional clipping.
#[derive(Debug, Clone)]
pub struct LstmCell {
    /// `[input + projection, 4 * cell]`, gates ordered i, j, f, o.
    gates: Linear,
    /// `[cell, projection]`
    projection: Array2<f32>,
    cell_clip: Option<f32>,
    proj_clip: Option<f32>,
}

impl LstmCell {
    fn restore(checkpoint: &Checkpoint, prefix: &str, options: &ElmoOptions) -> Result<Self> {
        let lstm = &options.lstm;
        let input_dim = lstm.projection_dim;
        let gates = Linear::restore(
            checkpoint,
            &format!("{}.gates", prefix),
            input_dim + lstm.projection_dim,
            4 * lstm.dim,
        )?;
        let projection = checkpoint
            .matrix(&format!("{}.projection.weight", prefix), lstm.projection_dim, lstm.dim)?
            .reversed_axes()
            .as_standard_layout()
            .to_owned();
        Ok(Self {
            gates,
            projection,
            cell_clip: lstm.cell_clip,
            proj_clip: lstm.proj_clip,
        })
    }

    fn cell_dim(&self) -> usize {
        self.projection.nrows()
    }

    fn step(
        &self,
        x: &Array1<f32>,
        h: &Array1<f32>,
        c: &Array1<f32>,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        let cell = self.cell_dim();
        let joined = concatenate(Axis(0), &[x.view(), h.view()])?;
        let z = self.gates.forward1(&joined);

        let i = z.slice(s![0..cell]).mapv(sigmoid);
        let j = z.slice(s![cell..2 * cell]).mapv(f32::tanh);
        let f = z.slice(s![2 * cell..3 * cell]).mapv(|v| sigmoid(v + FORGET_BIAS));
        let o = z.slice(s![3 * cell..4 * cell]).mapv(sigmoid);

        let mut c_next = &f * c + &i * &j;
        if let Some(clip) = self.cell_clip {
            c_next.mapv_inplace(|v| v.clamp(-clip, clip));
        }
        let m = &o * &c_next.mapv(f32::tanh);
        let mut h_next = m.dot(&self.projection);
        if let Some(clip) = self.proj_clip {
            h_next.mapv_inplace(|v| v.clamp(-clip, clip));
        }
        Ok((h_next, c_next))
    }

    /// Runs over `[steps, input]` rows in order and returns `[steps, projection]`.
    fn run(&self, inputs: &Array2<f32>) -> Result<Array2<f32>> {
        let proj = self.projection.ncols();
        let mut h = Array1::<f32>::zeros(proj);
        let mut c = Array1::<f32>::zeros(self.cell_dim());
        let mut outputs = Array2::<f32>::zeros((inputs.nrows(), proj));
        for (t, x) in inputs.outer_iter().enumerate() {
            let (h_next, c_next) = self.step(&x.to_owned(), &h, &c)?;
            outputs.row_mut(t).assign(&h_next);
            h = h_next;
            c = c_next;
        }
        Ok(outputs)
    }
}

/// Learned softmax-normalized layer weights scaled by `gamma`.
#[derive(Debug, Clone)]
pub struct ScalarMix {
    weights: Array1<f32>,
}

impl ScalarMix {
    pub fn new(raw_weights: &Array1<f32>, gamma: f32) -> Self {
        Self {
            weights: softmax1(raw_weights) * gamma,
        }
    }

    pub fn weights(&self) -> &Array1<f32> {
        &self.weights
    }

    pub fn combine(&self, layers: &[Array2<f32>]) -> Result<Array2<f32>> {
        if layers.len() != self.weights.len() {
            return Err(EvalError::ModelInference(format!(
                "scalar mix expects {} layers, got {}",
                self.weights.len(),
                layers.len()
            )));
        }
        let Some(first) = layers.first() else {
            return Err(EvalError::ModelInference("scalar mix over zero layers".to_string()));
        };
        let mut mixed = Array2::<f32>::zeros(first.dim());
        for (layer, &w) in layers.iter().zip(self.weights.iter()) {
            mixed.scaled_add(w, layer);
        }
        Ok(mixed)
    }
}

#[derive(Debug, Clone)]
pub struct ElmoOutputs {
    /// `[real_length, 2 * projection_dim]`
    pub weighted_output: Array2<f32>,
    pub probs: Option<Array1<f32>>,
}

#[derive(Debug, Clone)]
pub struct ElmoModel {
    options: ElmoOptions,
    encoder: CharCnnEncoder,
    forward_layers: Vec<LstmCell>,
    backward_layers: Vec<LstmCell>,
    mix: ScalarMix,
    classifier: Option<Linear>,
}

impl ElmoModel {
    pub fn restore(
        options: &ElmoOptions,
        checkpoint: &Checkpoint,
        max_characters_per_token: usize,
        num_labels: usize,
    ) -> Result<Self> {
        if options.char_cnn.n_characters <= (PAD_CHAR + 1) as usize {
            return Err(EvalError::ModelLoad(format!(
                "char vocabulary of {} cannot hold shifted character ids",
                options.char_cnn.n_characters
            )));
        }
        if max_characters_per_token > options.char_cnn.max_characters_per_token {
            return Err(EvalError::ModelLoad(format!(
                "max_characters_per_token {} exceeds the {} the model was trained with",
                max_characters_per_token, options.char_cnn.max_characters_per_token
            )));
        }
        let encoder = CharCnnEncoder::restore(checkpoint, options)?;
        if encoder.max_filter_width() > max_characters_per_token {
            return Err(EvalError::ModelLoad(format!(
                "filter width {} exceeds max_characters_per_token {}",
                encoder.max_filter_width(),
                max_characters_per_token
            )));
        }

        let direction = |name: &str| {
            (0..options.lstm.n_layers)
                .map(|l| LstmCell::restore(checkpoint, &format!("lstm.{}.{}", name, l), options))
                .collect::<Result<Vec<_>>>()
        };
        let forward_layers = direction("forward")?;
        let backward_layers = direction("backward")?;

        let raw_weights = checkpoint.vector("scalar_mix.weights", options.lstm.n_layers + 1)?;
        let gamma = checkpoint.vector("scalar_mix.gamma", 1)?[0];
        let mix = ScalarMix::new(&raw_weights, gamma);

        let classifier = if num_labels > 0 {
            Some(Linear::restore(checkpoint, "classifier", options.output_dim(), num_labels)?)
        } else {
            None
        };

        log::info!(
            "Built ELMo language model: {} LSTM layers, projection {}, mix weights {:?}",
            options.lstm.n_layers,
            options.lstm.projection_dim,
            mix.weights().to_vec()
        );
        Ok(Self {
            options: options.clone(),
            encoder,
            forward_layers,
            backward_layers,
            mix,
            classifier,
        })
    }

    pub fn dimension(&self) -> usize {
        self.options.output_dim()
    }

    pub fn mix(&self) -> &ScalarMix {
        &self.mix
    }

    fn run_direction(
        &self,
        layers: &[LstmCell],
        token_embeddings: &Array2<f32>,
    ) -> Result<Vec<Array2<f32>>> {
        let mut outputs = Vec::with_capacity(layers.len());
        let mut input = token_embeddings.clone();
        for (l, cell) in layers.iter().enumerate() {
            let mut output = cell.run(&input)?;
            if self.options.lstm.use_skip_connections && l > 0 {
                output += &input;
            }
            outputs.push(output.clone());
            input = output;
        }
        Ok(outputs)
    }

    /// Every layer representation, `[tokens, 2 * projection_dim]` each, token layer first.
    pub fn layer_representations(&self, input: &CharFramedInput) -> Result<Vec<Array2<f32>>> {
        let token_embeddings = self.encoder.forward(&input.char_ids)?;

        let forward = self.run_direction(&self.forward_layers, &token_embeddings)?;
        let reversed = token_embeddings.slice(s![..;-1, ..]).to_owned();
        let backward: Vec<Array2<f32>> = self
            .run_direction(&self.backward_layers, &reversed)?
            .into_iter()
            .map(|out| out.slice(s![..;-1, ..]).to_owned())
            .collect();

        let mut layers = Vec::with_capacity(forward.len() + 1);
        layers.push(concatenate(Axis(1), &[token_embeddings.view(), token_embeddings.view()])?);
        for (f, b) in forward.iter().zip(&backward) {
            layers.push(concatenate(Axis(1), &[f.view(), b.view()])?);
        }
        Ok(layers)
    }
}

impl InferenceRunner for ElmoModel {
    type Input = CharFramedInput;
    type Output = ElmoOutputs;

    fn run(&self, input: &CharFramedInput) -> Result<ElmoOutputs> {
        let layers = self.layer_representations(input)?;
        let weighted_output = self.mix.combine(&layers)?;

        let probs = match &self.classifier {
            Some(head) => {
                let last = weighted_output
                    .outer_iter()
                    .last()
                    .ok_or_else(|| {
                        EvalError::ModelInference("empty language model output".to_string())
                    })?
                    .to_owned();
                Some(softmax1(&head.forward1(&last)))
            }
            None => None,
        };

        log::debug!("ELMo forward pass over {} tokens", input.real_length);
        Ok(ElmoOutputs {
            weighted_output,
            probs,
        })
    }
}
