use ndarray::{s, Array1, Array2, Array5, Axis};

use crate::attention::MultiHeadAttention;
use crate::checkpoint::Checkpoint;
use crate::common::{softmax1, Activation, LayerNorm, Linear};
use crate::config::BertConfig;
use crate::error::{EvalError, Result};
use crate::framing::FramedInput;
use crate::mlp::MLP;
use crate::runner::InferenceRunner;

#[derive(Debug, Clone)]
pub struct TransformerBlock {
    attention: MultiHeadAttention,
    mlp: MLP,
}

impl TransformerBlock {
    pub fn new(attention: MultiHeadAttention, mlp: MLP) -> Self {
        Self { attention, mlp }
    }

    fn restore(
        checkpoint: &Checkpoint,
        prefix: &str,
        config: &BertConfig,
        activation: Activation,
    ) -> Result<Self> {
        let attention = MultiHeadAttention::restore(
            checkpoint,
            &format!("{}.attention", prefix),
            config.num_attention_heads,
            config.hidden_size,
            config.layer_norm_eps,
        )?;
        let mlp = MLP::restore(
            checkpoint,
            prefix,
            config.hidden_size,
            config.intermediate_size,
            activation,
            config.layer_norm_eps,
        )?;
        Ok(Self { attention, mlp })
    }

    pub fn forward(
        &self,
        hidden_states: &Array2<f32>,
        input_mask: &[u32],
    ) -> Result<(Array2<f32>, ndarray::Array3<f32>)> {
        let (attended, probs) = self.attention.forward(hidden_states, input_mask)?;
        Ok((self.mlp.forward(&attended), probs))
    }
}

#[derive(Debug, Clone)]
pub struct Embeddings {
    word: Array2<f32>,
    position: Array2<f32>,
    token_type: Array2<f32>,
    norm: LayerNorm,
}

impl Embeddings {
    pub fn new(
        word: Array2<f32>,
        position: Array2<f32>,
        token_type: Array2<f32>,
        norm: LayerNorm,
    ) -> Self {
        Self { word, position, token_type, norm }
    }

    fn restore(checkpoint: &Checkpoint, prefix: &str, config: &BertConfig) -> Result<Self> {
        let h = config.hidden_size;
        Ok(Self {
            word: checkpoint.matrix(
                &format!("{}.word_embeddings.weight", prefix),
                config.vocab_size,
                h,
            )?,
            position: checkpoint.matrix(
                &format!("{}.position_embeddings.weight", prefix),
                config.max_position_embeddings,
                h,
            )?,
            token_type: checkpoint.matrix(
                &format!("{}.token_type_embeddings.weight", prefix),
                config.type_vocab_size,
                h,
            )?,
            norm: LayerNorm::restore(
                checkpoint,
                &format!("{}.LayerNorm", prefix),
                h,
                config.layer_norm_eps,
            )?,
        })
    }

    fn max_positions(&self) -> usize {
        self.position.nrows()
    }

    pub fn forward(&self, input_ids: &[u32], segment_ids: &[u32]) -> Result<Array2<f32>> {
        let seq_len = input_ids.len();
        if seq_len > self.max_positions() {
            return Err(EvalError::ModelInference(format!(
                "sequence of {} positions exceeds max_position_embeddings {}",
                seq_len,
                self.max_positions()
            )));
        }

        let mut embedded = Array2::<f32>::zeros((seq_len, self.word.ncols()));
        for (pos, (&token_id, &segment_id)) in input_ids.iter().zip(segment_ids).enumerate() {
            let token_id = token_id as usize;
            let segment_id = segment_id as usize;
            if token_id >= self.word.nrows() {
                return Err(EvalError::ModelInference(format!(
                    "token id {} out of vocab size {}",
                    token_id,
                    self.word.nrows()
                )));
            }
            if segment_id >= self.token_type.nrows() {
                return Err(EvalError::ModelInference(format!(
                    "segment id {} out of type vocab size {}",
                    segment_id,
                    self.token_type.nrows()
                )));
            }
            let row = &self.word.row(token_id)
                + &self.position.row(pos)
                + &self.token_type.row(segment_id);
            embedded.row_mut(pos).assign(&row);
        }
        Ok(self.norm.forward(&embedded))
    }
}

/// Raw tensors of one forward pass, still at the full framed length.
#[derive(Debug, Clone)]
pub struct BertOutputs {
    /// `[max_seq_length, hidden]`
    pub sequence_output: Array2<f32>,
    /// `[hidden]`, tanh-pooled first position.
    pub pooled_output: Array1<f32>,
    /// `[layers, batch = 1, heads, max_seq_length, max_seq_length]`
    pub attention_probs: Array5<f32>,
    /// `[num_labels]` when the model carries a classification head.
    pub probs: Option<Array1<f32>>,
}

/// BERT encoder with pooler and optional classification head.
#[derive(Debug, Clone)]
pub struct BertModel {
    config: BertConfig,
    embeddings: Embeddings,
    layers: Vec<TransformerBlock>,
    pooler: Linear,
    classifier: Option<Linear>,
}

impl BertModel {
    pub fn new(
        config: BertConfig,
        embeddings: Embeddings,
        layers: Vec<TransformerBlock>,
        pooler: Linear,
        classifier: Option<Linear>,
    ) -> Self {
        Self {
            config,
            embeddings,
            layers,
            pooler,
            classifier,
        }
    }

    /// Builds the model from a restored checkpoint.
    ///
    /// Parameter names follow the HuggingFace layout, optionally under a
    /// `bert.` prefix. With `num_labels > 0` a `classifier` head is required.
    pub fn restore(
        config: &BertConfig,
        checkpoint: &Checkpoint,
        num_labels: usize,
    ) -> Result<Self> {
        let prefix = if checkpoint.contains("bert.embeddings.word_embeddings.weight") {
            "bert."
        } else {
            ""
        };
        let activation = Activation::from_name(&config.hidden_act).ok_or_else(|| {
            EvalError::ModelLoad(format!("unsupported hidden_act '{}'", config.hidden_act))
        })?;

        let embeddings = Embeddings::restore(checkpoint, &format!("{}embeddings", prefix), config)?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| {
                let layer_prefix = format!("{}encoder.layer.{}", prefix, i);
                TransformerBlock::restore(checkpoint, &layer_prefix, config, activation)
            })
            .collect::<Result<Vec<_>>>()?;
        let pooler = Linear::restore(
            checkpoint,
            &format!("{}pooler.dense", prefix),
            config.hidden_size,
            config.hidden_size,
        )?;
        let classifier = if num_labels > 0 {
            Some(Linear::restore(checkpoint, "classifier", config.hidden_size, num_labels)?)
        } else {
            None
        };

        log::info!(
            "Built BERT encoder: {} layers, {} heads, hidden {}, classifier: {}",
            config.num_hidden_layers,
            config.num_attention_heads,
            config.hidden_size,
            classifier.is_some()
        );
        Ok(Self::new(config.clone(), embeddings, layers, pooler, classifier))
    }

    pub fn config(&self) -> &BertConfig {
        &self.config
    }

    pub fn num_labels(&self) -> usize {
        self.classifier.as_ref().map_or(0, Linear::out_dim)
    }
}

impl InferenceRunner for BertModel {
    type Input = FramedInput;
    type Output = BertOutputs;

    fn run(&self, input: &FramedInput) -> Result<BertOutputs> {
        let seq_len = input.max_seq_length();
        if input.segment_ids.len() != seq_len || input.input_mask.len() != seq_len {
            return Err(EvalError::ModelInference(format!(
                "framed arrays disagree in length: {} / {} / {}",
                seq_len,
                input.segment_ids.len(),
                input.input_mask.len()
            )));
        }

        let mut hidden_states = self.embeddings.forward(&input.input_ids, &input.segment_ids)?;
        let mut attention_probs = Array5::<f32>::zeros((
            self.layers.len(),
            1,
            self.config.num_attention_heads,
            seq_len,
            seq_len,
        ));
        for (i, block) in self.layers.iter().enumerate() {
            let (next, probs) = block.forward(&hidden_states, &input.input_mask)?;
            attention_probs.slice_mut(s![i, 0, .., .., ..]).assign(&probs);
            hidden_states = next;
        }

        let first = hidden_states.index_axis(Axis(0), 0).to_owned();
        let pooled_output = self.pooler.forward1(&first).mapv(f32::tanh);
        let probs = self
            .classifier
            .as_ref()
            .map(|head| softmax1(&head.forward1(&pooled_output)));

        log::debug!("BERT forward pass over {} positions ({} real)", seq_len, input.real_length);
        Ok(BertOutputs {
            sequence_output: hidden_states,
            pooled_output,
            attention_probs,
            probs,
        })
    }
}
