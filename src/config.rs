use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{EvalError, Result};

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T> {
    if !path.exists() {
        return Err(EvalError::ModelLoad(format!(
            "{} file not found at: {}",
            what,
            path.display()
        )));
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    serde_json::from_str(&contents).map_err(|e| {
        EvalError::ModelLoad(format!(
            "Failed to deserialize {} from {}: {}",
            what,
            path.display(),
            e
        ))
    })
}

/// Hyperparameters of a BERT encoder, read from `bert_config.json`.
///
/// Both the original TF field names and the HuggingFace aliases are accepted.
#[derive(Deserialize, Debug, Clone)]
pub struct BertConfig {
    pub vocab_size: usize,
    #[serde(alias = "n_embd")]
    pub hidden_size: usize,
    #[serde(alias = "n_layer")]
    pub num_hidden_layers: usize,
    #[serde(alias = "n_head")]
    pub num_attention_heads: usize,
    #[serde(alias = "n_inner")]
    pub intermediate_size: usize,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: String,
    #[serde(alias = "n_positions")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps", alias = "layer_norm_epsilon")]
    pub layer_norm_eps: f32,
}

fn default_hidden_act() -> String {
    "gelu".to_string()
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f32 {
    1e-12
}

impl BertConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config: BertConfig = read_json(config_path, "BERT config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(EvalError::ModelLoad(format!(
                "hidden_size ({}) must be divisible by num_attention_heads ({})",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.num_hidden_layers == 0 {
            return Err(EvalError::ModelLoad("num_hidden_layers must be > 0".to_string()));
        }
        match self.hidden_act.as_str() {
            "gelu" | "gelu_new" | "relu" | "tanh" => Ok(()),
            other => Err(EvalError::ModelLoad(format!(
                "unsupported hidden_act '{}'",
                other
            ))),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct LstmOptions {
    /// Cell size of each LSTM.
    pub dim: usize,
    pub projection_dim: usize,
    pub n_layers: usize,
    #[serde(default)]
    pub cell_clip: Option<f32>,
    #[serde(default)]
    pub proj_clip: Option<f32>,
    #[serde(default)]
    pub use_skip_connections: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CharEmbeddingOptions {
    pub dim: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CharCnnOptions {
    pub embedding: CharEmbeddingOptions,
    /// `(width, num_filters)` pairs.
    pub filters: Vec<(usize, usize)>,
    pub n_highway: usize,
    #[serde(default = "default_n_characters")]
    pub n_characters: usize,
    pub max_characters_per_token: usize,
    #[serde(default = "default_activation")]
    pub activation: String,
}

fn default_n_characters() -> usize {
    262
}

fn default_activation() -> String {
    "relu".to_string()
}

/// The language model's `options.json`, in the bilm layout.
#[derive(Deserialize, Debug, Clone)]
pub struct ElmoOptions {
    pub lstm: LstmOptions,
    pub char_cnn: CharCnnOptions,
}

impl ElmoOptions {
    pub fn load(options_path: &Path) -> Result<Self> {
        let options: ElmoOptions = read_json(options_path, "ELMo options")?;
        if options.lstm.n_layers == 0 {
            return Err(EvalError::ModelLoad("lstm.n_layers must be > 0".to_string()));
        }
        if options.char_cnn.filters.is_empty() {
            return Err(EvalError::ModelLoad("char_cnn.filters is empty".to_string()));
        }
        match options.char_cnn.activation.as_str() {
            "relu" | "tanh" => Ok(options),
            other => Err(EvalError::ModelLoad(format!(
                "unsupported char_cnn activation '{}'",
                other
            ))),
        }
    }

    /// Width of every layer representation: forward and backward states side by side.
    pub fn output_dim(&self) -> usize {
        2 * self.lstm.projection_dim
    }

    pub fn n_filters(&self) -> usize {
        self.char_cnn.filters.iter().map(|&(_, n)| n).sum()
    }
}

/// Where the BERT evaluator finds its files and how it frames input.
#[derive(Debug, Clone)]
pub struct BertEvaluatorConfig {
    pub model_dir: PathBuf,
    pub bert_config_path: PathBuf,
    pub vocab_path: PathBuf,
    pub max_seq_length: usize,
    pub dimension: usize,
    pub num_labels: usize,
}

impl Default for BertEvaluatorConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("data/bert"),
            bert_config_path: PathBuf::from(
                "data/bert/multi_cased_L-12_H-768_A-12/bert_config.json",
            ),
            vocab_path: PathBuf::from("data/bert/multi_cased_L-12_H-768_A-12/vocab.txt"),
            max_seq_length: 32,
            dimension: 768,
            num_labels: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElmoEvaluatorConfig {
    pub model_dir: PathBuf,
    pub options_path: PathBuf,
    pub max_seq_length: usize,
    pub max_characters_per_token: usize,
    pub dimension: usize,
    pub num_labels: usize,
}

impl Default for ElmoEvaluatorConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("data/elmo"),
            options_path: PathBuf::from("data/elmo/options.json"),
            max_seq_length: 32,
            max_characters_per_token: 30,
            dimension: 256,
            num_labels: 2,
        }
    }
}

/// Default locations of the precomputed tables and the topic model.
pub const DEFAULT_LSA_TABLE: &str = "data/lsa-tfidf.vecs";
pub const DEFAULT_DOC2VEC_TABLE: &str = "data/doc2vec.vecs";
pub const DEFAULT_LDA_RESULTS: &str = "data/lda.results";
pub const DEFAULT_LDA_MODEL: &str = "data/lda.model";
