use ndarray::{Array1, Array2, Axis};

use super::{non_empty, SelfAttentionScores, SentenceEmbeddingEvaluator};
use crate::checkpoint::Checkpoint;
use crate::config::{BertConfig, BertEvaluatorConfig};
use crate::error::{EvalError, Result};
use crate::framing::{slice_rows, slice_square, FramedInput, MarkerFramer};
use crate::model::{BertModel, BertOutputs};
use crate::runner::InferenceRunner;
use crate::tokenizer::{SubwordTokenizer, WordPieceTokenizer};

/// Transformer-backed evaluator: WordPiece tokens, `[CLS] … [SEP]` framing.
pub struct BertEmbeddingEvaluator<T: SubwordTokenizer = WordPieceTokenizer> {
    tokenizer: T,
    framer: MarkerFramer,
    model: BertModel,
    dimension: usize,
}

impl BertEmbeddingEvaluator<WordPieceTokenizer> {
    pub fn new(config: &BertEvaluatorConfig) -> Result<Self> {
        let tokenizer = WordPieceTokenizer::from_vocab_file(&config.vocab_path)?;
        Self::with_tokenizer(config, tokenizer)
    }
}

impl<T: SubwordTokenizer> BertEmbeddingEvaluator<T> {
    pub fn with_tokenizer(config: &BertEvaluatorConfig, tokenizer: T) -> Result<Self> {
        let bert_config = BertConfig::load(&config.bert_config_path)?;
        if bert_config.hidden_size != config.dimension {
            return Err(EvalError::ModelLoad(format!(
                "configured dimension {} does not match hidden_size {}",
                config.dimension, bert_config.hidden_size
            )));
        }
        if config.max_seq_length > bert_config.max_position_embeddings {
            return Err(EvalError::ModelLoad(format!(
                "max_seq_length {} exceeds max_position_embeddings {}",
                config.max_seq_length, bert_config.max_position_embeddings
            )));
        }

        let framer = MarkerFramer::new(config.max_seq_length, &tokenizer)?;
        let checkpoint = Checkpoint::restore_latest(&config.model_dir)?;
        let model = BertModel::restore(&bert_config, &checkpoint, config.num_labels)?;

        Ok(Self {
            tokenizer,
            framer,
            model,
            dimension: config.dimension,
        })
    }

    fn infer(&self, sentence: &str) -> Result<(Vec<String>, FramedInput, BertOutputs)> {
        let tokens = self.tokenize(sentence)?;
        let framed = self.framer.frame(&tokens, &self.tokenizer)?;
        let kept = self.framer.truncate(&tokens).to_vec();
        let outputs = self.model.run(&framed)?;
        Ok((kept, framed, outputs))
    }
}

impl<T: SubwordTokenizer> SentenceEmbeddingEvaluator for BertEmbeddingEvaluator<T> {
    fn model_name(&self) -> &str {
        "bert"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn tokenize(&self, sentence: &str) -> Result<Vec<String>> {
        non_empty(sentence, self.tokenizer.tokenize(sentence)?)
    }

    fn get_token_vector_sequence(&self, sentence: &str) -> Result<(Vec<String>, Array2<f32>)> {
        let (tokens, framed, outputs) = self.infer(sentence)?;
        let vectors = slice_rows(outputs.sequence_output.view(), framed.token_span());
        Ok((tokens, vectors))
    }

    fn get_sentence_vector(&self, sentence: &str) -> Result<(Vec<String>, Array1<f32>)> {
        let (tokens, _, outputs) = self.infer(sentence)?;
        Ok((tokens, outputs.pooled_output))
    }

    fn predict(&self, sentence: &str) -> Result<Array1<f32>> {
        let (_, _, outputs) = self.infer(sentence)?;
        outputs
            .probs
            .ok_or_else(|| {
                let reason = "model was built without a classification head";
                EvalError::ModelInference(reason.to_string())
            })
    }
}

impl<T: SubwordTokenizer> SelfAttentionScores for BertEmbeddingEvaluator<T> {
    fn get_self_attention_score(&self, sentence: &str) -> Result<(Vec<String>, Array2<f32>)> {
        let (tokens, framed, outputs) = self.infer(sentence)?;
        let n_layers = outputs.attention_probs.len_of(Axis(0));
        if n_layers == 0 {
            return Err(EvalError::ModelInference("model has no attention layers".to_string()));
        }
        // [heads, max, max] -> [max, max]
        let summed = outputs
            .attention_probs
            .index_axis(Axis(0), n_layers - 1)
            .index_axis(Axis(0), 0)
            .sum_axis(Axis(0));
        Ok((tokens, slice_square(summed.view(), framed.token_span())))
    }
}
