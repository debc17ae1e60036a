use ndarray::{Array1, Array2};

use super::{non_empty, SentenceEmbeddingEvaluator};
use crate::checkpoint::Checkpoint;
use crate::config::{ElmoEvaluatorConfig, ElmoOptions};
use crate::elmo::{ElmoModel, ElmoOutputs};
use crate::error::{EvalError, Result};
use crate::framing::{slice_rows, CharFramedInput, CharFramer};
use crate::runner::InferenceRunner;
use crate::tokenizer::{post_process, MorphAnalyzer, WhitespaceAnalyzer};

/// Language-model-backed evaluator: morphemes framed as character rows.
///
/// The learned layer mix lives in the model and is fixed once restored.
/// There is no attention to inspect, so [`super::SelfAttentionScores`] is not
/// implemented.
pub struct ElmoEmbeddingEvaluator<A: MorphAnalyzer = WhitespaceAnalyzer> {
    analyzer: A,
    framer: CharFramer,
    model: ElmoModel,
}

impl ElmoEmbeddingEvaluator<WhitespaceAnalyzer> {
    pub fn new(config: &ElmoEvaluatorConfig) -> Result<Self> {
        Self::with_analyzer(config, WhitespaceAnalyzer)
    }
}

impl<A: MorphAnalyzer> ElmoEmbeddingEvaluator<A> {
    pub fn with_analyzer(config: &ElmoEvaluatorConfig, analyzer: A) -> Result<Self> {
        let options = ElmoOptions::load(&config.options_path)?;
        if options.output_dim() != config.dimension {
            return Err(EvalError::ModelLoad(format!(
                "configured dimension {} does not match 2 * projection_dim = {}",
                config.dimension,
                options.output_dim()
            )));
        }

        let framer = CharFramer::new(config.max_seq_length, config.max_characters_per_token)?;
        let checkpoint = Checkpoint::restore_latest(&config.model_dir)?;
        let model = ElmoModel::restore(
            &options,
            &checkpoint,
            config.max_characters_per_token,
            config.num_labels,
        )?;

        Ok(Self {
            analyzer,
            framer,
            model,
        })
    }

    fn infer(&self, sentence: &str) -> Result<(Vec<String>, CharFramedInput, ElmoOutputs)> {
        let tokens = self.tokenize(sentence)?;
        let framed = self.framer.frame(&tokens)?;
        let kept = self.framer.truncate(&tokens).to_vec();
        let outputs = self.model.run(&framed)?;
        Ok((kept, framed, outputs))
    }
}

impl<A: MorphAnalyzer> SentenceEmbeddingEvaluator for ElmoEmbeddingEvaluator<A> {
    fn model_name(&self) -> &str {
        "elmo"
    }

    fn dimension(&self) -> usize {
        self.model.dimension()
    }

    fn tokenize(&self, sentence: &str) -> Result<Vec<String>> {
        non_empty(sentence, post_process(self.analyzer.morphs(sentence)))
    }

    fn get_token_vector_sequence(&self, sentence: &str) -> Result<(Vec<String>, Array2<f32>)> {
        let (tokens, framed, outputs) = self.infer(sentence)?;
        let vectors = slice_rows(outputs.weighted_output.view(), framed.token_span());
        Ok((tokens, vectors))
    }

    fn get_sentence_vector(&self, sentence: &str) -> Result<(Vec<String>, Array1<f32>)> {
        let (tokens, vectors) = self.get_token_vector_sequence(sentence)?;
        let last = vectors
            .outer_iter()
            .last()
            .ok_or_else(|| EvalError::ModelInference("empty token vector sequence".to_string()))?
            .to_owned();
        Ok((tokens, last))
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
