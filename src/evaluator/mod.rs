//! Uniform embedding extraction over the sequence-model backends.

use ndarray::{concatenate, Array1, Array2, Axis};
use serde::Serialize;

use crate::error::{EvalError, Result};

pub mod bert;
pub mod elmo;

pub use bert::BertEmbeddingEvaluator;
pub use elmo::ElmoEmbeddingEvaluator;

/// tokenize → frame → infer → slice back to the caller's tokens.
///
/// Token-level results are aligned 1:1 with the returned tokens, which are
/// the tokens that survived truncation. Framing markers never show up.
pub trait SentenceEmbeddingEvaluator {
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    fn tokenize(&self, sentence: &str) -> Result<Vec<String>>;

    /// `[tokens, dimension]`
    fn get_token_vector_sequence(&self, sentence: &str) -> Result<(Vec<String>, Array2<f32>)>;

    fn get_sentence_vector(&self, sentence: &str) -> Result<(Vec<String>, Array1<f32>)>;

    /// Class probabilities straight from the classification head.
    fn predict(&self, sentence: &str) -> Result<Array1<f32>>;
}

/// Backends that expose their self-attention weights.
pub trait SelfAttentionScores: SentenceEmbeddingEvaluator {
    /// Last layer, summed over heads, `[tokens, tokens]`.
    fn get_self_attention_score(&self, sentence: &str) -> Result<(Vec<String>, Array2<f32>)>;
}

pub(crate) fn non_empty(sentence: &str, tokens: Vec<String>) -> Result<Vec<String>> {
    if tokens.is_empty() {
        return Err(EvalError::EmptyInput {
            sentence: sentence.to_string(),
        });
    }
    Ok(tokens)
}

/// Token vectors of every sentence, stacked, with the sentences re-rendered
/// so the occurrences of one word stand out.
#[derive(Debug, Clone, Serialize)]
pub struct HomonymVectors {
    pub homonym: String,
    /// One entry per row of `vectors`.
    pub tokens: Vec<String>,
    /// Source sentence of each row.
    pub sentence_ids: Vec<usize>,
    /// Tokens joined by spaces, subword markers dropped, the homonym quoted.
    pub sentences: Vec<String>,
    pub vectors: Array2<f32>,
}

pub fn homonym_vectors<E>(
    evaluator: &E,
    homonym: &str,
    sentences: &[&str],
) -> Result<HomonymVectors>
where
    E: SentenceEmbeddingEvaluator + ?Sized,
{
    let mut tokens = Vec::new();
    let mut sentence_ids = Vec::new();
    let mut rendered = Vec::with_capacity(sentences.len());
    let mut blocks = Vec::with_capacity(sentences.len());

    for (id, sentence) in sentences.iter().enumerate() {
        let (sentence_tokens, vectors) = evaluator.get_token_vector_sequence(sentence)?;
        let words: Vec<String> = sentence_tokens
            .iter()
            .map(|token| {
                let word = token.replace("##", "");
                if token == homonym {
                    format!("\"{}\"", word)
                } else {
                    word
                }
            })
            .collect();
        rendered.push(words.join(" "));
        sentence_ids.extend(std::iter::repeat(id).take(sentence_tokens.len()));
        tokens.extend(sentence_tokens);
        blocks.push(vectors);
    }

    let vectors = if blocks.is_empty() {
        Array2::zeros((0, evaluator.dimension()))
    } else {
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        concatenate(Axis(0), &views)?
    };
    Ok(HomonymVectors {
        homonym: homonym.to_string(),
        tokens,
        sentence_ids,
        sentences: rendered,
        vectors,
    })
}

/// `[sentences, dimension]`, one sentence vector per row.
pub fn sentence_vectors<E>(evaluator: &E, sentences: &[&str]) -> Result<Array2<f32>>
where
    E: SentenceEmbeddingEvaluator + ?Sized,
{
    let mut stacked = Array2::zeros((sentences.len(), evaluator.dimension()));
    for (row, sentence) in sentences.iter().enumerate() {
        let (_, vector) = evaluator.get_sentence_vector(sentence)?;
        if vector.len() != evaluator.dimension() {
            return Err(EvalError::ModelInference(format!(
                "sentence vector has {} dimensions, expected {}",
                vector.len(),
                evaluator.dimension()
            )));
        }
        stacked.row_mut(row).assign(&vector);
    }
    Ok(stacked)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-hot per token position; the sentence vector is the column sum.
    struct Counting;

    impl SentenceEmbeddingEvaluator for Counting {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            3
        }

        fn tokenize(&self, sentence: &str) -> Result<Vec<String>> {
            non_empty(sentence, sentence.split_whitespace().map(str::to_string).collect())
        }

        fn get_token_vector_sequence(&self, sentence: &str) -> Result<(Vec<String>, Array2<f32>)> {
            let tokens = self.tokenize(sentence)?;
            let vectors = Array2::from_shape_fn((tokens.len(), 3), |(i, j)| {
                if i % 3 == j {
                    1.0
                } else {
                    0.0
                }
            });
            Ok((tokens, vectors))
        }

        fn get_sentence_vector(&self, sentence: &str) -> Result<(Vec<String>, Array1<f32>)> {
            let (tokens, vectors) = self.get_token_vector_sequence(sentence)?;
            Ok((tokens, vectors.sum_axis(Axis(0))))
        }

        fn predict(&self, _sentence: &str) -> Result<Array1<f32>> {
            Err(EvalError::ModelInference("no classification head".to_string()))
        }
    }

    #[test]
    fn test_homonym_vectors_stack_every_sentence() {
        let stacked =
            homonym_vectors(&Counting, "배", &["배 가 아프다", "배 를 ##타다 강 에서"]).unwrap();
        assert_eq!(stacked.vectors.dim(), (8, 3));
        assert_eq!(stacked.tokens.len(), 8);
        assert_eq!(stacked.sentence_ids, vec![0, 0, 0, 1, 1, 1, 1, 1]);
        assert_eq!(stacked.sentences[0], "\"배\" 가 아프다");
        assert_eq!(stacked.sentences[1], "\"배\" 를 타다 강 에서");
    }

    #[test]
    fn test_empty_sentence_fails_the_batch() {
        assert!(matches!(
            homonym_vectors(&Counting, "배", &["배", "   "]),
            Err(EvalError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_sentence_vectors_rows() {
        let stacked = sentence_vectors(&Counting, &["a b", "a b c d"]).unwrap();
        assert_eq!(stacked.row(0).to_vec(), vec![1.0, 1.0, 0.0]);
        assert_eq!(stacked.row(1).to_vec(), vec![2.0, 1.0, 1.0]);
        assert_eq!(sentence_vectors(&Counting, &[]).unwrap().dim(), (0, 3));
    }
}
