//! Hand-off to whatever renders the embeddings. Nothing here draws.

use std::io::Write;

use ndarray::{Array2, ArrayView2};
use rand::Rng;
use serde::Serialize;

use crate::error::{EvalError, Result};
use crate::evaluator::{
    homonym_vectors, sentence_vectors, SelfAttentionScores, SentenceEmbeddingEvaluator,
};
use crate::retrieval::{Doc2VecEvaluator, LsaEvaluator, NeighborIndex, TitleResolver};

/// Receives labelled vectors or attention weights for rendering.
pub trait Visualizer {
    fn token_vectors(&mut self, tokens: &[String], vectors: ArrayView2<f32>) -> Result<()>;

    fn sentence_vectors(&mut self, sentences: &[String], vectors: ArrayView2<f32>) -> Result<()>;

    fn attention_scores(&mut self, tokens: &[String], scores: ArrayView2<f32>) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    TokenVectors { labels: Vec<String>, vectors: Array2<f32> },
    SentenceVectors { labels: Vec<String>, vectors: Array2<f32> },
    AttentionScores { tokens: Vec<String>, scores: Array2<f32> },
}

fn check_rows(labels: &[String], rows: usize) -> Result<()> {
    if labels.len() != rows {
        return Err(EvalError::InvalidInput(format!(
            "{} labels for {} rows",
            labels.len(),
            rows
        )));
    }
    Ok(())
}

/// Writes every payload as one JSON line.
pub struct JsonPayload<W: Write> {
    writer: W,
}

impl<W: Write> JsonPayload<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn emit(&mut self, payload: &Payload) -> Result<()> {
        serde_json::to_writer(&mut self.writer, payload)
            .map_err(|e| EvalError::Io(e.into()))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> Visualizer for JsonPayload<W> {
    fn token_vectors(&mut self, tokens: &[String], vectors: ArrayView2<f32>) -> Result<()> {
        check_rows(tokens, vectors.nrows())?;
        self.emit(&Payload::TokenVectors {
            labels: tokens.to_vec(),
            vectors: vectors.to_owned(),
        })
    }

    fn sentence_vectors(&mut self, sentences: &[String], vectors: ArrayView2<f32>) -> Result<()> {
        check_rows(sentences, vectors.nrows())?;
        self.emit(&Payload::SentenceVectors {
            labels: sentences.to_vec(),
            vectors: vectors.to_owned(),
        })
    }

    fn attention_scores(&mut self, tokens: &[String], scores: ArrayView2<f32>) -> Result<()> {
        check_rows(tokens, scores.nrows())?;
        if scores.nrows() != scores.ncols() {
            return Err(EvalError::InvalidInput(format!(
                "attention scores must be square, got {:?}",
                scores.dim()
            )));
        }
        self.emit(&Payload::AttentionScores {
            tokens: tokens.to_vec(),
            scores: scores.to_owned(),
        })
    }
}

/// Token vectors of every sentence, labelled by token, so the homonym's
/// occurrences can be compared across contexts.
pub fn homonym<E, V>(evaluator: &E, homonym: &str, sentences: &[&str], sink: &mut V) -> Result<()>
where
    E: SentenceEmbeddingEvaluator + ?Sized,
    V: Visualizer + ?Sized,
{
    let stacked = homonym_vectors(evaluator, homonym, sentences)?;
    log::debug!(
        "Visualizing {} token vectors around '{}'",
        stacked.tokens.len(),
        stacked.homonym
    );
    sink.token_vectors(&stacked.tokens, stacked.vectors.view())
}

pub fn sentences<E, V>(evaluator: &E, sentences: &[&str], sink: &mut V) -> Result<()>
where
    E: SentenceEmbeddingEvaluator + ?Sized,
    V: Visualizer + ?Sized,
{
    let vectors = sentence_vectors(evaluator, sentences)?;
    let labels: Vec<String> = sentences.iter().map(|s| s.to_string()).collect();
    sink.sentence_vectors(&labels, vectors.view())
}

pub fn attention<E, V>(evaluator: &E, sentence: &str, sink: &mut V) -> Result<()>
where
    E: SelfAttentionScores + ?Sized,
    V: Visualizer + ?Sized,
{
    let (tokens, scores) = evaluator.get_self_attention_score(sentence)?;
    sink.attention_scores(&tokens, scores.view())
}

/// `n` random documents of the LSA table, labelled by title.
pub fn documents<G, V>(evaluator: &LsaEvaluator, n: usize, rng: &mut G, sink: &mut V) -> Result<()>
where
    G: Rng + ?Sized,
    V: Visualizer + ?Sized,
{
    let (titles, vectors) = evaluator.sample(n, rng);
    sink.sentence_vectors(&titles, vectors.view())
}

/// `n` random movies, labelled by title, or by id when the title is unknown.
pub fn movies<I, R, G, V>(
    evaluator: &Doc2VecEvaluator<I, R>,
    n: usize,
    rng: &mut G,
    sink: &mut V,
) -> Result<()>
where
    I: NeighborIndex,
    R: TitleResolver,
    G: Rng + ?Sized,
    V: Visualizer + ?Sized,
{
    let picked = evaluator.titles_in_corpus(n, rng);
    let ids: Vec<String> = picked.iter().map(|(id, _)| id.clone()).collect();
    let (_, vectors) = evaluator.movie_vectors(&ids)?;
    let labels: Vec<String> = picked
        .into_iter()
        .map(|(id, title)| if title.is_empty() { id } else { title })
        .collect();
    sink.sentence_vectors(&labels, vectors.view())
}
