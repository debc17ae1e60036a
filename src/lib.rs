//! Evaluation toolkit for sentence and document embeddings: contextual
//! transformer and language-model encoders, latent-semantic and paragraph
//! vectors, and LDA topics.

pub mod attention;
pub mod checkpoint;
pub mod common;
pub mod config;
pub mod elmo;
pub mod error;
pub mod evaluator;
pub mod framing;
pub mod mlp;
pub mod model;
pub mod retrieval;
pub mod runner;
pub mod tokenizer;
pub mod topic;
pub mod visualize;

pub use error::{EvalError, Result};
pub use evaluator::{
    BertEmbeddingEvaluator, ElmoEmbeddingEvaluator, SelfAttentionScores, SentenceEmbeddingEvaluator,
};
pub use retrieval::{Doc2VecEvaluator, LsaEvaluator, SimilarityTable};
pub use topic::{LdaEvaluator, TopicAssignment};
