//! Nearest-neighbor retrieval over precomputed document vectors.

use ndarray::ArrayView1;

use crate::error::{EvalError, Result};

pub mod doc2vec;
pub mod lsa;
pub mod table;

pub use doc2vec::{Doc2VecEvaluator, MovieNeighbor, TitleResolver};
pub use lsa::{LsaEvaluator, LsaNeighbors};
pub use table::{SimilarityTable, FIELD_SEPARATOR};

/// A vector store that ranks its own neighbors.
pub trait NeighborIndex {
    fn keys(&self) -> &[String];

    fn vector_of(&self, key: &str) -> Option<ArrayView1<'_, f32>>;

    /// Best first, the query itself excluded, at most `top_n` entries.
    fn ranked_neighbors(&self, key: &str, top_n: usize) -> Result<Vec<(String, f32)>>;
}

impl NeighborIndex for SimilarityTable {
    fn keys(&self) -> &[String] {
        SimilarityTable::keys(self)
    }

    fn vector_of(&self, key: &str) -> Option<ArrayView1<'_, f32>> {
        self.index_of(key).and_then(|i| self.vector(i))
    }

    fn ranked_neighbors(&self, key: &str, top_n: usize) -> Result<Vec<(String, f32)>> {
        self.most_similar(key, top_n)
    }
}

pub(crate) fn unknown_key(key: &str) -> EvalError {
    EvalError::InvalidInput(format!("'{}' is not in the table", key))
}
