use std::path::Path;

use ndarray::Array2;
use rand::Rng;
use serde::Serialize;

use super::table::SimilarityTable;
use crate::error::Result;

/// Query title and its ranked neighbors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LsaNeighbors {
    pub query: String,
    pub neighbors: Vec<(String, f32)>,
}

/// Latent-semantic document vectors keyed by title.
#[derive(Debug, Clone)]
pub struct LsaEvaluator {
    table: SimilarityTable,
}

impl LsaEvaluator {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            table: SimilarityTable::load(path)?,
        })
    }

    pub fn from_table(table: SimilarityTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &SimilarityTable {
        &self.table
    }

    pub fn most_similar(&self, title: &str, top_n: usize) -> Result<Vec<(String, f32)>> {
        self.table.most_similar(title, top_n)
    }

    /// Documents are addressed by their row in the table.
    pub fn most_similar_by_index(&self, doc_id: usize, top_n: usize) -> Result<LsaNeighbors> {
        let neighbors = self.table.most_similar_to_index(doc_id, top_n)?;
        let query = self.table.key(doc_id).unwrap_or_default().to_string();
        Ok(LsaNeighbors { query, neighbors })
    }

    /// `n` random titles with their vectors, rows aligned.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> (Vec<String>, Array2<f32>) {
        let picked = self.table.sample(n, rng);
        let mut vectors = Array2::zeros((picked.len(), self.table.dimension()));
        let mut titles = Vec::with_capacity(picked.len());
        for (row, &index) in picked.iter().enumerate() {
            titles.push(self.table.keys()[index].clone());
            if let Some(vector) = self.table.vector(index) {
                vectors.row_mut(row).assign(&vector);
            }
        }
        (titles, vectors)
    }
}
