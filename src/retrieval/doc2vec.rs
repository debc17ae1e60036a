use std::collections::HashMap;
use std::path::Path;

use ndarray::Array2;
use rand::Rng;
use serde::Serialize;

use super::table::SimilarityTable;
use super::{unknown_key, NeighborIndex};
use crate::error::Result;

/// Document tags of movie paragraph vectors.
pub const MOVIE_PREFIX: &str = "MOVIE_";

/// Looks up a human-readable title for a movie id (without the tag prefix).
pub trait TitleResolver {
    fn title(&self, movie_id: &str) -> Option<String>;
}

impl TitleResolver for HashMap<String, String> {
    fn title(&self, movie_id: &str) -> Option<String> {
        self.get(movie_id).cloned()
    }
}

pub fn movie_tag(movie_id: &str) -> String {
    format!("{}{}", MOVIE_PREFIX, movie_id)
}

/// Strips the tag prefix; keys without it are returned unchanged.
pub fn movie_id(tag: &str) -> &str {
    tag.strip_prefix(MOVIE_PREFIX).unwrap_or(tag)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieNeighbor {
    pub movie_id: String,
    /// Empty when the resolver does not know the movie.
    pub title: String,
    pub score: f32,
}

/// Paragraph-vector store; neighbor order comes from the index itself.
pub struct Doc2VecEvaluator<
    I: NeighborIndex = SimilarityTable,
    R: TitleResolver = HashMap<String, String>,
> {
    index: I,
    titles: R,
}

impl Doc2VecEvaluator {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(SimilarityTable::load(path)?, HashMap::new()))
    }
}

impl<I: NeighborIndex, R: TitleResolver> Doc2VecEvaluator<I, R> {
    pub fn new(index: I, titles: R) -> Self {
        Self { index, titles }
    }

    pub fn with_titles<T: TitleResolver>(self, titles: T) -> Doc2VecEvaluator<I, T> {
        Doc2VecEvaluator {
            index: self.index,
            titles,
        }
    }

    fn title_of(&self, movie_id: &str) -> String {
        self.titles.title(movie_id).unwrap_or_default()
    }

    /// Neighbors of `movie_id`, ranked by the underlying index.
    pub fn most_similar(&self, movie_id: &str, top_n: usize) -> Result<Vec<MovieNeighbor>> {
        let neighbors = self.index.ranked_neighbors(&movie_tag(movie_id), top_n)?;
        Ok(neighbors
            .into_iter()
            .map(|(tag, score)| {
                let id = self::movie_id(&tag).to_string();
                MovieNeighbor {
                    title: self.title_of(&id),
                    movie_id: id,
                    score,
                }
            })
            .collect())
    }

    /// `n` random movie ids in the corpus, mapped to their titles.
    pub fn titles_in_corpus<G: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut G,
    ) -> Vec<(String, String)> {
        let keys = self.index.keys();
        rand::seq::index::sample(rng, keys.len(), n.min(keys.len()))
            .into_iter()
            .map(|i| {
                let id = movie_id(&keys[i]).to_string();
                let title = self.title_of(&id);
                (id, title)
            })
            .collect()
    }

    /// Titles and paragraph vectors of the given movies, rows aligned.
    pub fn movie_vectors(&self, movie_ids: &[String]) -> Result<(Vec<String>, Array2<f32>)> {
        let mut titles = Vec::with_capacity(movie_ids.len());
        let mut rows = Vec::with_capacity(movie_ids.len());
        for id in movie_ids {
            let tag = movie_tag(id);
            let vector = self.index.vector_of(&tag).ok_or_else(|| unknown_key(&tag))?;
            titles.push(self.title_of(id));
            rows.push(vector);
        }
        let dimension = rows.first().map_or(0, |r| r.len());
        let mut vectors = Array2::zeros((rows.len(), dimension));
        for (i, row) in rows.iter().enumerate() {
            vectors.row_mut(i).assign(row);
        }
        Ok((titles, vectors))
    }
}
