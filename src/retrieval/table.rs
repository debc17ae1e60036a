use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

use crate::error::{EvalError, Result};

/// Field separator of the precomputed tables (SYMBOL FOR RECORD SEPARATOR).
pub const FIELD_SEPARATOR: char = '\u{241E}';

/// Splits one table line into exactly `expected` fields.
pub(crate) fn split_record<'a>(
    line: &'a str,
    expected: usize,
    path: &Path,
    line_no: usize,
) -> Result<Vec<&'a str>> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() != expected {
        return Err(corrupt(
            path,
            line_no,
            format!("expected {} fields, found {}", expected, fields.len()),
        ));
    }
    Ok(fields)
}

pub(crate) fn corrupt(path: &Path, line: usize, reason: String) -> EvalError {
    EvalError::CorruptTable {
        path: path.display().to_string(),
        line,
        reason,
    }
}

/// Descending by score; NaN sorts after every number.
#[allow(clippy::eq_op)]
pub(crate) fn descending<T: PartialOrd + Copy>(a: T, b: T) -> Ordering {
    // x != x only for NaN
    b.partial_cmp(&a).unwrap_or_else(|| (a != a).cmp(&(b != b)))
}

fn l2_normalize(mut row: ndarray::ArrayViewMut1<f32>) {
    let norm = row.dot(&row).sqrt();
    if norm != 0.0 {
        row.mapv_inplace(|v| v / norm);
    }
}

/// `(key, unit vector)` rows in file order.
#[derive(Debug, Clone)]
pub struct SimilarityTable {
    keys: Vec<String>,
    vectors: Array2<f32>,
}

impl SimilarityTable {
    /// Parses `{key}␞{ignored}␞{space separated floats}` lines. Blank lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;

        let mut keys = Vec::new();
        let mut data = Vec::new();
        let mut dimension = None;
        for (idx, line) in contents.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields = split_record(line, 3, path, line_no)?;
            let vector = fields[2]
                .split_whitespace()
                .map(|v| v.parse::<f32>())
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| corrupt(path, line_no, format!("non-numeric vector entry: {}", e)))?;
            if vector.is_empty() {
                return Err(corrupt(path, line_no, "empty vector".to_string()));
            }
            if let Some(v) = vector.iter().find(|v| !v.is_finite()) {
                return Err(corrupt(path, line_no, format!("non-finite vector entry: {}", v)));
            }
            match dimension {
                None => dimension = Some(vector.len()),
                Some(d) if d != vector.len() => {
                    return Err(corrupt(
                        path,
                        line_no,
                        format!("vector has {} entries, expected {}", vector.len(), d),
                    ))
                }
                Some(_) => {}
            }
            keys.push(fields[0].to_string());
            data.extend(vector);
        }

        let vectors = Array2::from_shape_vec((keys.len(), dimension.unwrap_or(0)), data)?;
        let table = Self::from_parts(keys, vectors)?;
        log::info!(
            "Loaded similarity table from {}: {} entries, {} dimensions",
            path.display(),
            table.len(),
            table.dimension()
        );
        Ok(table)
    }

    /// Builds a table from raw rows; every non-zero row is L2-normalized.
    pub fn from_parts(keys: Vec<String>, mut vectors: Array2<f32>) -> Result<Self> {
        if keys.len() != vectors.nrows() {
            return Err(EvalError::InvalidInput(format!(
                "{} keys for {} vectors",
                keys.len(),
                vectors.nrows()
            )));
        }
        for row in vectors.rows_mut() {
            l2_normalize(row);
        }
        Ok(Self { keys, vectors })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn key(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    pub fn vector(&self, index: usize) -> Option<ArrayView1<'_, f32>> {
        (index < self.len()).then(|| self.vectors.row(index))
    }

    /// Cosine similarity of `query` against every row.
    pub fn scores(&self, query: ArrayView1<f32>) -> Result<Array1<f32>> {
        if query.len() != self.dimension() {
            return Err(EvalError::InvalidInput(format!(
                "query has {} dimensions, table has {}",
                query.len(),
                self.dimension()
            )));
        }
        let mut unit = query.to_owned();
        l2_normalize(unit.view_mut());
        Ok(self.vectors.dot(&unit))
    }

    /// Neighbors of row `index`, best first. The query row and any row
    /// sharing its key are left out.
    pub fn most_similar_to_index(&self, index: usize, top_n: usize) -> Result<Vec<(String, f32)>> {
        let query = self.vector(index).ok_or_else(|| {
            let reason = format!("index {} out of range for {} entries", index, self.len());
            EvalError::InvalidInput(reason)
        })?;
        let scores = self.scores(query)?;
        let query_key = &self.keys[index];

        let mut ranked: Vec<(String, f32)> = self
            .keys
            .iter()
            .zip(scores.iter())
            .enumerate()
            .filter(|(i, (key, _))| *i != index && *key != query_key)
            .map(|(_, (key, &score))| (key.clone(), score))
            .collect();
        ranked.sort_by(|a, b| descending(a.1, b.1));
        ranked.truncate(top_n);
        Ok(ranked)
    }

    pub fn most_similar(&self, key: &str, top_n: usize) -> Result<Vec<(String, f32)>> {
        let index = self
            .index_of(key)
            .ok_or_else(|| super::unknown_key(key))?;
        self.most_similar_to_index(index, top_n)
    }

    /// Up to `n` distinct row indices chosen uniformly at random.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        rand::seq::index::sample(rng, self.len(), n.min(self.len())).into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn table_file(lines: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    fn record(key: &str, vector: &str) -> String {
        format!("{}{}_{}{}", key, FIELD_SEPARATOR, FIELD_SEPARATOR, vector)
    }

    fn five() -> SimilarityTable {
        SimilarityTable::from_parts(
            ["a", "b", "c", "d", "e"].iter().map(|k| k.to_string()).collect(),
            arr2(&[[1.0, 0.0], [0.9, 0.1], [0.0, 1.0], [-1.0, 0.0], [0.5, 0.5]]),
        )
        .unwrap()
    }

    #[test]
    fn test_load_normalizes_rows() {
        let file = table_file(&[record("첫 문서", "3 4"), String::new(), record("zero", "0 0")]);
        let table = SimilarityTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.keys(), &["첫 문서".to_string(), "zero".to_string()]);
        assert_abs_diff_eq!(table.vector(0).unwrap()[0], 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(table.vector(0).unwrap()[1], 0.8, epsilon = 1e-6);
        assert_eq!(table.vector(1).unwrap().to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_corrupt_lines_report_line_number() {
        let file = table_file(&[record("a", "1 2"), "only two\u{241E}fields".to_string()]);
        match SimilarityTable::load(file.path()) {
            Err(EvalError::CorruptTable { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected CorruptTable, got {:?}", other),
        }

        let file = table_file(&[record("a", "1 x")]);
        assert!(matches!(
            SimilarityTable::load(file.path()),
            Err(EvalError::CorruptTable { line: 1, .. })
        ));

        let file = table_file(&[record("a", "1 2"), record("b", "1 2 3")]);
        assert!(matches!(
            SimilarityTable::load(file.path()),
            Err(EvalError::CorruptTable { line: 2, .. })
        ));
    }

    #[test]
    fn test_non_finite_entries_are_corrupt() {
        for (bad, line) in [("inf 1", 2), ("NaN 2", 2), ("-infinity 0", 2)] {
            let file = table_file(&[record("a", "1 0"), record("b", bad), record("c", "0.5 0.5")]);
            match SimilarityTable::load(file.path()) {
                Err(EvalError::CorruptTable { line: l, reason, .. }) => {
                    assert_eq!(l, line);
                    assert!(reason.contains("non-finite"));
                }
                other => panic!("expected CorruptTable for '{}', got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_most_similar_excludes_query_and_truncates() {
        let table = five();
        let ranked = table.most_similar("a", 10).unwrap();
        assert_eq!(ranked.len(), 4);
        assert_eq!(ranked[0].0, "b");
        assert_eq!(ranked[3].0, "d");
        assert!(ranked.iter().all(|(k, _)| k != "a"));
        assert_eq!(table.most_similar("a", 2).unwrap().len(), 2);
        assert!(table.most_similar("a", 0).unwrap().is_empty());
        assert!(matches!(table.most_similar("missing", 3), Err(EvalError::InvalidInput(_))));
    }

    #[test]
    fn test_duplicate_keys_never_return_the_query() {
        let table = SimilarityTable::from_parts(
            vec!["x".to_string(), "y".to_string(), "x".to_string()],
            arr2(&[[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]]),
        )
        .unwrap();
        let ranked = table.most_similar_to_index(0, 5).unwrap();
        assert_eq!(ranked, vec![("y".to_string(), 0.0)]);
    }

    #[test]
    fn test_nan_scores_sort_last() {
        let mut scores = vec![0.2, f32::NAN, 0.9, -0.5];
        scores.sort_by(|a, b| descending(*a, *b));
        assert_eq!(&scores[..3], &[0.9, 0.2, -0.5]);
        assert!(scores[3].is_nan());
    }

    #[test]
    fn test_sample_is_distinct_and_bounded() {
        let table = five();
        let mut rng = StdRng::seed_from_u64(7);
        let mut picked = table.sample(3, &mut rng);
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), 3);
        assert_eq!(table.sample(50, &mut rng).len(), 5);
    }

    proptest! {
        #[test]
        fn prop_ranking_is_non_increasing(
            rows in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 3), 2..12),
            query in 0usize..12,
        ) {
            let n = rows.len();
            let query = query % n;
            let keys: Vec<String> = (0..n).map(|i| format!("doc{}", i)).collect();
            let flat: Vec<f32> = rows.into_iter().flatten().collect();
            let vectors = Array2::from_shape_vec((n, 3), flat).unwrap();
            let table = SimilarityTable::from_parts(keys, vectors).unwrap();

            for i in 0..n {
                let norm = table.vector(i).unwrap().dot(&table.vector(i).unwrap()).sqrt();
                prop_assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-4);
            }

            let ranked = table.most_similar_to_index(query, n).unwrap();
            prop_assert_eq!(ranked.len(), n - 1);
            let query_key = format!("doc{}", query);
            prop_assert!(ranked.iter().all(|(k, _)| *k != query_key));
            prop_assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));
        }
    }
}
