//! Topic lookup over a precomputed assignment log and new-document
//! inference with a trained LDA model.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_LDA_MODEL, DEFAULT_LDA_RESULTS};
use crate::error::{EvalError, Result};
use crate::retrieval::table::{corrupt, descending, split_record};
use crate::tokenizer::{MorphAnalyzer, WhitespaceAnalyzer};

/// Topics at or above this probability count as present in a document.
pub const MINIMUM_PROBABILITY: f64 = 0.5;

const GAMMA_THRESHOLD: f64 = 1e-3;
const MAX_ITERATIONS: usize = 100;
const PHI_EPSILON: f64 = 1e-100;

fn digamma(mut x: f64) -> f64 {
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    result + x.ln()
        - 0.5 / x
        - f * (1.0 / 12.0 - f * (1.0 / 120.0 - f * (1.0 / 252.0 - f * (1.0 / 240.0 - f / 132.0))))
}

/// E[log theta] for theta ~ Dir(alpha).
fn dirichlet_expectation(alpha: &Array1<f64>) -> Array1<f64> {
    let total = digamma(alpha.sum());
    alpha.mapv(|a| digamma(a) - total)
}

/// Documents of every topic, best first. Built once at load.
#[derive(Debug, Clone, Default)]
pub struct TopicTable {
    topics: BTreeMap<u32, Vec<(String, f64)>>,
}

impl TopicTable {
    /// Parses `{sentence}␞{ignored}␞{topic_id}␞{probability}` lines.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut records = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields = split_record(line, 4, path, line_no)?;
            let topic_id = fields[2]
                .trim()
                .parse::<u32>()
                .map_err(|e| {
                    corrupt(path, line_no, format!("bad topic id '{}': {}", fields[2], e))
                })?;
            let probability = fields[3]
                .trim()
                .parse::<f64>()
                .map_err(|e| {
                    corrupt(path, line_no, format!("bad probability '{}': {}", fields[3], e))
                })?;
            if !probability.is_finite() {
                let reason = format!("non-finite probability '{}'", fields[3]);
                return Err(corrupt(path, line_no, reason));
            }
            records.push((fields[0].to_string(), topic_id, probability));
        }

        let table = Self::from_records(records);
        log::info!(
            "Loaded topic assignments from {}: {} topics",
            path.display(),
            table.topics.len()
        );
        Ok(table)
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, u32, f64)>,
    {
        let mut topics: BTreeMap<u32, Vec<(String, f64)>> = BTreeMap::new();
        for (sentence, topic_id, probability) in records {
            topics.entry(topic_id).or_default().push((sentence, probability));
        }
        for docs in topics.values_mut() {
            docs.sort_by(|a, b| descending(a.1, b.1));
        }
        Self { topics }
    }

    pub fn topic_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.topics.keys().copied()
    }

    pub fn documents(&self, topic_id: u32) -> Result<&[(String, f64)]> {
        self.topics
            .get(&topic_id)
            .map(Vec::as_slice)
            .ok_or(EvalError::UnknownTopic(topic_id))
    }

    pub fn show_topic_docs(&self, topic_id: u32, top_n: usize) -> Result<&[(String, f64)]> {
        let docs = self.documents(topic_id)?;
        Ok(&docs[..top_n.min(docs.len())])
    }
}

/// Queries a trained topic model answers.
pub trait TopicModel {
    fn num_topics(&self) -> usize;

    /// Highest-weight words of one topic.
    fn show_topic(&self, topic_id: u32, top_n: usize) -> Result<Vec<(String, f64)>>;

    /// `(word id, count)` pairs sorted by id; unknown tokens are dropped.
    fn doc2bow(&self, tokens: &[String]) -> Vec<(usize, u32)>;

    /// Topic distribution of one document, topics below `minimum_probability` left out.
    fn document_topics(&self, bow: &[(usize, u32)], minimum_probability: f64) -> Vec<(u32, f64)>;
}

#[derive(Debug, Deserialize)]
struct LdaModelFile {
    alpha: Vec<f64>,
    id2word: Vec<String>,
    /// Topic-word variational parameters, one row per topic.
    topic_word: Vec<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct LdaModel {
    alpha: Array1<f64>,
    id2word: Vec<String>,
    word2id: HashMap<String, usize>,
    /// exp(E[log beta]), `[topics, words]`
    exp_elog_beta: Array2<f64>,
    /// Row-normalized topic-word weights.
    topics: Array2<f64>,
}

impl LdaModel {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EvalError::ModelLoad(format!(
                "LDA model file not found at: {}",
                path.display()
            )));
        }
        let file: LdaModelFile = serde_json::from_str(&fs::read_to_string(path)?)?;
        let model = Self::new(file.alpha, file.id2word, file.topic_word)?;
        log::info!(
            "Loaded LDA model from {}: {} topics, {} words",
            path.display(),
            model.num_topics(),
            model.id2word.len()
        );
        Ok(model)
    }

    pub fn new(alpha: Vec<f64>, id2word: Vec<String>, topic_word: Vec<Vec<f64>>) -> Result<Self> {
        let n_topics = alpha.len();
        let n_words = id2word.len();
        if n_topics == 0 || n_words == 0 {
            return Err(EvalError::ModelLoad("LDA model has no topics or no words".to_string()));
        }
        if topic_word.len() != n_topics || topic_word.iter().any(|row| row.len() != n_words) {
            return Err(EvalError::ModelLoad(format!(
                "topic_word must be {} x {}",
                n_topics, n_words
            )));
        }
        if alpha.iter().chain(topic_word.iter().flatten()).any(|&v| !(v > 0.0)) {
            return Err(EvalError::ModelLoad(
                "alpha and topic_word entries must be positive".to_string(),
            ));
        }

        let flat: Vec<f64> = topic_word.into_iter().flatten().collect();
        let lambda = Array2::from_shape_vec((n_topics, n_words), flat)
            .map_err(|e| EvalError::ModelLoad(e.to_string()))?;
        let mut exp_elog_beta = Array2::zeros((n_topics, n_words));
        for (k, row) in lambda.outer_iter().enumerate() {
            exp_elog_beta
                .row_mut(k)
                .assign(&dirichlet_expectation(&row.to_owned()).mapv(f64::exp));
        }
        let totals = lambda.sum_axis(Axis(1)).insert_axis(Axis(1));
        let topics = &lambda / &totals;

        let word2id = id2word
            .iter()
            .enumerate()
            .map(|(id, word)| (word.clone(), id))
            .collect();
        Ok(Self {
            alpha: Array1::from(alpha),
            id2word,
            word2id,
            exp_elog_beta,
            topics,
        })
    }

    /// Variational E-step for one document; returns the normalized gamma.
    pub fn infer(&self, bow: &[(usize, u32)]) -> Array1<f64> {
        let n_topics = self.num_topics();
        let counts: Array1<f64> = bow.iter().map(|&(_, c)| c as f64).collect();
        // [topics, doc words]
        let mut beta_d = Array2::zeros((n_topics, bow.len()));
        for (j, &(id, _)) in bow.iter().enumerate() {
            beta_d.column_mut(j).assign(&self.exp_elog_beta.column(id));
        }

        let mut gamma = Array1::<f64>::ones(n_topics);
        let mut exp_elog_theta = dirichlet_expectation(&gamma).mapv(f64::exp);
        let mut phinorm = exp_elog_theta.dot(&beta_d) + PHI_EPSILON;
        for _ in 0..MAX_ITERATIONS {
            let last = gamma.clone();
            gamma = &self.alpha + &(&exp_elog_theta * &beta_d.dot(&(&counts / &phinorm)));
            exp_elog_theta = dirichlet_expectation(&gamma).mapv(f64::exp);
            phinorm = exp_elog_theta.dot(&beta_d) + PHI_EPSILON;
            let mean_change = (&gamma - &last).mapv(f64::abs).mean().unwrap_or(0.0);
            if mean_change < GAMMA_THRESHOLD {
                break;
            }
        }
        let total = gamma.sum();
        gamma / total
    }
}

impl TopicModel for LdaModel {
    fn num_topics(&self) -> usize {
        self.alpha.len()
    }

    fn show_topic(&self, topic_id: u32, top_n: usize) -> Result<Vec<(String, f64)>> {
        let row = self
            .topics
            .outer_iter()
            .nth(topic_id as usize)
            .ok_or(EvalError::UnknownTopic(topic_id))?;
        let mut words: Vec<(String, f64)> = row
            .iter()
            .enumerate()
            .map(|(id, &w)| (self.id2word[id].clone(), w))
            .collect();
        words.sort_by(|a, b| b.1.total_cmp(&a.1));
        words.truncate(top_n);
        Ok(words)
    }

    fn doc2bow(&self, tokens: &[String]) -> Vec<(usize, u32)> {
        let mut counts: BTreeMap<usize, u32> = BTreeMap::new();
        for token in tokens {
            if let Some(&id) = self.word2id.get(token) {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        counts.into_iter().collect()
    }

    fn document_topics(&self, bow: &[(usize, u32)], minimum_probability: f64) -> Vec<(u32, f64)> {
        self.infer(bow)
            .iter()
            .enumerate()
            .filter(|(_, &p)| p >= minimum_probability)
            .map(|(k, &p)| (k as u32, p))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopicAssignment {
    Dominant { topic_id: u32, probability: f64 },
    NoDominantTopic,
}

impl TopicAssignment {
    /// Exactly one surviving topic is dominant; none or several is not.
    pub fn from_topics(topics: &[(u32, f64)]) -> Self {
        match topics {
            [(topic_id, probability)] => TopicAssignment::Dominant {
                topic_id: *topic_id,
                probability: *probability,
            },
            _ => TopicAssignment::NoDominantTopic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentTopic {
    pub document: String,
    pub assignment: TopicAssignment,
}

pub struct LdaEvaluator<M: TopicModel = LdaModel, A: MorphAnalyzer = WhitespaceAnalyzer> {
    table: TopicTable,
    model: M,
    analyzer: A,
}

impl LdaEvaluator {
    pub fn load(results_path: &Path, model_path: &Path) -> Result<Self> {
        Ok(Self::new(
            TopicTable::load(results_path)?,
            LdaModel::load(model_path)?,
            WhitespaceAnalyzer,
        ))
    }

    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_LDA_RESULTS), Path::new(DEFAULT_LDA_MODEL))
    }
}

impl<M: TopicModel, A: MorphAnalyzer> LdaEvaluator<M, A> {
    pub fn new(table: TopicTable, model: M, analyzer: A) -> Self {
        Self {
            table,
            model,
            analyzer,
        }
    }

    pub fn table(&self) -> &TopicTable {
        &self.table
    }

    pub fn show_topic_docs(&self, topic_id: u32, top_n: usize) -> Result<&[(String, f64)]> {
        self.table.show_topic_docs(topic_id, top_n)
    }

    pub fn show_topic_words(&self, topic_id: u32, top_n: usize) -> Result<Vec<(String, f64)>> {
        self.model.show_topic(topic_id, top_n)
    }

    pub fn show_new_document_topic(&self, documents: &[&str]) -> Vec<DocumentTopic> {
        documents
            .iter()
            .map(|document| {
                let bow = self.model.doc2bow(&self.analyzer.morphs(document));
                let topics = self.model.document_topics(&bow, MINIMUM_PROBABILITY);
                let assignment = TopicAssignment::from_topics(&topics);
                log::debug!("{:?} -> {:?}", document, assignment);
                DocumentTopic {
                    document: document.to_string(),
                    assignment,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::FIELD_SEPARATOR;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn log_line(sentence: &str, topic: &str, prob: &str) -> String {
        let sep = FIELD_SEPARATOR;
        format!("{}{}x{}{}{}{}", sentence, sep, sep, topic, sep, prob)
    }

    fn write_lines(lines: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    fn two_topic_model() -> LdaModel {
        LdaModel::new(
            vec![0.1, 0.1],
            ["영화", "배우", "축구", "골"].iter().map(|w| w.to_string()).collect(),
            vec![vec![50.0, 40.0, 0.1, 0.1], vec![0.1, 0.1, 60.0, 30.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_digamma_values() {
        assert_abs_diff_eq!(digamma(1.0), -0.577_215_664_9, epsilon = 1e-8);
        assert_abs_diff_eq!(digamma(0.5), -1.963_510_026_0, epsilon = 1e-8);
        assert_abs_diff_eq!(digamma(10.0), 2.251_752_589_1, epsilon = 1e-8);
    }

    #[test]
    fn test_table_sorted_descending() {
        let file = write_lines(&[
            log_line("a", "1", "0.2"),
            log_line("b", "1", "0.9"),
            String::new(),
            log_line("c", "0", "0.4"),
            log_line("d", "1", "0.5"),
        ]);
        let table = TopicTable::load(file.path()).unwrap();
        assert_eq!(table.topic_ids().collect::<Vec<_>>(), vec![0, 1]);
        let docs = table.show_topic_docs(1, 10).unwrap();
        assert_eq!(
            docs.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
            vec!["b", "d", "a"]
        );
        assert_eq!(table.show_topic_docs(1, 1).unwrap().len(), 1);
        assert!(matches!(table.show_topic_docs(7, 3), Err(EvalError::UnknownTopic(7))));
    }

    #[test]
    fn test_table_corrupt_rows() {
        let file = write_lines(&[log_line("a", "one", "0.2")]);
        assert!(matches!(
            TopicTable::load(file.path()),
            Err(EvalError::CorruptTable { line: 1, .. })
        ));
        let file = write_lines(&[log_line("a", "1", "0.2"), "a\u{241E}b".to_string()]);
        assert!(matches!(
            TopicTable::load(file.path()),
            Err(EvalError::CorruptTable { line: 2, .. })
        ));
    }

    #[test]
    fn test_table_rejects_non_finite_probability() {
        for prob in ["inf", "NaN"] {
            let file = write_lines(&[log_line("a", "0", "0.3"), log_line("b", "0", prob)]);
            assert!(matches!(
                TopicTable::load(file.path()),
                Err(EvalError::CorruptTable { line: 2, .. })
            ));
        }
    }

    #[test]
    fn test_two_even_topics_have_no_dominant() {
        assert_eq!(
            TopicAssignment::from_topics(&[(0, 0.5), (1, 0.5)]),
            TopicAssignment::NoDominantTopic
        );
        assert_eq!(TopicAssignment::from_topics(&[]), TopicAssignment::NoDominantTopic);
        assert_eq!(
            TopicAssignment::from_topics(&[(3, 0.8)]),
            TopicAssignment::Dominant { topic_id: 3, probability: 0.8 }
        );

        // nothing known about the document: the distribution is alpha, 0.5 each
        let model = two_topic_model();
        let topics = model.document_topics(&[], MINIMUM_PROBABILITY);
        assert_eq!(topics.len(), 2);
        assert_abs_diff_eq!(topics[0].1, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_inference_finds_dominant_topic() {
        let model = two_topic_model();
        let words: Vec<String> = ["축구", "골", "축구", "없는말"].iter().map(|w| w.to_string()).collect();
        let bow = model.doc2bow(&words);
        assert_eq!(bow, vec![(2, 2), (3, 1)]);
        let dist = model.infer(&bow);
        assert_abs_diff_eq!(dist.sum(), 1.0, epsilon = 1e-9);
        assert!(dist[1] > 0.8);
    }

    #[test]
    fn test_show_topic_words() {
        let model = two_topic_model();
        let words = model.show_topic(0, 2).unwrap();
        assert_eq!(words[0].0, "영화");
        assert_eq!(words[1].0, "배우");
        assert!(matches!(model.show_topic(2, 3), Err(EvalError::UnknownTopic(2))));
    }

    #[test]
    fn test_invalid_model_rejected() {
        assert!(LdaModel::new(vec![0.1], vec!["a".to_string()], vec![vec![0.0]]).is_err());
        assert!(LdaModel::new(vec![0.1, 0.1], vec!["a".to_string()], vec![vec![1.0]]).is_err());
    }

    #[test]
    fn test_evaluator_reports_per_document() {
        let evaluator =
            LdaEvaluator::new(TopicTable::default(), two_topic_model(), WhitespaceAnalyzer);
        let results = evaluator.show_new_document_topic(&["축구 골 축구", "모르는 문장"]);
        assert!(matches!(results[0].assignment, TopicAssignment::Dominant { topic_id: 1, .. }));
        assert_eq!(results[1].assignment, TopicAssignment::NoDominantTopic);
        assert_eq!(results[1].document, "모르는 문장");
    }
}
