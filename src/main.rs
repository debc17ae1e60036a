use std::error::Error;
use std::io;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ndarray_stats::QuantileExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use sent_eval::config::{
    BertEvaluatorConfig, ElmoEvaluatorConfig, DEFAULT_DOC2VEC_TABLE, DEFAULT_LDA_MODEL,
    DEFAULT_LDA_RESULTS, DEFAULT_LSA_TABLE,
};
use sent_eval::visualize::{self, JsonPayload};
use sent_eval::{
    BertEmbeddingEvaluator, Doc2VecEvaluator, ElmoEmbeddingEvaluator, LdaEvaluator, LsaEvaluator,
    SelfAttentionScores, SentenceEmbeddingEvaluator,
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Inspect and compare sentence embedding models", long_about = None)]
struct CliArgs {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct BertArgs {
    #[clap(long, value_parser, default_value = "data/bert")]
    model_dir: PathBuf,
    #[clap(
        long,
        value_parser,
        default_value = "data/bert/multi_cased_L-12_H-768_A-12/bert_config.json"
    )]
    bert_config: PathBuf,
    #[clap(long, value_parser, default_value = "data/bert/multi_cased_L-12_H-768_A-12/vocab.txt")]
    vocab: PathBuf,
    #[clap(long, value_parser, default_value_t = 32)]
    max_seq_length: usize,
    #[clap(long, value_parser, default_value_t = 768)]
    dimension: usize,
    #[clap(long, value_parser, default_value_t = 2)]
    num_labels: usize,
}

impl BertArgs {
    fn config(&self) -> BertEvaluatorConfig {
        BertEvaluatorConfig {
            model_dir: self.model_dir.clone(),
            bert_config_path: self.bert_config.clone(),
            vocab_path: self.vocab.clone(),
            max_seq_length: self.max_seq_length,
            dimension: self.dimension,
            num_labels: self.num_labels,
        }
    }
}

#[derive(Args, Debug)]
struct ElmoArgs {
    #[clap(long, value_parser, default_value = "data/elmo")]
    model_dir: PathBuf,
    #[clap(long, value_parser, default_value = "data/elmo/options.json")]
    options: PathBuf,
    #[clap(long, value_parser, default_value_t = 32)]
    max_seq_length: usize,
    #[clap(long, value_parser, default_value_t = 30)]
    max_characters_per_token: usize,
    #[clap(long, value_parser, default_value_t = 256)]
    dimension: usize,
    #[clap(long, value_parser, default_value_t = 2)]
    num_labels: usize,
}

impl ElmoArgs {
    fn config(&self) -> ElmoEvaluatorConfig {
        ElmoEvaluatorConfig {
            model_dir: self.model_dir.clone(),
            options_path: self.options.clone(),
            max_seq_length: self.max_seq_length,
            max_characters_per_token: self.max_characters_per_token,
            dimension: self.dimension,
            num_labels: self.num_labels,
        }
    }
}

#[derive(Args, Debug)]
struct SentenceArg {
    #[clap(value_parser)]
    sentence: String,
}

#[derive(Args, Debug)]
struct SampleArgs {
    #[clap(long, value_parser, default_value_t = 100)]
    n: usize,
    /// Seed for a reproducible sample
    #[clap(long, value_parser)]
    seed: Option<u64>,
}

impl SampleArgs {
    fn rng(&self) -> StdRng {
        self.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Token vectors of one sentence
    BertTokens {
        #[clap(flatten)]
        model: BertArgs,
        #[clap(flatten)]
        input: SentenceArg,
    },
    /// Pooled sentence vector
    BertSentence {
        #[clap(flatten)]
        model: BertArgs,
        #[clap(flatten)]
        input: SentenceArg,
    },
    /// Last-layer self-attention, summed over heads
    BertAttention {
        #[clap(flatten)]
        model: BertArgs,
        #[clap(flatten)]
        input: SentenceArg,
    },
    /// Classifier probabilities
    BertPredict {
        #[clap(flatten)]
        model: BertArgs,
        #[clap(flatten)]
        input: SentenceArg,
    },
    /// Token vectors of a word across sentences, as a visualization payload
    BertHomonym {
        #[clap(flatten)]
        model: BertArgs,
        #[clap(long, value_parser)]
        homonym: String,
        #[clap(value_parser, required = true)]
        sentences: Vec<String>,
    },
    /// Sentence vectors of many sentences, as a visualization payload
    BertSentences {
        #[clap(flatten)]
        model: BertArgs,
        #[clap(value_parser, required = true)]
        sentences: Vec<String>,
    },
    ElmoTokens {
        #[clap(flatten)]
        model: ElmoArgs,
        #[clap(flatten)]
        input: SentenceArg,
    },
    ElmoSentence {
        #[clap(flatten)]
        model: ElmoArgs,
        #[clap(flatten)]
        input: SentenceArg,
    },
    ElmoPredict {
        #[clap(flatten)]
        model: ElmoArgs,
        #[clap(flatten)]
        input: SentenceArg,
    },
    ElmoHomonym {
        #[clap(flatten)]
        model: ElmoArgs,
        #[clap(long, value_parser)]
        homonym: String,
        #[clap(value_parser, required = true)]
        sentences: Vec<String>,
    },
    ElmoSentences {
        #[clap(flatten)]
        model: ElmoArgs,
        #[clap(value_parser, required = true)]
        sentences: Vec<String>,
    },
    /// Nearest documents in the LSA table
    LsaSimilar {
        #[clap(long, value_parser, default_value = DEFAULT_LSA_TABLE)]
        table: PathBuf,
        /// Row of the query document
        #[clap(long, value_parser)]
        doc_id: usize,
        #[clap(long, value_parser, default_value_t = 10)]
        top_n: usize,
    },
    /// Random LSA documents, as a visualization payload
    LsaSample {
        #[clap(long, value_parser, default_value = DEFAULT_LSA_TABLE)]
        table: PathBuf,
        #[clap(flatten)]
        sample: SampleArgs,
    },
    /// Nearest movies by paragraph vector
    Doc2vecSimilar {
        #[clap(long, value_parser, default_value = DEFAULT_DOC2VEC_TABLE)]
        table: PathBuf,
        #[clap(long, value_parser)]
        movie_id: String,
        #[clap(long, value_parser, default_value_t = 10)]
        top_n: usize,
    },
    /// Random movies, as a visualization payload
    Doc2vecMovies {
        #[clap(long, value_parser, default_value = DEFAULT_DOC2VEC_TABLE)]
        table: PathBuf,
        #[clap(flatten)]
        sample: SampleArgs,
    },
    TopicDocs {
        #[clap(long, value_parser, default_value = DEFAULT_LDA_RESULTS)]
        results: PathBuf,
        #[clap(long, value_parser, default_value = DEFAULT_LDA_MODEL)]
        model: PathBuf,
        #[clap(long, value_parser)]
        topic_id: u32,
        #[clap(long, value_parser, default_value_t = 10)]
        top_n: usize,
    },
    TopicWords {
        #[clap(long, value_parser, default_value = DEFAULT_LDA_RESULTS)]
        results: PathBuf,
        #[clap(long, value_parser, default_value = DEFAULT_LDA_MODEL)]
        model: PathBuf,
        #[clap(long, value_parser)]
        topic_id: u32,
        #[clap(long, value_parser, default_value_t = 10)]
        top_n: usize,
    },
    /// Dominant topic of each new document
    TopicInfer {
        #[clap(long, value_parser, default_value = DEFAULT_LDA_RESULTS)]
        results: PathBuf,
        #[clap(long, value_parser, default_value = DEFAULT_LDA_MODEL)]
        model: PathBuf,
        #[clap(value_parser, required = true)]
        documents: Vec<String>,
    },
}

fn predicted(probs: &ndarray::Array1<f32>) -> Result<serde_json::Value, Box<dyn Error>> {
    let label = probs.argmax()?;
    Ok(json!({ "probs": probs, "label": label }))
}

fn as_strs(items: &[String]) -> Vec<&str> {
    items.iter().map(String::as_str).collect()
}

/// Visualization commands stream payloads to stdout themselves and yield `None`.
fn run(args: CliArgs) -> Result<Option<serde_json::Value>, Box<dyn Error>> {
    let mut sink = JsonPayload::new(io::stdout().lock());
    let output = match args.command {
        Command::BertTokens { model, input } => {
            let evaluator = BertEmbeddingEvaluator::new(&model.config())?;
            let (tokens, vectors) = evaluator.get_token_vector_sequence(&input.sentence)?;
            json!({ "tokens": tokens, "vectors": vectors })
        }
        Command::BertSentence { model, input } => {
            let evaluator = BertEmbeddingEvaluator::new(&model.config())?;
            let (tokens, vector) = evaluator.get_sentence_vector(&input.sentence)?;
            json!({ "tokens": tokens, "vector": vector })
        }
        Command::BertAttention { model, input } => {
            let evaluator = BertEmbeddingEvaluator::new(&model.config())?;
            let (tokens, scores) = evaluator.get_self_attention_score(&input.sentence)?;
            json!({ "tokens": tokens, "scores": scores })
        }
        Command::BertPredict { model, input } => {
            let evaluator = BertEmbeddingEvaluator::new(&model.config())?;
            predicted(&evaluator.predict(&input.sentence)?)?
        }
        Command::BertHomonym { model, homonym, sentences } => {
            let evaluator = BertEmbeddingEvaluator::new(&model.config())?;
            visualize::homonym(&evaluator, &homonym, &as_strs(&sentences), &mut sink)?;
            return Ok(None);
        }
        Command::BertSentences { model, sentences } => {
            let evaluator = BertEmbeddingEvaluator::new(&model.config())?;
            visualize::sentences(&evaluator, &as_strs(&sentences), &mut sink)?;
            return Ok(None);
        }
        Command::ElmoTokens { model, input } => {
            let evaluator = ElmoEmbeddingEvaluator::new(&model.config())?;
            let (tokens, vectors) = evaluator.get_token_vector_sequence(&input.sentence)?;
            json!({ "tokens": tokens, "vectors": vectors })
        }
        Command::ElmoSentence { model, input } => {
            let evaluator = ElmoEmbeddingEvaluator::new(&model.config())?;
            let (tokens, vector) = evaluator.get_sentence_vector(&input.sentence)?;
            json!({ "tokens": tokens, "vector": vector })
        }
        Command::ElmoPredict { model, input } => {
            let evaluator = ElmoEmbeddingEvaluator::new(&model.config())?;
            predicted(&evaluator.predict(&input.sentence)?)?
        }
        Command::ElmoHomonym { model, homonym, sentences } => {
            let evaluator = ElmoEmbeddingEvaluator::new(&model.config())?;
            visualize::homonym(&evaluator, &homonym, &as_strs(&sentences), &mut sink)?;
            return Ok(None);
        }
        Command::ElmoSentences { model, sentences } => {
            let evaluator = ElmoEmbeddingEvaluator::new(&model.config())?;
            visualize::sentences(&evaluator, &as_strs(&sentences), &mut sink)?;
            return Ok(None);
        }
        Command::LsaSimilar { table, doc_id, top_n } => {
            let lsa = LsaEvaluator::load(&table)?;
            serde_json::to_value(lsa.most_similar_by_index(doc_id, top_n)?)?
        }
        Command::LsaSample { table, sample } => {
            let lsa = LsaEvaluator::load(&table)?;
            visualize::documents(&lsa, sample.n, &mut sample.rng(), &mut sink)?;
            return Ok(None);
        }
        Command::Doc2vecSimilar { table, movie_id, top_n } => {
            let doc2vec = Doc2VecEvaluator::load(&table)?;
            serde_json::to_value(doc2vec.most_similar(&movie_id, top_n)?)?
        }
        Command::Doc2vecMovies { table, sample } => {
            let doc2vec = Doc2VecEvaluator::load(&table)?;
            visualize::movies(&doc2vec, sample.n, &mut sample.rng(), &mut sink)?;
            return Ok(None);
        }
        Command::TopicDocs { results, model, topic_id, top_n } => {
            let lda = LdaEvaluator::load(&results, &model)?;
            serde_json::to_value(lda.show_topic_docs(topic_id, top_n)?)?
        }
        Command::TopicWords { results, model, topic_id, top_n } => {
            let lda = LdaEvaluator::load(&results, &model)?;
            serde_json::to_value(lda.show_topic_words(topic_id, top_n)?)?
        }
        Command::TopicInfer { results, model, documents } => {
            let lda = LdaEvaluator::load(&results, &model)?;
            serde_json::to_value(lda.show_new_document_topic(&as_strs(&documents)))?
        }
    };
    Ok(Some(output))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    match run(args) {
        Ok(Some(output)) => println!("{}", output),
        Ok(None) => {}
        Err(e) => {
            eprintln!("Application error: {}", e);
            let mut current_err: Option<&(dyn Error + 'static)> = e.source();
            while let Some(source) = current_err {
                eprintln!("Caused by: {}", source);
                current_err = source.source();
            }
            std::process::exit(1);
        }
    }
}
