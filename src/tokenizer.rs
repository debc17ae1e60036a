use std::path::Path;

use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::normalizers::NormalizerWrapper;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::pre_tokenizers::PreTokenizerWrapper;
use tokenizers::Tokenizer;

use crate::error::{EvalError, Result};

pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const UNK_TOKEN: &str = "[UNK]";

/// Maps a token string to its vocabulary id.
pub trait Vocab {
    fn token_to_id(&self, token: &str) -> Option<u32>;
}

/// Subword adapter used by the transformer backend.
pub trait SubwordTokenizer: Vocab {
    fn tokenize(&self, text: &str) -> Result<Vec<String>>;
}

/// Morpheme adapter used by the language-model and topic backends.
pub trait MorphAnalyzer {
    fn morphs(&self, text: &str) -> Vec<String>;
}

/// Splits on whitespace; stands in when no morphological analyzer is plugged in.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceAnalyzer;

impl MorphAnalyzer for WhitespaceAnalyzer {
    fn morphs(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}

/// Cleans analyzer output before it reaches the language model: trims every
/// morpheme and drops the ones that end up empty.
pub fn post_process(tokens: Vec<String>) -> Vec<String> {
    tokens
        .into_iter()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Cased multilingual WordPiece tokenizer built from a BERT `vocab.txt`.
#[derive(Debug)]
pub struct WordPieceTokenizer {
    tokenizer: Tokenizer,
}

impl WordPieceTokenizer {
    pub fn from_vocab_file(vocab_path: &Path) -> Result<Self> {
        if !vocab_path.exists() {
            return Err(EvalError::ModelLoad(format!(
                "Vocabulary file not found at: {}",
                vocab_path.display()
            )));
        }
        let path_str = vocab_path.to_str().ok_or_else(|| {
            EvalError::ModelLoad(format!("non UTF-8 vocab path {:?}", vocab_path))
        })?;

        let wordpiece = WordPiece::from_file(path_str)
            .unk_token(UNK_TOKEN.to_string())
            .build()
            .map_err(|e| EvalError::ModelLoad(format!("Failed to build WordPiece model: {}", e)))?;

        let mut tokenizer = Tokenizer::new(wordpiece);
        // do_lower_case = false
        tokenizer.with_normalizer(NormalizerWrapper::BertNormalizer(BertNormalizer::new(
            true, true, None, false,
        )));
        tokenizer.with_pre_tokenizer(PreTokenizerWrapper::BertPreTokenizer(BertPreTokenizer));

        log::info!(
            "Loaded WordPiece vocabulary from {} ({} entries)",
            vocab_path.display(),
            tokenizer.get_vocab_size(true)
        );
        Ok(Self { tokenizer })
    }

    pub fn get_vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

impl Vocab for WordPieceTokenizer {
    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }
}

impl SubwordTokenizer for WordPieceTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| {
                EvalError::InvalidInput(format!("Encoding failed for text '{}': {}", text, e))
            })?;
        Ok(encoding.get_tokens().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vocab_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let vocab = [
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "나", "##는", "학교", "##에", "간", "##다",
        ];
        for token in vocab {
            writeln!(file, "{}", token).unwrap();
        }
        file
    }

    #[test]
    fn test_missing_vocab_is_model_load_error() {
        let result = WordPieceTokenizer::from_vocab_file(Path::new("non_existent_vocab.txt"));
        assert!(matches!(result, Err(EvalError::ModelLoad(_))));
    }

    #[test]
    fn test_wordpiece_splits_korean_sentence() {
        let vocab = vocab_file();
        let tokenizer = WordPieceTokenizer::from_vocab_file(vocab.path()).unwrap();
        assert_eq!(tokenizer.get_vocab_size(), 11);

        let tokens = tokenizer.tokenize("나는 학교에 간다").unwrap();
        assert_eq!(tokens, vec!["나", "##는", "학교", "##에", "간", "##다"]);
        assert_eq!(tokenizer.token_to_id("[CLS]"), Some(2));
        assert_eq!(tokenizer.token_to_id("없음"), None);
    }

    #[test]
    fn test_unknown_word_becomes_unk() {
        let vocab = vocab_file();
        let tokenizer = WordPieceTokenizer::from_vocab_file(vocab.path()).unwrap();
        assert_eq!(tokenizer.tokenize("바다").unwrap(), vec![UNK_TOKEN]);
    }

    #[test]
    fn test_post_process_drops_blank_morphemes() {
        let tokens = vec![" 배 ".to_string(), "".to_string(), "가".to_string(), "  ".to_string()];
        assert_eq!(post_process(tokens), vec!["배", "가"]);
    }

    #[test]
    fn test_whitespace_analyzer() {
        assert_eq!(
            WhitespaceAnalyzer.morphs(" 너무  사랑스러운 영화 "),
            vec!["너무", "사랑스러운", "영화"]
        );
    }
}
