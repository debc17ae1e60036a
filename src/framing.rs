//! Turns variable-length token sequences into the fixed-shape inputs the
//! models consume, and maps raw per-position outputs back onto the tokens.

use std::ops::Range;

use ndarray::{s, Array2, ArrayView2};

use crate::error::{EvalError, Result};
use crate::tokenizer::{Vocab, CLS_TOKEN, SEP_TOKEN, UNK_TOKEN};

pub const PAD_ID: u32 = 0;

/// Marker-scheme model input: `[CLS] tokens [SEP]` right-padded to `max_seq_length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedInput {
    pub input_ids: Vec<u32>,
    pub segment_ids: Vec<u32>,
    pub input_mask: Vec<u32>,
    /// Filled positions, markers included.
    pub real_length: usize,
}

impl FramedInput {
    pub fn max_seq_length(&self) -> usize {
        self.input_ids.len()
    }

    /// Positions holding caller tokens, i.e. everything between the two markers.
    pub fn token_span(&self) -> Range<usize> {
        1..self.real_length.saturating_sub(1).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct MarkerFramer {
    max_seq_length: usize,
    cls_id: u32,
    sep_id: u32,
    unk_id: u32,
}

impl MarkerFramer {
    pub fn new(max_seq_length: usize, vocab: &dyn Vocab) -> Result<Self> {
        if max_seq_length < 3 {
            return Err(EvalError::InvalidInput(format!(
                "max_seq_length must be at least 3 for [CLS]/[SEP] framing, got {}",
                max_seq_length
            )));
        }
        let special = |token: &str| {
            vocab.token_to_id(token).ok_or_else(|| {
                EvalError::ModelLoad(format!("vocabulary has no {} token", token))
            })
        };
        Ok(Self {
            max_seq_length,
            cls_id: special(CLS_TOKEN)?,
            sep_id: special(SEP_TOKEN)?,
            unk_id: special(UNK_TOKEN)?,
        })
    }

    pub fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    /// Tokens that fit between the markers; trailing tokens are dropped.
    pub fn truncate<'a>(&self, tokens: &'a [String]) -> &'a [String] {
        truncate(tokens, self.max_seq_length - 2)
    }

    pub fn frame(&self, tokens: &[String], vocab: &dyn Vocab) -> Result<FramedInput> {
        let tokens = self.truncate(tokens);
        if tokens.is_empty() {
            return Err(EvalError::InvalidInput("no tokens to frame".to_string()));
        }

        let mut input_ids = Vec::with_capacity(self.max_seq_length);
        input_ids.push(self.cls_id);
        input_ids.extend(
            tokens
                .iter()
                .map(|token| vocab.token_to_id(token).unwrap_or(self.unk_id)),
        );
        input_ids.push(self.sep_id);

        let real_length = input_ids.len();
        let padding_length = self.max_seq_length - real_length;
        input_ids.resize(self.max_seq_length, PAD_ID);

        let segment_ids = vec![0; self.max_seq_length];
        let mut input_mask = vec![1; real_length];
        input_mask.extend(std::iter::repeat(0).take(padding_length));

        log::debug!(
            "framed {} tokens into {} positions ({} padding)",
            tokens.len(),
            self.max_seq_length,
            padding_length
        );
        Ok(FramedInput {
            input_ids,
            segment_ids,
            input_mask,
            real_length,
        })
    }
}

/// One-shot marker framing.
pub fn frame(tokens: &[String], max_seq_length: usize, vocab: &dyn Vocab) -> Result<FramedInput> {
    MarkerFramer::new(max_seq_length, vocab)?.frame(tokens, vocab)
}

pub fn truncate(tokens: &[String], budget: usize) -> &[String] {
    if tokens.len() > budget {
        log::warn!(
            "truncating token sequence from {} to {} tokens",
            tokens.len(),
            budget
        );
        &tokens[..budget]
    } else {
        tokens
    }
}

// Character ids before the +1 shift that frees 0 for padding.
pub const BOS_CHAR: u32 = 256;
pub const EOS_CHAR: u32 = 257;
pub const BOW_CHAR: u32 = 258;
pub const EOW_CHAR: u32 = 259;
pub const PAD_CHAR: u32 = 260;

/// Character-scheme model input: one fixed-width row of character ids per token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharFramedInput {
    /// `[real_length, max_characters_per_token]`
    pub char_ids: Array2<u32>,
    pub real_length: usize,
}

impl CharFramedInput {
    pub fn token_span(&self) -> Range<usize> {
        0..self.real_length
    }
}

#[derive(Debug, Clone)]
pub struct CharFramer {
    max_seq_length: usize,
    max_characters_per_token: usize,
}

impl CharFramer {
    pub fn new(max_seq_length: usize, max_characters_per_token: usize) -> Result<Self> {
        if max_seq_length == 0 {
            return Err(EvalError::InvalidInput("max_seq_length must be > 0".to_string()));
        }
        if max_characters_per_token < 3 {
            return Err(EvalError::InvalidInput(format!(
                "max_characters_per_token must be at least 3, got {}",
                max_characters_per_token
            )));
        }
        Ok(Self {
            max_seq_length,
            max_characters_per_token,
        })
    }

    pub fn max_characters_per_token(&self) -> usize {
        self.max_characters_per_token
    }

    pub fn truncate<'a>(&self, tokens: &'a [String]) -> &'a [String] {
        truncate(tokens, self.max_seq_length)
    }

    pub fn frame(&self, tokens: &[String]) -> Result<CharFramedInput> {
        let tokens = self.truncate(tokens);
        if tokens.is_empty() {
            return Err(EvalError::InvalidInput("no tokens to frame".to_string()));
        }

        let mut char_ids = Array2::zeros((tokens.len(), self.max_characters_per_token));
        for (row, token) in tokens.iter().enumerate() {
            let encoded = self.encode_word(token);
            for (col, id) in encoded.into_iter().enumerate() {
                char_ids[[row, col]] = id;
            }
        }

        Ok(CharFramedInput {
            char_ids,
            real_length: tokens.len(),
        })
    }

    /// UTF-8 bytes between word markers, filled with the pad character, all shifted by one.
    fn encode_word(&self, word: &str) -> Vec<u32> {
        let mut ids = vec![PAD_CHAR; self.max_characters_per_token];
        ids[0] = BOW_CHAR;
        let bytes: Vec<u32> = word
            .as_bytes()
            .iter()
            .take(self.max_characters_per_token - 2)
            .map(|&b| b as u32)
            .collect();
        ids[1..=bytes.len()].copy_from_slice(&bytes);
        ids[bytes.len() + 1] = EOW_CHAR;
        ids.into_iter().map(|id| id + 1).collect()
    }
}

/// Rows of a raw `[positions, dim]` output that belong to `span`.
pub fn slice_rows(raw: ArrayView2<f32>, span: Range<usize>) -> Array2<f32> {
    raw.slice(s![span, ..]).to_owned()
}

/// Square block of a raw `[positions, positions]` matrix that belongs to `span`.
pub fn slice_square(raw: ArrayView2<f32>, span: Range<usize>) -> Array2<f32> {
    raw.slice(s![span.clone(), span]).to_owned()
}
