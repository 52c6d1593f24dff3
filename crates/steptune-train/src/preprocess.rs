//! Tokenization with prompt-span loss masking.
//!
//! Each example's `source + target` string is tokenized as one sequence; the
//! leading span that belongs to the source is then blanked out of the label
//! sequence with [`IGNORE_INDEX`] so the loss only covers completion tokens.
//! Labels are `i64` because the ignore marker is negative.

use anyhow::Result;

use steptune_core::Tokenizer;

use crate::dataset::Example;

/// Label value excluded from loss computation.
pub const IGNORE_INDEX: i64 = -100;

/// Text-to-ids capability the preprocessor needs from a tokenizer.
///
/// The pipeline only ever encodes; keeping this seam narrow lets the
/// preprocessing and collation logic be unit-tested without model files.
pub trait Encode {
    /// Encode `text` to token ids, without inserting special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
}

impl Encode for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(Tokenizer::encode(self, text)?)
    }
}

/// One tokenized example, unpadded.
///
/// `input_ids` and `labels` always have equal length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
    pub input_ids: Vec<u32>,
    pub labels: Vec<i64>,
}

impl TokenizedExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Tokenize one example and mask its source span.
///
/// Both the full sequence and the source-only sequence are truncated at
/// `max_len`, so a source longer than the window masks the entire example.
/// An empty source encodes to no ids and nothing is masked.
pub fn preprocess_example<E: Encode + ?Sized>(
    example: &Example,
    encoder: &E,
    max_len: usize,
) -> Result<TokenizedExample> {
    let full_text = format!("{}{}", example.source, example.target);
    let mut input_ids = encoder.encode(&full_text)?;
    input_ids.truncate(max_len);

    let mut source_ids = encoder.encode(&example.source)?;
    source_ids.truncate(max_len);
    let source_len = source_ids.len();

    let mut labels: Vec<i64> = input_ids.iter().map(|&id| i64::from(id)).collect();
    for label in labels.iter_mut().take(source_len) {
        *label = IGNORE_INDEX;
    }

    Ok(TokenizedExample { input_ids, labels })
}

/// Tokenize and mask a slice of examples.
pub fn preprocess<E: Encode + ?Sized>(
    examples: &[Example],
    encoder: &E,
    max_len: usize,
) -> Result<Vec<TokenizedExample>> {
    examples.iter().map(|ex| preprocess_example(ex, encoder, max_len)).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
