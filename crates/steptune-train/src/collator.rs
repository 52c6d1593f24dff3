//! Batch collation: dynamic padding and attention-mask derivation.
//!
//! Tokenized examples inside one batch have differing lengths; the collator
//! pads `input_ids` with the tokenizer's pad id and `labels` with
//! [`IGNORE_INDEX`] to the batch maximum, then derives the attention mask by
//! comparing ids against the pad id. Batches are rectangular but their width
//! varies batch to batch.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};

use crate::dataset::Example;
use crate::preprocess::{preprocess, Encode, TokenizedExample, IGNORE_INDEX};

/// Which end of the sequence receives padding.
///
/// Right is the common convention; Mistral-style tokenizers pad on the left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingSide {
    #[default]
    Right,
    Left,
}

impl PaddingSide {
    /// Parse a user-supplied string (`"right"` / `"left"`).
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "right" => Ok(Self::Right),
            "left" => Ok(Self::Left),
            other => anyhow::bail!("Unknown padding side '{other}'. Valid values: right, left."),
        }
    }
}

/// A rectangular batch ready for tensor conversion.
///
/// All rows have length `seq_len()`; `attention_mask[i][j]` is 1 exactly
/// where `input_ids[i][j]` is not the pad id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub input_ids: Vec<Vec<u32>>,
    pub labels: Vec<Vec<i64>>,
    pub attention_mask: Vec<Vec<u8>>,
}

impl Batch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.len()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.first().map_or(0, Vec::len)
    }

    /// Number of non-pad token positions across the batch.
    pub fn token_count(&self) -> usize {
        self.attention_mask.iter().flatten().filter(|&&m| m == 1).count()
    }

    /// Stack the batch into `[batch, seq_len]` tensors:
    /// `(input_ids: U32, labels: I64, attention_mask: U8)`.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
        let (b, t) = (self.batch_size(), self.seq_len());

        let ids: Vec<u32> = self.input_ids.iter().flatten().copied().collect();
        let labels: Vec<i64> = self.labels.iter().flatten().copied().collect();
        let mask: Vec<u8> = self.attention_mask.iter().flatten().copied().collect();

        let input_ids = Tensor::from_vec(ids, (b, t), device)
            .context("input_ids tensor construction failed")?;
        let labels = Tensor::from_vec(labels, (b, t), device)
            .context("labels tensor construction failed")?;
        let attention_mask = Tensor::from_vec(mask, (b, t), device)
            .context("attention_mask tensor construction failed")?;

        Ok((input_ids, labels, attention_mask))
    }
}

/// Pads tokenized examples into rectangular batches.
#[derive(Debug, Clone)]
pub struct Collator {
    pad_id: u32,
    side: PaddingSide,
}

impl Collator {
    pub fn new(pad_id: u32, side: PaddingSide) -> Self {
        Self { pad_id, side }
    }

    /// Tokenize, mask and pad one batch of examples.
    ///
    /// Tokenization happens here, per training step, so examples and batches
    /// are transient: nothing tokenized outlives the optimizer step.
    pub fn collate<E: Encode + ?Sized>(
        &self,
        batch: &[Example],
        encoder: &E,
        max_len: usize,
    ) -> Result<Batch> {
        let tokenized = preprocess(batch, encoder, max_len)?;
        Ok(self.pad(tokenized))
    }

    /// Pad already-tokenized examples to the batch maximum length.
    ///
    /// Padding a batch whose rows already share one length changes nothing.
    pub fn pad(&self, examples: Vec<TokenizedExample>) -> Batch {
        let max_len = examples.iter().map(TokenizedExample::len).max().unwrap_or(0);

        let mut input_ids = Vec::with_capacity(examples.len());
        let mut labels = Vec::with_capacity(examples.len());

        for ex in examples {
            let pad = max_len - ex.len();
            let (ids, labs) = match self.side {
                PaddingSide::Right => {
                    let mut ids = ex.input_ids;
                    let mut labs = ex.labels;
                    ids.extend(std::iter::repeat(self.pad_id).take(pad));
                    labs.extend(std::iter::repeat(IGNORE_INDEX).take(pad));
                    (ids, labs)
                }
                PaddingSide::Left => {
                    let mut ids = vec![self.pad_id; pad];
                    let mut labs = vec![IGNORE_INDEX; pad];
                    ids.extend(ex.input_ids);
                    labs.extend(ex.labels);
                    (ids, labs)
                }
            };
            input_ids.push(ids);
            labels.push(labs);
        }

        let attention_mask = input_ids
            .iter()
            .map(|row| row.iter().map(|&id| u8::from(id != self.pad_id)).collect())
            .collect();

        Batch { input_ids, labels, attention_mask }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PAD: u32 = 0;

    fn tok(ids: &[u32]) -> TokenizedExample {
        TokenizedExample {
            input_ids: ids.to_vec(),
            labels: ids.iter().map(|&i| i64::from(i)).collect(),
        }
    }

    #[test]
    fn pads_to_batch_max_and_derives_mask() {
        let collator = Collator::new(PAD, PaddingSide::Right);
        let batch = collator.pad(vec![tok(&[1, 2, 3, 4, 5]), tok(&[1, 2, 3, 4, 5, 6, 7, 8])]);

        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.seq_len(), 8);
        let ones: usize = batch.attention_mask[0].iter().map(|&m| m as usize).sum();
        assert_eq!(ones, 5);
        assert_eq!(batch.input_ids[0][5..], [PAD, PAD, PAD]);
        assert_eq!(batch.labels[0][5..], [IGNORE_INDEX, IGNORE_INDEX, IGNORE_INDEX]);
    }

    #[test]
    fn equal_length_batch_is_untouched() {
        let collator = Collator::new(PAD, PaddingSide::Right);
        let examples = vec![tok(&[1, 2, 3]), tok(&[4, 5, 6])];
        let batch = collator.pad(examples.clone());
        assert_eq!(batch.input_ids, vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(batch.labels[0], examples[0].labels);
        assert!(batch.attention_mask.iter().flatten().all(|&m| m == 1));
    }

    #[test]
    fn left_padding_prepends() {
        let collator = Collator::new(PAD, PaddingSide::Left);
        let batch = collator.pad(vec![tok(&[7]), tok(&[8, 9, 10])]);
        assert_eq!(batch.input_ids[0], vec![PAD, PAD, 7]);
        assert_eq!(batch.labels[0], vec![IGNORE_INDEX, IGNORE_INDEX, 7]);
        assert_eq!(batch.attention_mask[0], vec![0, 0, 1]);
    }

    #[test]
    fn labels_padded_with_ignore_index_not_pad_id() {
        let collator = Collator::new(PAD, PaddingSide::Right);
        let batch = collator.pad(vec![tok(&[1]), tok(&[2, 3])]);
        assert_eq!(batch.labels[0][1], IGNORE_INDEX);
        assert_ne!(batch.labels[0][1], i64::from(PAD));
    }

    #[test]
    fn to_tensors_shapes() {
        let collator = Collator::new(PAD, PaddingSide::Right);
        let batch = collator.pad(vec![tok(&[1, 2]), tok(&[3, 4, 5])]);
        let device = Device::Cpu;
        let (ids, labels, mask) = batch.to_tensors(&device).unwrap();
        assert_eq!(ids.dims(), &[2, 3]);
        assert_eq!(labels.dims(), &[2, 3]);
        assert_eq!(mask.dims(), &[2, 3]);
        assert_eq!(ids.dtype(), candle_core::DType::U32);
        assert_eq!(labels.dtype(), candle_core::DType::I64);
        assert_eq!(mask.dtype(), candle_core::DType::U8);
    }

    #[test]
    fn token_count_ignores_padding() {
        let collator = Collator::new(PAD, PaddingSide::Right);
        let batch = collator.pad(vec![tok(&[1, 2]), tok(&[3, 4, 5, 6])]);
        assert_eq!(batch.token_count(), 6);
    }

    #[test]
    fn parse_padding_side() {
        assert_eq!(PaddingSide::parse("right").unwrap(), PaddingSide::Right);
        assert_eq!(PaddingSide::parse("Left").unwrap(), PaddingSide::Left);
        assert!(PaddingSide::parse("middle").is_err());
    }

    #[test]
    fn empty_batch_collates_to_empty() {
        let collator = Collator::new(PAD, PaddingSide::Right);
        let batch = collator.pad(vec![]);
        assert_eq!(batch.batch_size(), 0);
        assert_eq!(batch.seq_len(), 0);
    }
}
