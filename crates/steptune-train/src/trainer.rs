//! The training loop: epochs of AdamW steps over collated batches.
//!
//! Loss is shifted, masked cross-entropy: position `i` of the logits predicts
//! label `i + 1`, and positions whose label is [`IGNORE_INDEX`] (the prompt
//! span and padding) are excluded from the average. This mirrors the label
//! contract the collator produces: labels equal input ids except where
//! ignored, and the shift happens here, not in the data.

use std::time::Instant;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::ops;
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::collator::Collator;
use crate::dataset::SupervisedDataset;
use crate::model::CausalLm;
use crate::preprocess::Encode;

// ── Config ────────────────────────────────────────────────────────────────────

/// Hyper-parameters for one fine-tuning run.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Number of full passes over the dataset.
    pub epochs: usize,
    /// Examples per optimizer step.
    pub batch_size: usize,
    /// AdamW learning rate.
    pub learning_rate: f64,
    /// AdamW weight decay.
    pub weight_decay: f64,
    /// Maximum token-sequence length (prompt + completion).
    pub max_seq_len: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 4,
            learning_rate: 2e-5,
            weight_decay: 0.0,
            max_seq_len: 2048,
        }
    }
}

/// Summary returned after training completes.
#[derive(Debug, Clone)]
pub struct TrainingStats {
    pub total_steps: usize,
    pub final_loss: f32,
    pub elapsed_secs: f64,
    pub tokens_per_sec: f64,
}

// ── Trainer ───────────────────────────────────────────────────────────────────

/// Drives gradient updates over a [`CausalLm`].
pub struct Trainer<M: CausalLm> {
    model: M,
    collator: Collator,
    config: TrainerConfig,
}

impl<M: CausalLm> Trainer<M> {
    pub fn new(model: M, collator: Collator, config: TrainerConfig) -> Self {
        Self { model, collator, config }
    }

    /// Consume the trainer and return the trained model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Run `epochs` passes of AdamW steps over the dataset.
    ///
    /// Batches whose labels are entirely ignored (for example a prompt that
    /// fills the whole window) are skipped: their loss is undefined. A
    /// non-finite loss aborts the run.
    pub fn train<E: Encode + ?Sized>(
        &mut self,
        dataset: &SupervisedDataset,
        encoder: &E,
        device: &Device,
    ) -> Result<TrainingStats> {
        anyhow::ensure!(!dataset.is_empty(), "Cannot train on an empty dataset");

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(self.model.trainable_vars(), params)
            .context("Failed to create AdamW optimizer")?;

        let batches_per_epoch = dataset.len().div_ceil(self.config.batch_size);
        let total_steps = batches_per_epoch * self.config.epochs;
        let pb = progress_bar(total_steps as u64);

        let mut step = 0usize;
        let mut last_loss = 0.0f32;
        let mut total_tokens = 0usize;
        let start = Instant::now();

        for epoch in 0..self.config.epochs {
            for examples in dataset.iter_batches(self.config.batch_size) {
                let batch = self
                    .collator
                    .collate(examples, encoder, self.config.max_seq_len)
                    .context("Collation error")?;

                if batch.labels.iter().flatten().all(|&l| l < 0) {
                    warn!(step, "Batch has no unmasked label positions, skipping");
                    pb.inc(1);
                    continue;
                }

                let (input_ids, labels, _attention_mask) = batch.to_tensors(device)?;
                let logits = self.model.forward_train(&input_ids)?;

                let loss = masked_cross_entropy(&logits, &labels)
                    .context("Loss computation failed")?;
                last_loss = loss.to_scalar::<f32>().context("Loss readback failed")?;
                anyhow::ensure!(
                    last_loss.is_finite(),
                    "Non-finite loss at step {step}, aborting"
                );

                optimizer
                    .backward_step(&loss)
                    .context("Backward/optimizer step failed")?;

                total_tokens += batch.token_count();
                step += 1;
                pb.set_message(format!(
                    "epoch {}/{} loss {:.4}",
                    epoch + 1,
                    self.config.epochs,
                    last_loss
                ));
                pb.inc(1);
            }

            info!(epoch = epoch + 1, loss = last_loss, "Epoch complete");
        }

        pb.finish_with_message(format!("Training complete, final loss {last_loss:.4}"));

        let elapsed = start.elapsed().as_secs_f64();
        let tps = if elapsed > 0.0 { total_tokens as f64 / elapsed } else { 0.0 };

        Ok(TrainingStats {
            total_steps: step,
            final_loss: last_loss,
            elapsed_secs: elapsed,
            tokens_per_sec: tps,
        })
    }
}

// ── Loss ──────────────────────────────────────────────────────────────────────

/// Shifted cross-entropy over positions whose label is not ignored.
///
/// `logits` is `[batch, seq, vocab]` F32, `labels` is `[batch, seq]` I64 with
/// negative values marking excluded positions. Position `i` is scored against
/// label `i + 1`; the last position has no target and is dropped.
pub fn masked_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (b, t, v) = logits.dims3().context("Expected [batch, seq, vocab] logits")?;
    anyhow::ensure!(t >= 2, "Sequence length {t} too short for next-token loss");

    let shift_logits = logits.narrow(1, 0, t - 1)?.reshape((b * (t - 1), v))?;
    let shift_labels = labels.narrow(1, 1, t - 1)?.reshape((b * (t - 1),))?;

    let log_probs = ops::log_softmax(&shift_logits, D::Minus1)?;

    // Keep positions with a real label; clamp the rest to a valid index so
    // gather stays in bounds, then zero their contribution.
    let zeros = Tensor::zeros(shift_labels.shape(), DType::I64, shift_labels.device())?;
    let keep = shift_labels.ge(&zeros)?.to_dtype(DType::F32)?;
    let safe_labels = shift_labels.clamp(0i64, (v - 1) as i64)?.to_dtype(DType::U32)?;

    let picked = log_probs.gather(&safe_labels.unsqueeze(1)?, 1)?.squeeze(1)?;
    let kept = (picked * &keep)?;

    let kept_count = keep.sum_all()?.to_scalar::<f32>()?;
    anyhow::ensure!(kept_count > 0.0, "All label positions are ignored");

    let loss = (kept.sum_all()?.neg()? / f64::from(kept_count))?;
    Ok(loss)
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap()
        .progress_chars("█▓░"),
    );
    pb.set_message("starting...");
    pb
}

// ── Tests ─────────────────────────────────────────────────────────────────────
