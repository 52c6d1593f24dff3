//! `steptune train` — fine-tune a pretrained model on an instruction dataset.
//!
//! ## Usage
//!
//! ```text
//! steptune train \
//!   --model  ./models/base-1b \
//!   --data   ./data/train.jsonl \
//!   --output ./output/reasoner-1b \
//!   --epochs 3 --batch-size 4
//! ```
//!
//! The run loads the tokenizer from the model directory, guarantees the
//! standard special tokens and the reasoning control markers exist (resizing
//! the embedding matrix when they are new), fine-tunes with prompt-masked
//! cross-entropy, and writes one checkpoint directory at the end.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use steptune_core::{select_device, PromptTemplate, Tokenizer, REASONING_CONTROL_TOKENS};
use steptune_train::{
    export_checkpoint, Collator, PaddingSide, SupervisedDataset, TrainableModel, Trainer,
    TrainerConfig, TrainerState,
};

use crate::config::AppConfig;

#[allow(clippy::too_many_arguments)]
pub fn run(
    model_dir: &Path,
    data: &Path,
    output: &Path,
    max_examples: Option<usize>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f64>,
    max_seq_len: Option<usize>,
    seed: Option<u64>,
    pad_side: Option<&str>,
    gpu: bool,
    config: &AppConfig,
) -> Result<()> {
    let seed = seed.unwrap_or(config.data.seed);
    let pad_side = PaddingSide::parse(pad_side.unwrap_or(&config.data.pad_side))?;

    let trainer_config = TrainerConfig {
        epochs: epochs.unwrap_or(config.training.epochs),
        batch_size: batch_size.unwrap_or(config.training.batch_size),
        learning_rate: learning_rate.unwrap_or(config.training.learning_rate),
        weight_decay: config.training.weight_decay,
        max_seq_len: max_seq_len.unwrap_or(config.training.max_seq_len),
    };

    let device = select_device(gpu || config.device.prefer_gpu, config.device.cuda_device_id)?;

    // ── Tokenizer + special-token bookkeeping ─────────────────────────────────
    let mut tokenizer = Tokenizer::from_model_dir(model_dir)
        .with_context(|| format!("Failed to load tokenizer from {}", model_dir.display()))?;

    let added = tokenizer.ensure_special_tokens()
        + tokenizer.register_control_tokens(REASONING_CONTROL_TOKENS);
    info!(
        added,
        vocab_size = tokenizer.vocab_size(),
        "Tokenizer ready"
    );

    // ── Dataset ───────────────────────────────────────────────────────────────
    let template = PromptTemplate::default();
    let dataset = SupervisedDataset::load(data, &template, tokenizer.eos_token(), seed, max_examples)
        .with_context(|| format!("Failed to load dataset from {}", data.display()))?;

    // ── Model (embedding resize covers the added tokens) ──────────────────────
    let model = TrainableModel::from_pretrained(model_dir, tokenizer.vocab_size(), &device)
        .with_context(|| format!("Failed to load base model from {}", model_dir.display()))?;

    let pad_id = tokenizer.pad_token_id()?;
    let collator = Collator::new(pad_id, pad_side);

    // ── Train ─────────────────────────────────────────────────────────────────
    info!(
        examples = dataset.len(),
        epochs = trainer_config.epochs,
        batch_size = trainer_config.batch_size,
        lr = trainer_config.learning_rate,
        "Starting fine-tuning"
    );

    let epochs_run = trainer_config.epochs;
    let mut trainer = Trainer::new(model, collator, trainer_config);
    let stats = trainer.train(&dataset, &tokenizer, &device)?;
    let model = trainer.into_model();

    // ── Export ────────────────────────────────────────────────────────────────
    let state = TrainerState::new(&stats, epochs_run, seed);
    export_checkpoint(&model, &tokenizer, output, &state)?;

    println!(
        "\nFine-tuning complete!\n\
         Output: {}\n\
         Final loss: {:.4}\n\
         Elapsed: {:.1} s ({:.0} tok/s)",
        output.display(),
        stats.final_loss,
        stats.elapsed_secs,
        stats.tokens_per_sec,
    );

    Ok(())
}
