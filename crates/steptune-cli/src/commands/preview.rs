//! `steptune preview` — render the first dataset examples to stdout.
//!
//! Loads and shuffles the dataset exactly as `train` would (same seed, same
//! template) so what is printed is what the model would see, minus
//! tokenization.

use std::path::Path;

use anyhow::{Context, Result};

use steptune_core::PromptTemplate;
use steptune_train::SupervisedDataset;

use crate::config::AppConfig;

/// Placeholder shown instead of a real eos id; preview has no tokenizer.
const EOS_MARKER: &str = "</s>";

pub fn run(data: &Path, count: usize, seed: Option<u64>, config: &AppConfig) -> Result<()> {
    let seed = seed.unwrap_or(config.data.seed);
    let template = PromptTemplate::default();

    let dataset = SupervisedDataset::load(data, &template, EOS_MARKER, seed, Some(count))
        .with_context(|| format!("Failed to load dataset from {}", data.display()))?;

    for (i, example) in dataset.examples().iter().enumerate() {
        println!("── example {} ──────────────────────────────────────────", i + 1);
        if example.source.is_empty() {
            println!("[empty source: whole sequence is completion]");
        } else {
            println!("{}", example.source);
        }
        println!("--- target ---");
        println!("{}\n", example.target);
    }

    Ok(())
}
