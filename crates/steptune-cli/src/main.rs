use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use config::load_config;

/// StepTune — supervised fine-tuning for step-by-step reasoning models
#[derive(Debug, Parser)]
#[command(name = "steptune", version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    /// Path to a custom configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log format: "pretty" (default) or "json".
    #[arg(long, global = true, default_value = "pretty", value_name = "FORMAT")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fine-tune a pretrained model on an instruction dataset.
    Train {
        /// Local directory of the base model (config.json + safetensors + tokenizer.json).
        #[arg(long, short = 'm')]
        model: PathBuf,

        /// Dataset file: a JSON array or JSONL of instruction records.
        #[arg(long, short = 'd')]
        data: PathBuf,

        /// Directory the checkpoint is written to.
        #[arg(long, short = 'o', default_value = "output/steptune")]
        output: PathBuf,

        /// Use at most this many examples (sampled after shuffling).
        #[arg(long)]
        max_examples: Option<usize>,

        /// Number of training epochs (default from config).
        #[arg(long)]
        epochs: Option<usize>,

        /// Examples per optimizer step (default from config).
        #[arg(long)]
        batch_size: Option<usize>,

        /// AdamW learning rate (default from config).
        #[arg(long)]
        learning_rate: Option<f64>,

        /// Maximum token-sequence length for prompt + completion (default from config).
        #[arg(long)]
        max_seq_len: Option<usize>,

        /// Shuffle seed for a reproducible data order (default from config).
        #[arg(long)]
        seed: Option<u64>,

        /// Padding side: "right" or "left" (default from config).
        #[arg(long)]
        pad_side: Option<String>,

        /// Prefer GPU acceleration (CUDA/Metal).
        #[arg(long)]
        gpu: bool,
    },

    /// Render the first examples of a dataset without loading a model.
    Preview {
        /// Dataset file: a JSON array or JSONL of instruction records.
        #[arg(long, short = 'd')]
        data: PathBuf,

        /// How many examples to show.
        #[arg(long, short = 'n', default_value_t = 3)]
        count: usize,

        /// Shuffle seed (default from config).
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_format);

    let cfg = load_config(cli.config.as_ref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Train {
            model,
            data,
            output,
            max_examples,
            epochs,
            batch_size,
            learning_rate,
            max_seq_len,
            seed,
            pad_side,
            gpu,
        } => {
            commands::train::run(
                &model,
                &data,
                &output,
                max_examples,
                epochs,
                batch_size,
                learning_rate,
                max_seq_len,
                seed,
                pad_side.as_deref(),
                gpu,
                &cfg,
            )?;
        }
        Commands::Preview { data, count, seed } => {
            commands::preview::run(&data, count, seed, &cfg)?;
        }
    }

    Ok(())
}

fn init_tracing(log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry
            .with(fmt::layer().json())
            .init();
    } else {
        registry
            .with(fmt::layer().pretty())
            .init();
    }
}
