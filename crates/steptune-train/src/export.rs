//! Checkpoint export.
//!
//! Written once at the end of a run:
//!
//! ```text
//! <output_dir>/
//!   model.safetensors    — all trained weights
//!   config.json          — HuggingFace-compatible architecture config
//!   tokenizer.json       — tokenizer including the registered special tokens
//!   trainer_state.json   — run summary (steps, loss, throughput, data seed)
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use steptune_core::Tokenizer;

use crate::model::TrainableModel;
use crate::trainer::TrainingStats;

/// Run summary saved next to the weights.
#[derive(Debug, Clone, Serialize)]
pub struct TrainerState {
    pub total_steps: usize,
    pub epochs: usize,
    pub final_loss: f32,
    pub elapsed_secs: f64,
    pub tokens_per_sec: f64,
    /// Seed that drove the dataset shuffle, for reproducing the data order.
    pub data_seed: u64,
}

impl TrainerState {
    pub fn new(stats: &TrainingStats, epochs: usize, data_seed: u64) -> Self {
        Self {
            total_steps: stats.total_steps,
            epochs,
            final_loss: stats.final_loss,
            elapsed_secs: stats.elapsed_secs,
            tokens_per_sec: stats.tokens_per_sec,
            data_seed,
        }
    }
}

/// A minimal `config.json` that `transformers`-style loaders can read.
#[derive(Serialize)]
struct HfConfigJson {
    architectures: Vec<String>,
    hidden_size: usize,
    intermediate_size: usize,
    max_position_embeddings: usize,
    model_type: String,
    num_attention_heads: usize,
    num_hidden_layers: usize,
    num_key_value_heads: usize,
    rms_norm_eps: f64,
    rope_theta: f64,
    torch_dtype: String,
    vocab_size: usize,
}

/// Write the trained model, tokenizer and trainer state to `output_dir`.
pub fn export_checkpoint(
    model: &TrainableModel,
    tokenizer: &Tokenizer,
    output_dir: &Path,
    state: &TrainerState,
) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Cannot create output dir: {}", output_dir.display()))?;

    model.save(&output_dir.join("model.safetensors"))?;

    let cfg = model.config();
    let hf = HfConfigJson {
        architectures: vec!["LlamaForCausalLM".to_string()],
        hidden_size: cfg.dim,
        intermediate_size: cfg.hidden_dim,
        max_position_embeddings: cfg.seq_len,
        model_type: "llama".to_string(),
        num_attention_heads: cfg.n_heads,
        num_hidden_layers: cfg.n_layers,
        num_key_value_heads: cfg.n_kv_heads,
        rms_norm_eps: cfg.norm_eps,
        rope_theta: 10_000.0,
        torch_dtype: "float32".to_string(),
        vocab_size: cfg.vocab_size,
    };
    std::fs::write(
        output_dir.join("config.json"),
        serde_json::to_string_pretty(&hf)?,
    )
    .context("Cannot write config.json")?;

    tokenizer.save(output_dir)?;

    std::fs::write(
        output_dir.join("trainer_state.json"),
        serde_json::to_string_pretty(state)?,
    )
    .context("Cannot write trainer_state.json")?;

    info!(output = %output_dir.display(), "Checkpoint exported");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::TrainingStats;
    use candle_core::Device;
    use std::collections::HashMap;
    use tokenizers::models::wordlevel::WordLevel;
    use tokenizers::Tokenizer as HfTokenizer;

    fn tiny_tokenizer() -> Tokenizer {
        let vocab: HashMap<String, u32> =
            [("a", 0u32), ("b", 1), ("<unk>", 2)].map(|(w, i)| (w.to_string(), i)).into();
        let model =
            WordLevel::builder().vocab(vocab.into_iter().collect()).unk_token("<unk>".to_string()).build().unwrap();
        Tokenizer::from_hf(HfTokenizer::new(model))
    }

    #[test]
    fn writes_all_checkpoint_files() {
        let device = Device::Cpu;
        let model =
            TrainableModel::from_config(crate::model::tests::tiny_config(16), &device).unwrap();
        let tokenizer = tiny_tokenizer();
        let stats = TrainingStats {
            total_steps: 7,
            final_loss: 1.25,
            elapsed_secs: 3.0,
            tokens_per_sec: 100.0,
        };
        let state = TrainerState::new(&stats, 2, 42);

        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("checkpoint");
        export_checkpoint(&model, &tokenizer, &out, &state).unwrap();

        for file in ["model.safetensors", "config.json", "tokenizer.json", "trainer_state.json"] {
            assert!(out.join(file).exists(), "missing {file}");
        }

        let cfg: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("config.json")).unwrap())
                .unwrap();
        assert_eq!(cfg["vocab_size"], 16);
        assert_eq!(cfg["model_type"], "llama");

        let st: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("trainer_state.json")).unwrap())
                .unwrap();
        assert_eq!(st["total_steps"], 7);
        assert_eq!(st["data_seed"], 42);
    }
}
