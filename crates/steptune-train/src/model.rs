//! Trainable model wrapper.
//!
//! The model is a Llama-family transformer held in a [`candle_nn::VarMap`] so
//! its parameters can receive gradients. Training needs logits for every
//! position, so the `llama2_c` model from `candle_transformers` is used: the
//! inference-oriented `models::llama` slices hidden states to the last
//! position before the LM head and exposes no per-position logits.
//!
//! Loading a pretrained checkpoint also performs the vocabulary-resize
//! bookkeeping: when the tokenizer grew (pad token, control markers), the
//! embedding matrix and LM head gain rows initialized to the mean of the
//! existing embeddings before the weights are copied into the `VarMap`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::llama2_c::{Cache, Config as LlamaConfig, Llama};
use tracing::{info, warn};

/// Rows of these tensors scale with the vocabulary.
const VOCAB_SIZED_TENSORS: &[&str] = &["model.embed_tokens.weight", "lm_head.weight"];

/// The train-step capability the trainer is generic over.
///
/// Implementations return `[batch, seq, vocab]` F32 logits so the loss can be
/// computed against shifted labels.
pub trait CausalLm {
    fn forward_train(&mut self, input_ids: &Tensor) -> Result<Tensor>;

    /// All parameters the optimizer should update.
    fn trainable_vars(&self) -> Vec<Var>;
}

/// A Llama-family model whose parameters live in a [`VarMap`].
pub struct TrainableModel {
    model: Llama,
    varmap: VarMap,
    /// Non-caching cache (use_kv_cache=false), reused across training steps.
    cache: Cache,
    config: LlamaConfig,
    device: Device,
}

impl TrainableModel {
    /// Load a pretrained checkpoint directory for fine-tuning.
    ///
    /// The directory must contain a HuggingFace-format `config.json` plus a
    /// single `model.safetensors` or sharded files referenced by
    /// `model.safetensors.index.json`. `target_vocab` is the tokenizer's
    /// vocabulary size after special-token registration; when it exceeds the
    /// checkpoint's, the vocabulary-sized tensors are grown to match.
    pub fn from_pretrained(model_dir: &Path, target_vocab: usize, device: &Device) -> Result<Self> {
        let hf = read_hf_config(model_dir)?;
        let config = hf.into_model_config(target_vocab.max(hf.vocab_size));

        info!(
            model_dir = %model_dir.display(),
            n_layers = config.n_layers,
            dim = config.dim,
            vocab_size = config.vocab_size,
            "Loading base model"
        );

        let shard_paths = collect_safetensor_paths(model_dir)?;
        let mut tensors: HashMap<String, Tensor> = HashMap::new();
        for path in &shard_paths {
            let shard = candle_core::safetensors::load(path, device)
                .with_context(|| format!("Failed to read weights from {}", path.display()))?;
            tensors.extend(shard);
        }

        let grown = resize_vocab_tensors(&mut tensors, config.vocab_size)?;
        if grown > 0 {
            info!(
                new_rows = grown,
                vocab_size = config.vocab_size,
                "Grew embedding and LM-head rows for added special tokens"
            );
        }

        Self::build(config, device, Some(tensors))
    }

    /// Build a randomly-initialized model. Used by smoke runs and tests; no
    /// checkpoint involved.
    pub fn from_config(config: LlamaConfig, device: &Device) -> Result<Self> {
        Self::build(config, device, None)
    }

    /// Shared construction path.
    ///
    /// 1. Register all parameters in a fresh `VarMap` (random init).
    /// 2. When checkpoint tensors are given, copy them over the random values.
    ///
    /// Weights are F32 on CPU and BF16 on CUDA; the loss side casts logits
    /// back to F32 before the softmax.
    fn build(
        config: LlamaConfig,
        device: &Device,
        weights: Option<HashMap<String, Tensor>>,
    ) -> Result<Self> {
        let dtype = match device {
            Device::Cuda(_) => DType::BF16,
            _ => DType::F32,
        };

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);

        let cache = Cache::new(false, &config, vb.pp("rope"))
            .context("Failed to create training cache")?;
        let model = Llama::load(vb, config.clone())
            .context("Failed to construct model")?;

        if let Some(tensors) = weights {
            let data = varmap.data().lock().unwrap();
            for (name, var) in data.iter() {
                match tensors.get(name) {
                    Some(t) => {
                        let t = t.to_dtype(dtype)?;
                        var.set(&t).with_context(|| {
                            format!("Shape mismatch copying checkpoint tensor '{name}'")
                        })?;
                    }
                    None => {
                        warn!(name = %name, "Checkpoint has no tensor for this parameter, keeping random init");
                    }
                }
            }
        }

        Ok(Self { model, varmap, cache, config, device: device.clone() })
    }

    /// The model's vocabulary size (after any resize).
    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    /// The model architecture config (needed by the checkpoint exporter).
    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    /// The device the parameters live on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Save all parameters to a SafeTensors file at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap
            .save(path)
            .with_context(|| format!("Failed to save weights to {}", path.display()))
    }
}

impl CausalLm for TrainableModel {
    fn forward_train(&mut self, input_ids: &Tensor) -> Result<Tensor> {
        let logits = self
            .model
            .forward(input_ids, 0, &mut self.cache)
            .context("Forward pass failed")?;
        to_f32(&logits)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Cast `t` to F32; no-op if already F32.
///
/// Softmax over a large vocabulary is numerically unstable in BF16, so the
/// loss is always computed in F32 regardless of the weight dtype.
fn to_f32(t: &Tensor) -> Result<Tensor> {
    if t.dtype() == DType::F32 {
        Ok(t.clone())
    } else {
        t.to_dtype(DType::F32).context("dtype cast to F32 failed")
    }
}

/// Grow the vocabulary-sized tensors to `target_vocab` rows.
///
/// New rows are the mean of the existing rows, so added special tokens start
/// from the average embedding rather than noise. Returns the number of rows
/// added (identical for every resized tensor).
fn resize_vocab_tensors(
    tensors: &mut HashMap<String, Tensor>,
    target_vocab: usize,
) -> Result<usize> {
    let mut grown = 0;
    for name in VOCAB_SIZED_TENSORS {
        let Some(weight) = tensors.get(*name) else { continue };
        let (rows, dim) = weight
            .dims2()
            .with_context(|| format!("'{name}' is not a 2-D tensor"))?;
        if rows >= target_vocab {
            continue;
        }
        let new_rows = target_vocab - rows;
        let mean = weight.mean_keepdim(0)?;
        let filler = mean.broadcast_as((new_rows, dim))?.contiguous()?;
        let resized = Tensor::cat(&[weight.clone(), filler], 0)?;
        tensors.insert(name.to_string(), resized);
        grown = new_rows;
    }
    Ok(grown)
}

fn read_hf_config(model_dir: &Path) -> Result<HfConfig> {
    let path = model_dir.join("config.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Cannot parse {}", path.display()))
}

fn collect_safetensor_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let index_path = dir.join("model.safetensors.index.json");
    if index_path.exists() {
        let json = std::fs::read_to_string(&index_path)
            .with_context(|| format!("Cannot read {}", index_path.display()))?;
        let index: serde_json::Value = serde_json::from_str(&json)?;
        let mut shards: Vec<String> = index["weight_map"]
            .as_object()
            .map(|m| {
                m.values()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect::<std::collections::HashSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default();
        shards.sort();
        return Ok(shards.iter().map(|s| dir.join(s)).collect());
    }

    let single = dir.join("model.safetensors");
    if single.exists() {
        return Ok(vec![single]);
    }

    anyhow::bail!("No safetensors weights found in {}", dir.display());
}

// ── HF config deserialization ─────────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct HfConfig {
    hidden_size: usize,
    intermediate_size: usize,
    max_position_embeddings: usize,
    num_attention_heads: usize,
    num_hidden_layers: usize,
    num_key_value_heads: Option<usize>,
    rms_norm_eps: Option<f64>,
    vocab_size: usize,
}

impl HfConfig {
    fn into_model_config(&self, vocab_size: usize) -> LlamaConfig {
        LlamaConfig {
            dim: self.hidden_size,
            hidden_dim: self.intermediate_size,
            n_layers: self.num_hidden_layers,
            n_heads: self.num_attention_heads,
            n_kv_heads: self.num_key_value_heads.unwrap_or(self.num_attention_heads),
            vocab_size,
            seq_len: self.max_position_embeddings,
            norm_eps: self.rms_norm_eps.unwrap_or(1e-5),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn tiny_config(vocab_size: usize) -> LlamaConfig {
        LlamaConfig {
            dim: 16,
            hidden_dim: 48,
            n_layers: 1,
            n_heads: 2,
            n_kv_heads: 2,
            vocab_size,
            seq_len: 32,
            norm_eps: 1e-5,
        }
    }

    #[test]
    fn resize_grows_rows_to_mean() {
        let device = Device::Cpu;
        let weight = Tensor::new(&[[1.0f32, 3.0], [3.0, 5.0]], &device).unwrap();
        let mut tensors = HashMap::from([("model.embed_tokens.weight".to_string(), weight)]);

        let grown = resize_vocab_tensors(&mut tensors, 4).unwrap();
        assert_eq!(grown, 2);

        let resized = &tensors["model.embed_tokens.weight"];
        assert_eq!(resized.dims(), &[4, 2]);
        let rows: Vec<Vec<f32>> = resized.to_vec2().unwrap();
        assert_eq!(rows[2], vec![2.0, 4.0]);
        assert_eq!(rows[3], vec![2.0, 4.0]);
    }

    #[test]
    fn resize_is_noop_when_large_enough() {
        let device = Device::Cpu;
        let weight = Tensor::zeros((4, 2), DType::F32, &device).unwrap();
        let mut tensors = HashMap::from([("lm_head.weight".to_string(), weight)]);
        assert_eq!(resize_vocab_tensors(&mut tensors, 4).unwrap(), 0);
        assert_eq!(tensors["lm_head.weight"].dims(), &[4, 2]);
    }

    #[test]
    fn fresh_model_emits_per_position_logits() {
        let device = Device::Cpu;
        let mut model = TrainableModel::from_config(tiny_config(32), &device).unwrap();
        let input = Tensor::new(&[[1u32, 2, 3, 4]], &device).unwrap();
        let logits = model.forward_train(&input).unwrap();
        assert_eq!(logits.dims3().unwrap(), (1, 4, 32));
        assert_eq!(logits.dtype(), DType::F32);
    }

    #[test]
    fn collect_paths_prefers_index() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("model.safetensors.index.json"),
            r#"{"weight_map": {"a": "model-00001.safetensors", "b": "model-00002.safetensors", "c": "model-00001.safetensors"}}"#,
        )
        .unwrap();
        let paths = collect_safetensor_paths(dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("model-00001.safetensors"));
    }

    #[test]
    fn collect_paths_falls_back_to_single_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"").unwrap();
        let paths = collect_safetensor_paths(dir.path()).unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn missing_weights_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(collect_safetensor_paths(dir.path()).is_err());
    }
}
