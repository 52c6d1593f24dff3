use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Full runtime configuration loaded from TOML + env vars.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub training: TrainingConfig,
    pub data: DataConfig,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub max_seq_len: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    pub seed: u64,
    pub pad_side: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub prefer_gpu: bool,
    pub cuda_device_id: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            training: TrainingConfig {
                epochs: 3,
                batch_size: 4,
                learning_rate: 2e-5,
                weight_decay: 0.0,
                max_seq_len: 2048,
            },
            data: DataConfig {
                seed: 42,
                pad_side: "right".to_string(),
            },
            device: DeviceConfig {
                prefer_gpu: true,
                cuda_device_id: 0,
            },
        }
    }
}

/// Load configuration from:
/// 1. Built-in defaults
/// 2. `config/default.toml` (if present)
/// 3. A custom config file path (if provided)
/// 4. Environment variables prefixed with `STEPTUNE_`
pub fn load_config(config_file: Option<&PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder()
        // Layer 1: defaults baked in
        .set_default("training.epochs", 3_i64)?
        .set_default("training.batch_size", 4_i64)?
        .set_default("training.learning_rate", 2e-5)?
        .set_default("training.weight_decay", 0.0)?
        .set_default("training.max_seq_len", 2048_i64)?
        .set_default("data.seed", 42_i64)?
        .set_default("data.pad_side", "right")?
        .set_default("device.prefer_gpu", true)?
        .set_default("device.cuda_device_id", 0_i64)?
        // Layer 2: project default.toml
        .add_source(File::with_name("config/default").required(false));

    // Layer 3: optional user-supplied config file
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    // Layer 4: environment variables (STEPTUNE_TRAINING_EPOCHS, etc.)
    builder = builder.add_source(
        Environment::with_prefix("STEPTUNE")
            .separator("_")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
