//! # steptune-train
//!
//! The StepTune data pipeline and training loop:
//!
//! 1. [`dataset`] loads a JSON or JSONL instruction file into shuffled,
//!    capped, prompt-rendered examples.
//! 2. [`preprocess`] tokenizes `source + target` and masks the source span
//!    of the labels with [`IGNORE_INDEX`].
//! 3. [`collator`] pads each batch to a rectangle and derives the attention
//!    mask.
//! 4. [`trainer`] runs epochs of AdamW steps with shifted, masked
//!    cross-entropy over a [`CausalLm`].
//! 5. [`export`] writes the checkpoint directory once at the end.

pub mod collator;
pub mod dataset;
pub mod export;
pub mod model;
pub mod preprocess;
pub mod trainer;

pub use collator::{Batch, Collator, PaddingSide};
pub use dataset::{DatasetFormat, Example, Record, SupervisedDataset};
pub use export::{export_checkpoint, TrainerState};
pub use model::{CausalLm, TrainableModel};
pub use preprocess::{preprocess, Encode, TokenizedExample, IGNORE_INDEX};
pub use trainer::{Trainer, TrainerConfig, TrainingStats};
