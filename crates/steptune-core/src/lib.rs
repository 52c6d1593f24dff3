//! # steptune-core
//!
//! Tokenization, prompt templating, and device abstraction for StepTune.
//!
//! The tokenizer wrapper owns the special-token bookkeeping for the
//! step-by-step reasoning format: it guarantees the standard pad/eos/bos/unk
//! tokens exist and registers the reasoning control markers, reporting how
//! many vocabulary entries were added so the caller can resize the model's
//! embedding matrix to match.
//!
//! ## Feature Flags
//!
//! | Flag | Effect |
//! |---|---|
//! | `cuda` | Enable CUDA GPU acceleration |
//! | `metal` | Enable Apple Metal GPU acceleration |

pub mod device;
pub mod error;
pub mod template;
pub mod tokenizer;

pub use device::select_device;
pub use error::{CoreError, CoreResult};
pub use template::PromptTemplate;
pub use tokenizer::{Tokenizer, REASONING_CONTROL_TOKENS};
