//! Prompt rendering for instruction fine-tuning examples.
//!
//! Every instruction is wrapped in a single fixed role-tagged scaffold that
//! asks the model to reason step by step and solve the problem with code.
//! Records with an empty instruction produce an empty source string, so the
//! whole sequence is treated as completion text by the preprocessor.

/// The instruction scaffold used for every non-empty instruction.
///
/// `{instruction}` is the only substitution point. The `<|user|>` and
/// `<|assistant|>` markers are registered as special tokens by the tokenizer
/// wrapper so they encode as single ids.
pub const INSTRUCTION_TEMPLATE: &str = "<|user|>:\n{instruction}\n<|assistant|>: Let's think step by step and solve the problem with code.";

/// Renders instructions into model-input prompt strings.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { template: INSTRUCTION_TEMPLATE.to_string() }
    }
}

impl PromptTemplate {
    /// Use a custom scaffold. The string must contain `{instruction}`.
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into() }
    }

    /// Render an instruction into the prompt source string.
    ///
    /// An empty instruction renders to the empty string: the example then has
    /// no prompt span and the loss covers the whole sequence.
    pub fn render(&self, instruction: &str) -> String {
        if instruction.is_empty() {
            String::new()
        } else {
            self.template.replace("{instruction}", instruction)
        }
    }
}
