use std::path::Path;

use tokenizers::{AddedToken, Tokenizer as HfTokenizer};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};

/// Pad token added when the vocabulary has none.
pub const DEFAULT_PAD_TOKEN: &str = "[PAD]";
/// End-of-sequence token added when the vocabulary has none.
pub const DEFAULT_EOS_TOKEN: &str = "</s>";
/// Beginning-of-sequence token added when the vocabulary has none.
pub const DEFAULT_BOS_TOKEN: &str = "<s>";
/// Unknown token added when the vocabulary has none.
pub const DEFAULT_UNK_TOKEN: &str = "<unk>";

/// Structural markers of the step-by-step reasoning data format.
///
/// These mark code blocks, step and answer boundaries, interpreter output,
/// error feedback and backtracking in the training data. Their semantics
/// belong to the data convention; here they are only vocabulary entries that
/// must encode as single ids.
pub const REASONING_CONTROL_TOKENS: &[&str] = &[
    "<code>",
    "<end_of_step>",
    "<end_of_code>",
    "<output>",
    "<end_of_output>",
    "<answer>",
    "<end_of_answer>",
    "<|user|>",
    "<|assistant|>",
    "<refine>",
    "<end_of_refine>",
    "\n<|assistant|>",
    "<error_info>",
    "<end_of_error_info>",
    "<BACK>",
];

/// Thin wrapper around the Hugging Face `tokenizers` crate.
///
/// Tracks which pad and eos token strings are in effect. A checkpoint whose
/// tokenizer lacks a pad token is not an error: [`Tokenizer::ensure_special_tokens`]
/// adds one and reports the growth so the embedding matrix can be resized.
#[derive(Debug)]
pub struct Tokenizer {
    inner: HfTokenizer,
    pad_token: Option<String>,
    eos_token: String,
}

impl Tokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let inner = HfTokenizer::from_file(path)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;
        Ok(Self::from_hf(inner))
    }

    /// Load the `tokenizer.json` of a Hugging Face model directory.
    pub fn from_model_dir(dir: &Path) -> CoreResult<Self> {
        let path = dir.join("tokenizer.json");
        if !path.exists() {
            return Err(CoreError::Config {
                field: "tokenizer".to_string(),
                reason: format!("no tokenizer.json in {}", dir.display()),
            });
        }
        Self::from_file(&path)
    }

    /// Wrap an already-built tokenizer.
    pub fn from_hf(inner: HfTokenizer) -> Self {
        let pad_token =
            find_token(&inner, &[DEFAULT_PAD_TOKEN, "<pad>", "<|pad|>"]).map(str::to_string);
        let eos_token = find_token(&inner, &[DEFAULT_EOS_TOKEN, "<|endoftext|>", "<eos>", "<|im_end|>"])
            .unwrap_or(DEFAULT_EOS_TOKEN)
            .to_string();

        debug!(
            pad = pad_token.as_deref(),
            eos = %eos_token,
            vocab_size = inner.get_vocab_size(true),
            "Tokenizer loaded"
        );

        Self { inner, pad_token, eos_token }
    }

    /// Make sure pad, eos, bos and unk tokens all exist in the vocabulary.
    ///
    /// Returns the number of vocabulary entries added. A non-zero return means
    /// the model's embedding matrix must be resized before training.
    pub fn ensure_special_tokens(&mut self) -> usize {
        let mut added = 0;

        if self.pad_token.is_none() {
            added += self.add_special(DEFAULT_PAD_TOKEN);
            self.pad_token = Some(DEFAULT_PAD_TOKEN.to_string());
        }
        if self.inner.token_to_id(&self.eos_token).is_none() {
            added += self.add_special(DEFAULT_EOS_TOKEN);
            self.eos_token = DEFAULT_EOS_TOKEN.to_string();
        }
        if find_token(&self.inner, &[DEFAULT_BOS_TOKEN, "<|startoftext|>", "<bos>"]).is_none() {
            added += self.add_special(DEFAULT_BOS_TOKEN);
        }
        if self.inner.token_to_id(DEFAULT_UNK_TOKEN).is_none() {
            added += self.add_special(DEFAULT_UNK_TOKEN);
        }

        if added > 0 {
            info!(added, vocab_size = self.vocab_size(), "Added missing standard special tokens");
        }
        added
    }

    /// Register a list of control-marker strings as special tokens.
    ///
    /// Already-known strings are skipped by the underlying tokenizer. Returns
    /// the number of new vocabulary entries.
    pub fn register_control_tokens(&mut self, tokens: &[&str]) -> usize {
        let special: Vec<AddedToken> = tokens
            .iter()
            .map(|t| AddedToken::from(t.to_string(), true))
            .collect();
        let added = self.inner.add_special_tokens(&special);
        if added > 0 {
            info!(added, vocab_size = self.vocab_size(), "Registered control tokens");
        }
        added
    }

    /// Encode a text string to token ids. No special tokens are inserted; the
    /// prompt scaffold already carries its markers in the text itself.
    pub fn encode(&self, text: &str) -> CoreResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode token ids back to a string.
    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> CoreResult<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))
    }

    /// Vocabulary size including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Look up the id for an exact token string (e.g. `"<end_of_step>"`).
    pub fn token_id(&self, text: &str) -> Option<u32> {
        self.inner.token_to_id(text)
    }

    /// The pad token string, if one exists.
    pub fn pad_token(&self) -> Option<&str> {
        self.pad_token.as_deref()
    }

    /// The pad token id. Errors if no pad token exists yet; call
    /// [`Tokenizer::ensure_special_tokens`] first.
    pub fn pad_token_id(&self) -> CoreResult<u32> {
        self.pad_token
            .as_deref()
            .and_then(|t| self.inner.token_to_id(t))
            .ok_or_else(|| CoreError::Tokenizer("tokenizer has no pad token".to_string()))
    }

    /// The end-of-sequence marker string appended to every target.
    pub fn eos_token(&self) -> &str {
        &self.eos_token
    }

    /// The end-of-sequence token id, if the marker is in the vocabulary.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.inner.token_to_id(&self.eos_token)
    }

    /// Write `tokenizer.json` into `dir`.
    pub fn save(&self, dir: &Path) -> CoreResult<()> {
        let path = dir.join("tokenizer.json");
        self.inner
            .save(&path, true)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))
    }

    fn add_special(&mut self, token: &str) -> usize {
        self.inner.add_special_tokens(&[AddedToken::from(token.to_string(), true)])
    }
}

fn find_token<'a>(tokenizer: &HfTokenizer, candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().find(|c| tokenizer.token_to_id(c).is_some()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokenizers::models::wordlevel::WordLevel;
    use tokenizers::pre_tokenizers::whitespace::Whitespace;

    /// A tiny word-level tokenizer with no pad token, mirroring checkpoints
    /// whose tokenizer_config carries eos/bos/unk but no pad entry.
    fn tiny_tokenizer() -> Tokenizer {
        let words = ["hello", "world", "Add", "1", "and", "2.", "3", "</s>", "<unk>"];
        let vocab: HashMap<String, u32> =
            words.iter().enumerate().map(|(i, w)| (w.to_string(), i as u32)).collect();
        let model = WordLevel::builder()
            .vocab(vocab.into_iter().collect())
            .unk_token("<unk>".to_string())
            .build()
            .unwrap();
        let mut inner = HfTokenizer::new(model);
        inner.with_pre_tokenizer(Some(Whitespace));
        Tokenizer::from_hf(inner)
    }

    #[test]
    fn missing_pad_token_is_added_not_fatal() {
        let mut tok = tiny_tokenizer();
        assert!(tok.pad_token().is_none());
        let before = tok.vocab_size();
        let added = tok.ensure_special_tokens();
        assert!(added >= 1, "at least the pad token must be added");
        assert_eq!(tok.vocab_size(), before + added);
        assert_eq!(tok.pad_token(), Some(DEFAULT_PAD_TOKEN));
        assert!(tok.pad_token_id().is_ok());
    }

    #[test]
    fn ensure_is_idempotent() {
        let mut tok = tiny_tokenizer();
        tok.ensure_special_tokens();
        assert_eq!(tok.ensure_special_tokens(), 0);
    }

    #[test]
    fn eos_token_resolved_from_vocab() {
        let tok = tiny_tokenizer();
        assert_eq!(tok.eos_token(), "</s>");
        assert!(tok.eos_token_id().is_some());
    }

    #[test]
    fn control_tokens_register_once() {
        let mut tok = tiny_tokenizer();
        let added = tok.register_control_tokens(REASONING_CONTROL_TOKENS);
        assert_eq!(added, REASONING_CONTROL_TOKENS.len());
        // Second registration is a no-op.
        assert_eq!(tok.register_control_tokens(REASONING_CONTROL_TOKENS), 0);
        assert!(tok.token_id("<end_of_step>").is_some());
        assert!(tok.token_id("<BACK>").is_some());
    }

    #[test]
    fn control_tokens_encode_as_single_ids() {
        let mut tok = tiny_tokenizer();
        tok.register_control_tokens(REASONING_CONTROL_TOKENS);
        let ids = tok.encode("<answer>").unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0], tok.token_id("<answer>").unwrap());
    }

    #[test]
    fn encode_known_words() {
        let tok = tiny_tokenizer();
        let ids = tok.encode("hello world").unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn empty_string_encodes_to_no_ids() {
        let tok = tiny_tokenizer();
        assert!(tok.encode("").unwrap().is_empty());
    }

    #[test]
    fn save_writes_tokenizer_json() {
        let tok = tiny_tokenizer();
        let dir = tempfile::TempDir::new().unwrap();
        tok.save(dir.path()).unwrap();
        assert!(dir.path().join("tokenizer.json").exists());
    }
}
