//! Deterministic subword counting for the segmentation engine.
//!
//! The segmenter only needs a stable counter: the same text must yield the
//! same token count on every run. [`TiktokenTokenizer`] with `cl100k_base`
//! is the default implementation.

use crate::error::{Error, Result};

/// Tokenization operations used by token-budgeted segmentation.
///
/// Implementations must be thread-safe; one tokenizer is shared by every
/// segmenter in the process.
pub trait Tokenizer: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;

    /// Encode text into token IDs.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode token IDs back into text.
    ///
    /// Fails when the tokens do not form valid UTF-8, which happens when a
    /// slice starts or ends inside a multibyte character.
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// Raw bytes of the given tokens, not necessarily valid UTF-8.
    fn decode_bytes(&self, tokens: &[u32]) -> Vec<u8>;

    /// Get the name/identifier of this tokenizer.
    fn name(&self) -> &str;
}

/// Tiktoken-based tokenizer.
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
    name: String,
}

impl TiktokenTokenizer {
    /// Create a tokenizer for the given model name (e.g. `"gpt-4"`).
    pub fn new(model: &str) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| Error::Internal(format!("Failed to initialize tokenizer: {}", e)))?;

        Ok(Self {
            bpe,
            name: model.to_string(),
        })
    }

    /// Create the `cl100k_base` tokenizer used for chunk budgets.
    pub fn for_embeddings() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::Internal(format!("Failed to initialize cl100k_base: {}", e)))?;

        Ok(Self {
            bpe,
            name: "cl100k_base".to_string(),
        })
    }
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("name", &self.name)
            .finish()
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|t| t as u32)
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let token_vec: Vec<usize> = tokens.iter().map(|&t| t as usize).collect();
        self.bpe
            .decode(token_vec)
            .map_err(|e| Error::Internal(format!("Failed to decode tokens: {}", e)))
    }

    fn decode_bytes(&self, tokens: &[u32]) -> Vec<u8> {
        let token_vec: Vec<usize> = tokens.iter().map(|&t| t as usize).collect();
        self.bpe._decode_native(&token_vec)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
