//! Prompt token counting with tiktoken, cached by content hash.

use anyhow::{Context, Result, anyhow};
use moka::sync::Cache;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, o200k_base};
use xxhash_rust::xxh64::Xxh64;

/// Anything that can count prompt tokens.
///
/// Provider selection only needs a number; tests substitute a fixed
/// counter instead of loading a BPE table.
pub trait TokenCount: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenCount for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Token counter backed by tiktoken-rs with a content-hash cache
pub struct TokenCounter {
    /// Byte Pair Encoding (BPE) tokenizer
    bpe: CoreBPE,

    /// xxh64(text) -> token count
    cache: Cache<u64, usize>,
}

impl TokenCounter {
    /// Create a counter for a model name ("gpt-4", "gpt-4o") or an encoding
    /// name ("cl100k_base", "o200k_base"), case-insensitive.
    ///
    /// # Errors
    /// Returns an error if the model or encoding is unsupported.
    pub fn new(model_or_encoding: &str) -> Result<Self> {
        let lower = model_or_encoding.to_ascii_lowercase();

        let bpe = match get_bpe_from_model(&lower) {
            Ok(b) => b,
            Err(_) => match lower.as_str() {
                "o200k_base" => o200k_base().context("load o200k_base")?,
                "cl100k_base" => cl100k_base().context("load cl100k_base")?,
                _ => return Err(anyhow!("Unsupported model/encoding: {model_or_encoding}")),
            },
        };

        Ok(Self {
            bpe,
            cache: Cache::new(10_000),
        })
    }
}

impl TokenCount for TokenCounter {
    fn count(&self, s: &str) -> usize {
        let mut hasher = Xxh64::new(0);
        hasher.update(s.as_bytes());
        let key = hasher.digest();

        if let Some(t) = self.cache.get(&key) {
            return t;
        }

        let t = self.bpe.encode_ordinary(s).len();
        self.cache.insert(key, t);
        t
    }
}
