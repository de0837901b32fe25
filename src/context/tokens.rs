//! Token counting using tiktoken-rs.
//!
//! Chunk sizes are measured in `cl100k_base` tokens so chunk boundaries line up
//! with the context budget of the downstream chat model.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Name of the encoding used by [`Cl100kTokenizer`].
pub const CL100K_BASE: &str = "cl100k_base";

/// Default number of cached counts per tokenizer instance.
const DEFAULT_CACHE_SIZE: usize = 10_000;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Failed to load {0} encoding: {1}")]
    Encoding(&'static str, String),
}

/// Length function used to size chunks.
///
/// Implementations must be stable: the same text always measures the same
/// within one session.
pub trait TokenLength: Send + Sync {
    /// Name and version of the tokenization scheme.
    fn scheme(&self) -> &str;

    /// Length of `text` in this scheme's units.
    fn length(&self, text: &str) -> usize;
}

/// Cache for token counts, keyed by content hash
pub struct TokenCache {
    cache: HashMap<u64, usize>,
    max_size: usize,
}

impl TokenCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    pub fn get(&self, hash: u64) -> Option<usize> {
        self.cache.get(&hash).copied()
    }

    pub fn insert(&mut self, hash: u64, count: usize) {
        if self.max_size == 0 {
            return;
        }
        // At capacity: drop half the entries
        if self.cache.len() >= self.max_size {
            let keys_to_remove: Vec<_> = self.cache.keys().take(self.max_size / 2 + 1).copied().collect();
            for key in keys_to_remove {
                self.cache.remove(&key);
            }
        }
        self.cache.insert(hash, count);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Hash content for cache lookup
fn hash_content(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// `cl100k_base` tokenizer with a per-instance count cache.
///
/// Encoding only borrows the BPE tables, so concurrent callers count in
/// parallel; only the cache is locked.
pub struct Cl100kTokenizer {
    bpe: CoreBPE,
    cache: RwLock<TokenCache>,
}

impl Cl100kTokenizer {
    pub fn new() -> Result<Self, TokenizerError> {
        Self::with_cache_size(DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(max_size: usize) -> Result<Self, TokenizerError> {
        let bpe = cl100k_base().map_err(|e| TokenizerError::Encoding(CL100K_BASE, e.to_string()))?;
        Ok(Self {
            bpe,
            cache: RwLock::new(TokenCache::new(max_size)),
        })
    }

    /// Count tokens in text. Results are cached by content hash.
    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let content_hash = hash_content(text);
        if let Some(count) = self.cache.read().get(content_hash) {
            return count;
        }

        let count = self.bpe.encode_with_special_tokens(text).len();
        self.cache.write().insert(content_hash, count);
        count
    }

    /// Number of cached counts
    pub fn cached_entries(&self) -> usize {
        self.cache.read().len()
    }
}

impl TokenLength for Cl100kTokenizer {
    fn scheme(&self) -> &str {
        CL100K_BASE
    }

    fn length(&self, text: &str) -> usize {
        self.count_tokens(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> Cl100kTokenizer {
        Cl100kTokenizer::new().unwrap()
    }

    #[test]
    fn test_count_tokens_empty() {
        assert_eq!(tokenizer().count_tokens(""), 0);
    }

    #[test]
    fn test_count_tokens_simple() {
        let count = tokenizer().count_tokens("Hello, world!");
        assert!(count > 0);
        assert!(count < 10);
    }

    #[test]
    fn test_count_tokens_cached() {
        let tok = tokenizer();
        let text = "This is a test sentence for caching.";
        let count1 = tok.count_tokens(text);
        assert_eq!(tok.cached_entries(), 1);
        let count2 = tok.count_tokens(text);
        assert_eq!(count1, count2);
        assert_eq!(tok.cached_entries(), 1);
    }

    #[test]
    fn test_concurrent_counting_agrees() {
        let tok = std::sync::Arc::new(tokenizer());
        let text = "Paris is the capital and most populous city of France.";
        let expected = tok.count_tokens(text);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let tok = tok.clone();
                std::thread::spawn(move || {
                    let count = tok.count_tokens(text);
                    let fresh = tok.count_tokens(&format!("{} {}", text, i));
                    (count, fresh)
                })
            })
            .collect();

        for handle in handles {
            let (count, fresh) = handle.join().unwrap();
            assert_eq!(count, expected);
            assert!(fresh > expected);
        }
    }

    #[test]
    fn test_cache_evicts_at_capacity() {
        let mut cache = TokenCache::new(4);
        for i in 0..4 {
            cache.insert(i, i as usize);
        }
        assert_eq!(cache.len(), 4);
        cache.insert(99, 1);
        assert!(cache.len() <= 2);
        assert_eq!(cache.get(99), Some(1));
    }

    #[test]
    fn test_zero_capacity_cache_stores_nothing() {
        let tok = Cl100kTokenizer::with_cache_size(0).unwrap();
        tok.count_tokens("no caching here");
        assert_eq!(tok.cached_entries(), 0);
    }

    #[test]
    fn test_scheme_name() {
        assert_eq!(tokenizer().scheme(), "cl100k_base");
    }
}
