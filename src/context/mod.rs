//! Context Budget Module
//!
//! Measures text in model tokens so chunking respects the chat model's context.

pub mod tokens;

pub use tokens::{Cl100kTokenizer, TokenCache, TokenLength, TokenizerError};
