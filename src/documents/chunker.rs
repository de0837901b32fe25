//! Document Chunking
//!
//! Splits document text into bounded, overlapping chunks for embedding and
//! retrieval. Sizes are measured with a [`TokenLength`] function, not in
//! characters.
//!
//! Splitting tries the coarsest separator first (paragraph, line, word,
//! character) and only falls back to a finer one for pieces that are still
//! too large. Every chunk is an exact byte span of the source text, so
//! consecutive chunks either touch or overlap and nothing outside the
//! overlaps is lost.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::loader::{Document, DocumentId};
use crate::context::TokenLength;

/// Default maximum chunk size in tokens
pub const CHUNK_SIZE_TARGET: usize = 500;

/// Default overlap between consecutive chunks in tokens
pub const CHUNK_OVERLAP: usize = 10;

/// Separators, coarsest first. The empty string splits between characters.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("Invalid chunker configuration: {0}")]
    InvalidConfig(String),
    #[error("Chunking task failed: {0}")]
    Interrupted(String),
}

impl Serialize for ChunkerError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Document handling strategy based on size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentHandling {
    /// Whole document fits in one chunk
    Whole,
    /// Recursively split into overlapping chunks
    Split,
}

/// A chunk of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Chunk index within document
    pub index: usize,
    /// Document the chunk was cut from
    pub document: DocumentId,
    /// Content of the chunk
    pub text: String,
    /// Start byte offset in the document text
    pub start: usize,
    /// End byte offset in the document text (exclusive)
    pub end: usize,
    /// Length in tokens
    pub token_count: usize,
}

/// Output of [`Chunker::split`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedDocument {
    pub document: DocumentId,
    pub total_tokens: usize,
    pub handling: DocumentHandling,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub separators: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: CHUNK_SIZE_TARGET,
            overlap_tokens: CHUNK_OVERLAP,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ChunkerError> {
        if self.max_tokens == 0 {
            return Err(ChunkerError::InvalidConfig("max_tokens must be positive".into()));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ChunkerError::InvalidConfig(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        if self.separators.is_empty() {
            return Err(ChunkerError::InvalidConfig("separators cannot be empty".into()));
        }
        Ok(())
    }
}

/// Byte span of the source text with its measured length
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    tokens: usize,
}

/// Determine handling strategy for a document
pub fn determine_handling(total_tokens: usize, max_tokens: usize) -> DocumentHandling {
    if total_tokens <= max_tokens {
        DocumentHandling::Whole
    } else {
        DocumentHandling::Split
    }
}

#[derive(Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    length: Arc<dyn TokenLength>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig, length: Arc<dyn TokenLength>) -> Result<Self, ChunkerError> {
        config.validate()?;
        Ok(Self { config, length })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split a document into ordered chunks.
    pub fn split(&self, document: &Document) -> ChunkedDocument {
        let text = document.text();
        let total_tokens = self.length.length(text);
        let handling = determine_handling(total_tokens, self.config.max_tokens);

        let spans = if text.is_empty() {
            Vec::new()
        } else if handling == DocumentHandling::Whole {
            vec![Piece { start: 0, end: text.len(), tokens: total_tokens }]
        } else {
            let mut out = Vec::new();
            let whole = Piece { start: 0, end: text.len(), tokens: total_tokens };
            self.split_piece(text, whole, &self.config.separators, &mut out);
            out
        };

        let chunks: Vec<Chunk> = spans.into_iter()
            .enumerate()
            .map(|(index, span)| {
                let chunk_text = &text[span.start..span.end];
                Chunk {
                    index,
                    document: document.id().clone(),
                    text: chunk_text.to_string(),
                    start: span.start,
                    end: span.end,
                    token_count: self.length.length(chunk_text),
                }
            })
            .collect();

        debug!(
            document = %document.id(),
            total_tokens,
            handling = ?handling,
            chunks = chunks.len(),
            "Chunked document"
        );

        ChunkedDocument {
            document: document.id().clone(),
            total_tokens,
            handling,
            chunks,
        }
    }

    fn split_piece(&self, text: &str, piece: Piece, separators: &[String], out: &mut Vec<Piece>) {
        let slice = &text[piece.start..piece.end];

        // Coarsest separator present in this piece; the last one is the fallback
        let sep_idx = separators.iter()
            .position(|s| s.is_empty() || slice.contains(s.as_str()))
            .unwrap_or(separators.len() - 1);
        let separator = separators[sep_idx].as_str();
        let finer = &separators[sep_idx + 1..];

        let mut good: Vec<Piece> = Vec::new();
        for (rel_start, rel_end) in split_keep_separator(slice, separator) {
            let start = piece.start + rel_start;
            let end = piece.start + rel_end;
            let sub = Piece { start, end, tokens: self.length.length(&text[start..end]) };

            if sub.tokens < self.config.max_tokens {
                good.push(sub);
                continue;
            }

            if !good.is_empty() {
                self.merge_pieces(&good, out);
                good.clear();
            }
            if finer.is_empty() {
                // Atomic unit larger than the limit: keep it whole rather than truncate
                warn!(tokens = sub.tokens, max = self.config.max_tokens, "Emitting oversized chunk");
                out.push(sub);
            } else {
                self.split_piece(text, sub, finer, out);
            }
        }

        if !good.is_empty() {
            self.merge_pieces(&good, out);
        }
    }

    /// Greedily pack contiguous pieces into chunks, carrying up to
    /// `overlap_tokens` worth of trailing pieces into the next chunk.
    fn merge_pieces(&self, pieces: &[Piece], out: &mut Vec<Piece>) {
        let max = self.config.max_tokens;
        let overlap = self.config.overlap_tokens;
        let mut window: VecDeque<Piece> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            if total + piece.tokens > max && !window.is_empty() {
                out.push(span_of(&window, total));
                while total > overlap || (total + piece.tokens > max && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= front.tokens,
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += piece.tokens;
        }

        if !window.is_empty() {
            out.push(span_of(&window, total));
        }
    }
}

fn span_of(window: &VecDeque<Piece>, tokens: usize) -> Piece {
    let start = window.front().map(|p| p.start).unwrap_or(0);
    let end = window.back().map(|p| p.end).unwrap_or(start);
    Piece { start, end, tokens }
}

/// Split `text` on `separator`, keeping the separator at the end of the
/// piece it terminates. Returns relative byte ranges covering all of `text`.
fn split_keep_separator(text: &str, separator: &str) -> Vec<(usize, usize)> {
    if separator.is_empty() {
        return text.char_indices()
            .map(|(i, c)| (i, i + c.len_utf8()))
            .collect();
    }

    let mut ranges = Vec::new();
    let mut start = 0usize;
    for (pos, matched) in text.match_indices(separator) {
        let end = pos + matched.len();
        if end > start {
            ranges.push((start, end));
        }
        start = end;
    }
    if start < text.len() {
        ranges.push((start, text.len()));
    }
    ranges
}
