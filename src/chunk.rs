//! Recursive character text splitter.
//!
//! Splits extracted page text into chunks of at most `chunk_size`
//! characters, with up to `chunk_overlap` characters carried over from the
//! end of one chunk to the start of the next.
//!
//! The splitter tries separators in priority order: paragraph (`\n\n`),
//! line (`\n`), sentence (`.`), word (` `) and finally single characters.
//! The first separator present in the text is used to cut it into pieces;
//! pieces that are still too long are split again with the remaining
//! separators, and short pieces are greedily merged back up to the size
//! limit. Separators stay attached to the start of the piece that follows
//! them, and chunks are whitespace-trimmed.
//!
//! Lengths are measured in characters, not bytes.

use crate::config::ChunkingConfig;
use crate::models::{ChunkMetadata, TextChunk};

/// Separators in priority order. The empty separator splits into characters.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ".", " ", ""];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split `text` into chunks. Whitespace-only input yields no chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split `text` and tag every chunk with `source` as store data.
    pub fn split_documents(&self, text: &str, source: &str) -> Vec<TextChunk> {
        self.split_text(text)
            .into_iter()
            .map(|chunk| TextChunk {
                text: chunk,
                metadata: ChunkMetadata::store_data(source),
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        // Pick the first separator that occurs in the text; the empty
        // separator always matches.
        let mut separator = "";
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut good_splits: Vec<String> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if remaining.is_empty() {
                final_chunks.push(piece);
            } else {
                final_chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    /// Greedily join pieces into chunks up to `chunk_size`, keeping a tail of
    /// at most `chunk_overlap` characters as the start of the next chunk.
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
        let mut total = 0usize;

        for piece in splits {
            let len = char_len(piece);

            if total + len > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join_trimmed(&current) {
                    docs.push(doc);
                }
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            current.push_back(piece);
            total += len;
        }

        if let Some(doc) = join_trimmed(&current) {
            docs.push(doc);
        }

        docs
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_trimmed(parts: &std::collections::VecDeque<&str>) -> Option<String> {
    let joined: String = parts.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Cut `text` at every occurrence of `separator`, keeping the separator at the
/// start of the following piece. Empty pieces are dropped.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(text[start..pos].to_string());
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }

    pieces.retain(|p| !p.is_empty());
    pieces
}
