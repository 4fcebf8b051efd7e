//! Paragraph-respecting markdown chunker.
//!
//! Splits on blank lines, packs paragraphs into chunks bounded by an estimated
//! token budget and carries trailing paragraphs forward as overlap. A single
//! paragraph larger than the budget is emitted whole.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1800,
            overlap_tokens: 150,
        }
    }
}

impl ChunkingConfig {
    pub fn chunk(&self, content: &str) -> Vec<String> {
        chunk_markdown(content, self.max_tokens, self.overlap_tokens)
    }
}

/// Rough token count: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

pub fn chunk_markdown(content: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;

    for para in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_tokens = estimate_tokens(para);
        if current_tokens + para_tokens > max_tokens && !current.is_empty() {
            chunks.push(current.join("\n\n"));

            let mut carried = 0usize;
            let mut keep_from = current.len();
            for (i, prev) in current.iter().enumerate().rev() {
                let prev_tokens = estimate_tokens(prev);
                if carried + prev_tokens > overlap_tokens {
                    break;
                }
                carried += prev_tokens;
                keep_from = i;
            }
            current.drain(..keep_from);
            current_tokens = carried;
        }
        current.push(para);
        current_tokens += para_tokens;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n\n"));
    }
    chunks
}
