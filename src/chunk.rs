//! Fixed-size overlapping text chunker.
//!
//! Splits text into windows of at most `chunk_size` characters, each
//! window starting `chunk_size - overlap` characters after the previous
//! one. No normalization, trimming, or sentence-boundary awareness —
//! offsets are raw character positions, and slicing the source text at
//! `[start, end)` reproduces each chunk exactly.

use anyhow::{bail, Result};

use crate::models::Chunk;

/// Split text into overlapping windows. Pure function of its inputs:
/// identical calls always yield identical chunks.
///
/// Empty text yields an empty vec. `overlap >= chunk_size` is rejected
/// up front — it would keep `start` from ever advancing.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        bail!("chunk_size must be > 0");
    }
    if overlap >= chunk_size {
        bail!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap,
            chunk_size
        );
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(Chunk {
            content: chars[start..end].iter().collect(),
            start,
            end,
        });

        // Once the window has reached the end of the text, stepping back
        // by the overlap would revisit the same tail forever.
        let next = end.saturating_sub(overlap);
        if next <= start {
            break;
        }
        start = next;
    }

    Ok(chunks)
}
