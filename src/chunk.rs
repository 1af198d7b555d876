//! Fixed-window text chunker.
//!
//! Splits serialized context documents into overlapping character
//! windows before embedding. Windows are counted in characters, not
//! bytes, so multibyte text never splits inside a code point.

use crate::models::{ContextChunk, DocType};

/// Split text into windows of `window` characters, each starting
/// `window - overlap` characters after the previous one. Empty input
/// yields no windows; text that fits in one window yields exactly one.
pub fn split_text(text: &str, window: usize, overlap: usize) -> Vec<String> {
    debug_assert!(overlap < window);

    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= window {
        return vec![text.to_string()];
    }

    let step = window - overlap;
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    windows
}

/// Chunk one document and tag every window with its document family.
/// Sequence numbers are contiguous from 0 within the document.
pub fn chunk_document(
    doc_type: DocType,
    text: &str,
    window: usize,
    overlap: usize,
) -> Vec<ContextChunk> {
    split_text(text, window, overlap)
        .into_iter()
        .enumerate()
        .map(|(seq, text)| ContextChunk {
            doc_type,
            seq: seq as i64,
            text,
        })
        .collect()
}
