//! Overlapping text chunking for regulatory documents.
//!
//! Chunks are measured in Unicode scalar values so multi-byte text is never
//! split mid-codepoint. Adjacent chunks share exactly `overlap` characters,
//! which keeps a control statement that straddles a boundary visible in full
//! to at least one extraction call.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::ParseError;
use crate::rule::content_digest;

/// Default chunk length in characters.
pub const DEFAULT_MAX_LEN: usize = 700;
/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_OVERLAP: usize = 100;

/// An uploaded regulatory document, immutable once ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub doc_id: String,
    pub framework: String,
    pub content: Vec<u8>,
}

impl RawDocument {
    /// Create a document whose id is derived from its content.
    pub fn new(framework: &str, content: Vec<u8>) -> Self {
        Self {
            doc_id: content_digest(&content),
            framework: framework.to_string(),
            content,
        }
    }

    /// Use the caller's provenance id instead of the content digest.
    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = doc_id.into();
        self
    }

    pub fn decode(&self) -> Result<String, ParseError> {
        decode_document(&self.content)
    }
}

/// A bounded slice of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub doc_id: String,
    pub index: usize,
    pub text: String,
    /// Half-open character range into the decoded document.
    pub char_range: Range<usize>,
}

/// Decode raw document bytes into text.
pub fn decode_document(bytes: &[u8]) -> Result<String, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ParseError::NotText(e.to_string()))?;
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(text.to_string())
}

/// Split `text` into ordered chunks of at most `max_len` characters.
///
/// The chunks cover the whole input; chunk `i + 1` starts `max_len - overlap`
/// characters after chunk `i`.
pub fn chunk_text(
    doc_id: &str,
    text: &str,
    max_len: usize,
    overlap: usize,
) -> Result<Vec<TextChunk>, ParseError> {
    if max_len == 0 || overlap >= max_len {
        return Err(ParseError::InvalidWindow { max_len, overlap });
    }
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = boundaries.len() - 1;
    let step = max_len - overlap;

    let mut chunks = Vec::with_capacity(total.div_ceil(step));
    let mut start = 0;
    loop {
        let end = (start + max_len).min(total);
        chunks.push(TextChunk {
            doc_id: doc_id.to_string(),
            index: chunks.len(),
            text: text[boundaries[start]..boundaries[end]].to_string(),
            char_range: start..end,
        });
        if end == total {
            break;
        }
        start += step;
    }

    Ok(chunks)
}
