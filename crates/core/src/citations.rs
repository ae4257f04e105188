//! Splicing of `:cite[..]{..}` directives into message text.
//!
//! Offsets are counted in `char`s of the original, unspliced text. The
//! splicer is permissive: spans are applied in the order given and bounds
//! are clamped instead of rejected. Use [`replace_text_with_citations_strict`]
//! when malformed input should be refused.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub start: usize,
    pub end: usize,
    pub text: String,
    #[serde(default)]
    pub document_ids: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CitationError {
    #[error("citation {index}: start {start} is after end {end}")]
    InvertedSpan { index: usize, start: usize, end: usize },
    #[error("citation {index}: end {end} is past the text length {len}")]
    OutOfBounds { index: usize, end: usize, len: usize },
    #[error("citation {index}: start {start} overlaps the previous span ending at {previous_end}")]
    Overlap {
        index: usize,
        start: usize,
        previous_end: usize,
    },
    #[error("generation id {0:?} contains a quote or closing brace")]
    InvalidGenerationId(String),
}

/// Build the directive token for one citation.
///
/// The label is the citation's own `text`, percent-encoded so that brackets
/// and quotes cannot terminate the directive early. `start`/`end` are the
/// original offsets. The generation id is inserted as is: an id containing
/// `"` or `}` yields a token the directive reader cannot parse. The strict
/// splicer rejects such ids.
pub fn cite_directive(citation: &Citation, generation_id: &str) -> String {
    format!(
        ":cite[{}]{{generationId=\"{}\" start=\"{}\" end=\"{}\"}}",
        percent_encode(&citation.text),
        generation_id,
        citation.start,
        citation.end
    )
}

pub fn replace_text_with_citations(
    text: &str,
    citations: &[Citation],
    generation_id: &str,
) -> String {
    if citations.is_empty() {
        return text.to_string();
    }
    let mut out = text.to_string();
    let mut drift: isize = 0;
    for c in citations {
        let token = cite_directive(c, generation_id);
        let len = out.chars().count();
        let adj_start = shift(c.start, drift, len);
        let adj_end = shift(c.end, drift, len);
        let head = byte_offset(&out, adj_start);
        let tail = byte_offset(&out, adj_end);
        trace!(
            target: "core::citations",
            "splice start={} end={} at {}..{}",
            c.start,
            c.end,
            adj_start,
            adj_end
        );

        let mut next = String::with_capacity(head + token.len() + out.len() - tail);
        next.push_str(&out[..head]);
        next.push_str(&token);
        next.push_str(&out[tail..]);
        out = next;

        drift += token.chars().count() as isize - (to_isize(c.end) - to_isize(c.start));
    }
    out
}

/// Refuse inverted, out-of-range, overlapping or unordered spans.
pub fn validate_citations(text: &str, citations: &[Citation]) -> Result<(), CitationError> {
    let len = text.chars().count();
    let mut previous_end: Option<usize> = None;
    for (index, c) in citations.iter().enumerate() {
        if c.start > c.end {
            return Err(CitationError::InvertedSpan {
                index,
                start: c.start,
                end: c.end,
            });
        }
        if c.end > len {
            return Err(CitationError::OutOfBounds {
                index,
                end: c.end,
                len,
            });
        }
        if let Some(prev) = previous_end {
            if c.start < prev {
                return Err(CitationError::Overlap {
                    index,
                    start: c.start,
                    previous_end: prev,
                });
            }
        }
        previous_end = Some(c.end);
    }
    Ok(())
}

pub fn replace_text_with_citations_strict(
    text: &str,
    citations: &[Citation],
    generation_id: &str,
) -> Result<String, CitationError> {
    if generation_id.contains(['"', '}']) {
        return Err(CitationError::InvalidGenerationId(generation_id.to_string()));
    }
    validate_citations(text, citations)?;
    Ok(replace_text_with_citations(text, citations, generation_id))
}

/// Reference-list convention: the source goes on its own line above the text.
/// Callers decide when it applies; the splicer never adds it.
pub fn prefix_with_source(text: &str, citation: &Citation, generation_id: &str) -> String {
    format!("From: {}\n{}", cite_directive(citation, generation_id), text)
}

/// Percent-encode everything except ASCII alphanumerics and `-_.!~*'()`.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric()
            || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
        {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Inverse of [`percent_encode`]. Malformed escapes are kept as written.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            out.push(hex_value(bytes[i + 1]) << 4 | hex_value(bytes[i + 2]));
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

fn to_isize(n: usize) -> isize {
    isize::try_from(n).unwrap_or(isize::MAX)
}

fn shift(offset: usize, drift: isize, len: usize) -> usize {
    to_isize(offset).saturating_add(drift).clamp(0, to_isize(len)) as usize
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}
