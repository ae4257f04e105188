use bytes::{Buf, Bytes, BytesMut};
use coral_core::citations::Citation;
use coral_core::errors::{ChatError, STREAM_DECODE};
use coral_core::llm::{Document, StreamEnd, StreamEvent};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct StreamStartData {
    #[serde(default)]
    generation_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Deserialize)]
struct TextData {
    text: String,
}

#[derive(Deserialize)]
struct CitationsData {
    #[serde(default)]
    citations: Vec<Citation>,
}

#[derive(Deserialize)]
struct DocumentsData {
    #[serde(default)]
    documents: Vec<Document>,
}

/// Position of the earliest blank line and the length of its separator.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = twoway::find_bytes(buf, b"\r\n\r\n").map(|p| (p, 4));
    let lf = twoway::find_bytes(buf, b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Split one complete SSE frame off the front of `buf`.
pub(crate) fn next_frame(buf: &mut BytesMut) -> Option<Bytes> {
    let (pos, sep) = find_event_boundary(buf)?;
    let frame = buf.split_to(pos).freeze();
    buf.advance(sep);
    Some(frame)
}

/// Decode one frame. `Ok(None)` for comments, keep-alives and event kinds
/// this client does not consume.
pub(crate) fn parse_event(frame: &[u8]) -> Result<Option<StreamEvent>, ChatError> {
    let s = std::str::from_utf8(frame)
        .map_err(|e| ChatError::stream(STREAM_DECODE, e.to_string()))?;
    let mut event: Option<&str> = None;
    let mut data_lines = Vec::new();
    for line in s.lines() {
        if let Some(v) = line.strip_prefix("event:") {
            event = Some(v.trim());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if data_lines.is_empty() {
        return Ok(None);
    }
    let json_text = data_lines.join("\n");
    let mut v: serde_json::Value = serde_json::from_str(&json_text)
        .map_err(|e| ChatError::stream(STREAM_DECODE, e.to_string()))?;

    let wrapped = v.get("event").and_then(|k| k.as_str()).map(str::to_string);
    let kind = match wrapped {
        Some(k) => {
            v = v.get_mut("data").map(serde_json::Value::take).unwrap_or_default();
            k
        }
        None => match event {
            Some(e) => e.to_string(),
            None => return Ok(None),
        },
    };
    decode_event(&kind, v)
}

fn decode_event(kind: &str, data: serde_json::Value) -> Result<Option<StreamEvent>, ChatError> {
    fn from<T: for<'de> Deserialize<'de>>(
        kind: &str,
        data: serde_json::Value,
    ) -> Result<T, ChatError> {
        serde_json::from_value(data)
            .map_err(|e| ChatError::stream(STREAM_DECODE, format!("{kind}: {e}")))
    }
    let ev = match kind {
        "stream-start" => {
            let d: StreamStartData = from(kind, data)?;
            StreamEvent::StreamStart {
                generation_id: d.generation_id,
                conversation_id: d.conversation_id,
            }
        }
        "search-results" => {
            StreamEvent::SearchResults(from::<DocumentsData>(kind, data)?.documents)
        }
        "text-generation" => StreamEvent::TextGeneration(from::<TextData>(kind, data)?.text),
        "citation-generation" => {
            StreamEvent::CitationGeneration(from::<CitationsData>(kind, data)?.citations)
        }
        "stream-end" => StreamEvent::StreamEnd(from::<StreamEnd>(kind, data)?),
        other => {
            debug!(target: "providers::coral", "skip event kind={}", other);
            return Ok(None);
        }
    };
    Ok(Some(ev))
}
