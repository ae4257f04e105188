// Terminal rendering of finished answers. ASCII-friendly by default.

use coral_core::citations::{
    prefix_with_source, replace_text_with_citations, replace_text_with_citations_strict, Citation,
};
use coral_core::directive::{parse_cite_directives, Segment};
use coral_core::llm::ChatResponse;
use textwrap::fill;
use tracing::warn;

pub const TITLE_SOURCES: &str = "Sources:";

/// One citation spanning the whole answer reads as a reference-list entry.
fn is_reference_list(resp: &ChatResponse) -> Option<&Citation> {
    match resp.citations.as_slice() {
        [only] if only.start == 0 && only.end == resp.text.chars().count() => Some(only),
        _ => None,
    }
}

/// Answer text with `:cite` directives spliced in.
pub fn spliced(resp: &ChatResponse, strict: bool) -> String {
    if let Some(c) = is_reference_list(resp) {
        return prefix_with_source(&resp.text, c, &resp.generation_id);
    }
    if !strict {
        return replace_text_with_citations(&resp.text, &resp.citations, &resp.generation_id);
    }
    match replace_text_with_citations_strict(&resp.text, &resp.citations, &resp.generation_id) {
        Ok(s) => s,
        Err(e) => {
            warn!(target: "cli", "dropping citations: {}", e);
            resp.text.clone()
        }
    }
}

/// Plain text: each cited label is followed by `[n]` pointing into the source list.
pub fn plain(resp: &ChatResponse, strict: bool, width: usize) -> String {
    let marked = spliced(resp, strict);
    let mut order: Vec<String> = Vec::new();
    let mut body = String::new();
    for seg in parse_cite_directives(&marked) {
        match seg {
            Segment::Text(t) => body.push_str(t),
            Segment::Cite(d) => {
                body.push_str(&d.label);
                let ids = resp
                    .citations
                    .iter()
                    .find(|c| c.start == d.start && c.end == d.end)
                    .map(|c| c.document_ids.as_slice())
                    .unwrap_or(&[]);
                let mut nums = Vec::new();
                for id in ids {
                    let n = match order.iter().position(|o| o == id) {
                        Some(i) => i + 1,
                        None => {
                            order.push(id.clone());
                            order.len()
                        }
                    };
                    if !nums.contains(&n) {
                        nums.push(n);
                    }
                }
                if !nums.is_empty() {
                    let list: Vec<String> = nums.iter().map(|n| n.to_string()).collect();
                    body.push_str(&format!("[{}]", list.join(",")));
                }
            }
        }
    }
    let mut out = fill(&body, width.max(20));
    if !order.is_empty() {
        out.push_str("\n\n");
        out.push_str(&source_lines(resp, &order).join("\n"));
    }
    out
}

/// Source list for every cited document, in first-cited order.
pub fn sources(resp: &ChatResponse) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for c in &resp.citations {
        for id in &c.document_ids {
            if !order.contains(id) {
                order.push(id.clone());
            }
        }
    }
    if order.is_empty() {
        return Vec::new();
    }
    source_lines(resp, &order)
}

fn source_lines(resp: &ChatResponse, order: &[String]) -> Vec<String> {
    let mut lines = vec![TITLE_SOURCES.to_string()];
    for (i, id) in order.iter().enumerate() {
        let doc = resp.documents.iter().find(|d| &d.document_id == id);
        let label = match doc {
            Some(d) => match (&d.title, &d.url) {
                (Some(t), Some(u)) => format!("{} ({})", t, u),
                (Some(t), None) => t.clone(),
                (None, Some(u)) => u.clone(),
                (None, None) => id.clone(),
            },
            None => id.clone(),
        };
        lines.push(format!("[{}] {}", i + 1, label));
    }
    lines
}
