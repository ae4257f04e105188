//! Reader for the `:cite[label]{generationId=".." start=".." end=".."}`
//! micro-syntax produced by [`crate::citations`].

use crate::citations::percent_decode;

const MARKER: &str = ":cite[";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CiteDirective {
    pub label: String,
    pub generation_id: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Cite(CiteDirective),
}

/// Split `s` into plain text and citation directives.
///
/// Markers that do not parse (unterminated label or attribute block, missing
/// or non-numeric `start`/`end`) stay in the surrounding text.
pub fn parse_cite_directives(s: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;
    while let Some(found) = s[pos..].find(MARKER) {
        let at = pos + found;
        match parse_one(&s[at..]) {
            Some((directive, used)) => {
                if at > text_start {
                    out.push(Segment::Text(&s[text_start..at]));
                }
                out.push(Segment::Cite(directive));
                pos = at + used;
                text_start = pos;
            }
            None => pos = at + 1,
        }
    }
    if text_start < s.len() {
        out.push(Segment::Text(&s[text_start..]));
    }
    out
}

fn parse_one(s: &str) -> Option<(CiteDirective, usize)> {
    let body = s.strip_prefix(MARKER)?;
    let close = body.find(']')?;
    let label = &body[..close];
    let attrs_src = body[close + 1..].strip_prefix('{')?;
    let (attrs, attrs_len) = parse_attrs(attrs_src)?;

    let mut generation_id = String::new();
    let mut start = None;
    let mut end = None;
    for (k, v) in attrs {
        match k {
            "generationId" => generation_id = v.to_string(),
            "start" => start = v.parse().ok(),
            "end" => end = v.parse().ok(),
            _ => {}
        }
    }
    let directive = CiteDirective {
        label: percent_decode(label),
        generation_id,
        start: start?,
        end: end?,
    };
    Some((directive, MARKER.len() + close + 2 + attrs_len))
}

// Returns the attribute pairs and the bytes consumed including the closing '}'.
fn parse_attrs(s: &str) -> Option<(Vec<(&str, &str)>, usize)> {
    let mut attrs = Vec::new();
    let mut i = 0;
    let bytes = s.as_bytes();
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match *bytes.get(i)? {
            b'}' => return Some((attrs, i + 1)),
            _ => {
                let eq = s[i..].find('=')? + i;
                let name = s[i..eq].trim();
                if name.is_empty() || name.contains(['}', '"']) {
                    return None;
                }
                let value_start = eq + 1;
                if bytes.get(value_start) != Some(&b'"') {
                    return None;
                }
                let value_end = s[value_start + 1..].find('"')? + value_start + 1;
                attrs.push((name, &s[value_start + 1..value_end]));
                i = value_end + 1;
            }
        }
    }
}
