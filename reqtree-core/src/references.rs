//! Requirement-code cross-reference resolution
//!
//! Text is split into [`Segment`]s: plain runs, verbatim runs (markdown
//! inline code) and code runs naming a requirement that exists in the
//! supplied [`CodeSet`]. The segments always concatenate back to the input.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Uppercase letters + digits with optional `.digits` groups, or `CORE` + digits
const CODE_PATTERN: &str = r"\b(?:[A-Z]+\d+(?:\.\d+)*|CORE\d+)\b";

/// A code being typed at the end of the text; `CORE` may still lack digits
const TRAILING_CODE_PATTERN: &str = r"(?:[A-Z]+\d+(?:\.\d+)*|CORE\d*)$";

/// How many completions an editor offers at once
pub const SUGGESTION_LIMIT: usize = 6;

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CODE_PATTERN).expect("code pattern is valid"))
}

fn trailing_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TRAILING_CODE_PATTERN).expect("trailing code pattern is valid"))
}

/// One run of resolved text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum Segment {
    /// Plain text, no links
    Text(String),
    /// A code known to the code set; rendered as a link
    Code(String),
    /// Text that is never scanned for codes (inline code spans)
    Verbatim(String),
}

impl Segment {
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Text(s) | Segment::Code(s) | Segment::Verbatim(s) => s,
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self, Segment::Code(_))
    }
}

/// Explicit snapshot of every live requirement code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeSet(HashSet<String>);

impl CodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn insert(&mut self, code: impl Into<String>) -> bool {
        self.0.insert(code.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Known codes starting with `prefix`, at most `limit` of them, in
    /// numeric order (`F0.2` before `F0.10`)
    pub fn completions(&self, prefix: &str, limit: usize) -> Vec<&str> {
        let mut matches: Vec<&str> = self
            .0
            .iter()
            .map(String::as_str)
            .filter(|code| code.starts_with(prefix))
            .collect();
        matches.sort_by(|a, b| code_sort_key(a).cmp(&code_sort_key(b)));
        matches.truncate(limit);
        matches
    }
}

fn code_sort_key(code: &str) -> (&str, Vec<u64>) {
    let split = code.find(|c: char| c.is_ascii_digit()).unwrap_or(code.len());
    let (letters, digits) = code.split_at(split);
    let numbers = digits
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().unwrap_or(u64::MAX))
        .collect();
    (letters, numbers)
}

/// The code token being typed at the end of `text`, if any
pub fn trailing_code_token(text: &str) -> Option<&str> {
    trailing_code_regex().find(text).map(|m| m.as_str())
}

/// Completions for the code token at the end of `text`. Empty when the
/// text does not end in something code-shaped.
pub fn suggest_codes<'a>(text: &str, codes: &'a CodeSet, limit: usize) -> Vec<&'a str> {
    match trailing_code_token(text) {
        Some(token) => codes.completions(token, limit),
        None => Vec::new(),
    }
}

impl<S: Into<String>> FromIterator<S> for CodeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Resolves every known code in `text`. Never fails; unknown tokens stay
/// plain text.
pub fn resolve_references(text: &str, codes: &CodeSet) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some((start, end)) = find_code_span(rest) {
        link_codes(&rest[..start], codes, &mut out);
        push(&mut out, Segment::Verbatim(rest[start..end].to_string()));
        rest = &rest[end..];
    }
    link_codes(rest, codes, &mut out);
    out
}

/// Re-resolves already segmented text. Code and verbatim runs are kept as
/// they are; only plain runs are scanned, so applying this to its own
/// output changes nothing.
pub fn resolve_segments(segments: &[Segment], codes: &CodeSet) -> Vec<Segment> {
    let mut out = Vec::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => {
                for resolved in resolve_references(text, codes) {
                    push(&mut out, resolved);
                }
            }
            other => push(&mut out, other.clone()),
        }
    }
    out
}

/// Joins segments back into the original text
pub fn concat(segments: &[Segment]) -> String {
    segments.iter().map(Segment::as_str).collect()
}

/// Codes linked from a segment sequence, in order of appearance
pub fn link_targets(segments: &[Segment]) -> impl Iterator<Item = &str> {
    segments.iter().filter_map(|s| match s {
        Segment::Code(code) => Some(code.as_str()),
        _ => None,
    })
}

fn link_codes(text: &str, codes: &CodeSet, out: &mut Vec<Segment>) {
    let mut last = 0;
    for m in code_regex().find_iter(text) {
        if !codes.contains(m.as_str()) {
            continue;
        }
        push(out, Segment::Text(text[last..m.start()].to_string()));
        out.push(Segment::Code(m.as_str().to_string()));
        last = m.end();
    }
    push(out, Segment::Text(text[last..].to_string()));
}

/// Appends a segment, merging adjacent runs of the same non-code kind and
/// dropping empty ones
fn push(out: &mut Vec<Segment>, segment: Segment) {
    if segment.as_str().is_empty() {
        return;
    }
    match (out.last_mut(), segment) {
        (Some(Segment::Text(prev)), Segment::Text(next)) => prev.push_str(&next),
        (Some(Segment::Verbatim(prev)), Segment::Verbatim(next)) => prev.push_str(&next),
        (_, segment) => out.push(segment),
    }
}

/// Byte range of the first complete inline code span: a run of backticks
/// closed by a run of the same length. Unclosed runs are plain text.
fn find_code_span(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let open = i;
        while i < bytes.len() && bytes[i] == b'`' {
            i += 1;
        }
        let width = i - open;

        let mut j = i;
        while j < bytes.len() {
            if bytes[j] != b'`' {
                j += 1;
                continue;
            }
            let close = j;
            while j < bytes.len() && bytes[j] == b'`' {
                j += 1;
            }
            if j - close == width {
                return Some((open, j));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> CodeSet {
        list.iter().copied().collect()
    }

    fn text(s: &str) -> Segment {
        Segment::Text(s.to_string())
    }

    fn code(s: &str) -> Segment {
        Segment::Code(s.to_string())
    }

    #[test]
    fn test_known_codes_become_links() {
        let input = "See CORE0 and F0.1, also X9";
        let segments = resolve_references(input, &codes(&["CORE0", "F0.1"]));
        assert_eq!(
            segments,
            vec![
                text("See "),
                code("CORE0"),
                text(" and "),
                code("F0.1"),
                text(", also X9"),
            ]
        );
        assert_eq!(concat(&segments), input);
    }

    #[test]
    fn test_token_must_match_exactly() {
        let set = codes(&["F0"]);
        // The whole token is F0.1, which is unknown; F0 alone is not linked.
        assert_eq!(resolve_references("F0.1", &set), vec![text("F0.1")]);
        assert_eq!(resolve_references("xF0", &set), vec![text("xF0")]);
        assert_eq!(resolve_references("F0.", &set), vec![code("F0"), text(".")]);
    }

    #[test]
    fn test_dotted_core_codes_link_whole() {
        let set = codes(&["CORE0.1", "CORE0"]);
        assert_eq!(
            resolve_references("CORE0.1 then CORE0", &set),
            vec![code("CORE0.1"), text(" then "), code("CORE0")]
        );
    }

    #[test]
    fn test_inline_code_is_verbatim() {
        let set = codes(&["F0"]);
        let input = "Use `F0` not F0, and ``a ` F0`` plus `open F0";
        let segments = resolve_references(input, &set);
        assert_eq!(
            segments,
            vec![
                text("Use "),
                Segment::Verbatim("`F0`".to_string()),
                text(" not "),
                code("F0"),
                text(", and "),
                Segment::Verbatim("``a ` F0``".to_string()),
                text(" plus `open "),
                code("F0"),
            ]
        );
        assert_eq!(concat(&segments), input);
    }

    #[test]
    fn test_partition_and_idempotence() {
        let set = codes(&["CORE0", "F0.1", "M2"]);
        let inputs = [
            "",
            "no codes here",
            "F0.1F0.1 F0.1",
            "M2\nM2\t`M2`",
            "CORE0CORE0 (CORE0) [F0.1]",
            "ünïcödé F0.1: ok",
        ];
        for input in inputs {
            let once = resolve_references(input, &set);
            assert_eq!(concat(&once), input);
            assert_eq!(resolve_segments(&once, &set), once);
        }
    }

    #[test]
    fn test_resolve_segments_keeps_existing_codes() {
        // A code segment that is no longer in the set is left alone.
        let set = codes(&["F1"]);
        let segments = vec![text("see "), code("F0"), text(" and F1")];
        assert_eq!(
            resolve_segments(&segments, &set),
            vec![text("see "), code("F0"), text(" and "), code("F1")]
        );
    }

    #[test]
    fn test_link_targets_in_order() {
        let set = codes(&["F0", "M1"]);
        let segments = resolve_references("M1, F0 and M1", &set);
        assert_eq!(link_targets(&segments).collect::<Vec<_>>(), vec!["M1", "F0", "M1"]);
    }

    #[test]
    fn test_completions_are_prefix_matches_in_numeric_order() {
        let set = codes(&["F0.10", "F0.2", "F0.1", "F1", "M0", "CORE0"]);
        assert_eq!(set.completions("F0.", 10), vec!["F0.1", "F0.2", "F0.10"]);
        assert_eq!(set.completions("F", 2), vec!["F0.1", "F0.2"]);
        assert!(set.completions("X", 10).is_empty());
    }

    #[test]
    fn test_suggestions_follow_trailing_token() {
        let set = codes(&["CORE0", "CORE1", "F0", "F0.0", "F0.1", "F2"]);
        assert_eq!(trailing_code_token("see F0."), None);
        assert_eq!(trailing_code_token("see F0"), Some("F0"));
        assert_eq!(trailing_code_token("depends on CORE"), Some("CORE"));
        assert_eq!(suggest_codes("see F0", &set, SUGGESTION_LIMIT), vec!["F0", "F0.0", "F0.1"]);
        assert_eq!(suggest_codes("depends on CORE", &set, 1), vec!["CORE0"]);
        assert!(suggest_codes("nothing here ", &set, SUGGESTION_LIMIT).is_empty());
    }
}
