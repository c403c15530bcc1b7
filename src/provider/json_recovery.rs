//! Recovery heuristics for assistant text that doesn't parse as JSON on
//! the first try (spec.md §4.1 step 5).
//!
//! Applied in order: pull the first ```json fenced block, strip trailing
//! commas before `]`/`}`, strip `//` line comments. The first heuristic
//! that yields valid JSON wins.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex")
    })
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",(\s*[\]}])").expect("valid regex"))
}

fn line_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)//[^\n]*$").expect("valid regex"))
}

/// Extract the first fenced ` ```json ` code block, if any.
fn extract_fenced_json(text: &str) -> Option<String> {
    fenced_json_re()
        .captures(text)
        .map(|c| c[1].to_owned())
}

/// Remove commas that precede a closing bracket or brace.
fn strip_trailing_commas(text: &str) -> String {
    trailing_comma_re().replace_all(text, "$1").into_owned()
}

/// Remove `//`-prefixed line comments.
fn strip_line_comments(text: &str) -> String {
    line_comment_re().replace_all(text, "").into_owned()
}

/// Try to parse `text` as JSON, applying recovery heuristics in order
/// until one succeeds. Returns `None` if nothing works.
pub fn parse_with_recovery(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    if let Some(fenced) = extract_fenced_json(text) {
        if let Ok(value) = serde_json::from_str(&fenced) {
            return Some(value);
        }
    }
    let no_trailing_commas = strip_trailing_commas(text);
    if let Ok(value) = serde_json::from_str(&no_trailing_commas) {
        return Some(value);
    }
    let no_comments = strip_line_comments(&no_trailing_commas);
    if let Ok(value) = serde_json::from_str(&no_comments) {
        return Some(value);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let v = parse_with_recovery(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        let v = parse_with_recovery(text).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_trailing_comma() {
        let v = parse_with_recovery(r#"{"a": [1, 2,], "b": 3,}"#).unwrap();
        assert_eq!(v["a"][1], 2);
        assert_eq!(v["b"], 3);
    }

    #[test]
    fn test_line_comments() {
        let text = "{\n  \"a\": 1 // the answer\n}";
        let v = parse_with_recovery(text).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_unrecoverable_returns_none() {
        assert!(parse_with_recovery("not json at all").is_none());
    }
}
