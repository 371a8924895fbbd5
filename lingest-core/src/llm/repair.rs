//! Treats model output as "nearly JSON": locate the first balanced
//! object/array, then run a tolerant repair pass before parsing.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Extracts the first balanced `open…close` substring, honoring string
/// literals and escapes so braces inside text do not confuse the scan.
pub fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if start.is_some() => in_string = true,
            c if c == open => {
                if start.is_none() {
                    start = Some(index);
                }
                depth += 1;
            }
            c if c == close => {
                if let Some(opened_at) = start {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[opened_at..index + ch.len_utf8()]);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn trailing_comma_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r",\s*([}\]])").unwrap())
}

fn missing_comma_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\}\s*\{").unwrap())
}

/// Repairs common structural defects in model JSON: markdown fences,
/// typographic quotes, trailing commas, and missing commas between
/// adjacent array objects.
pub fn repair(text: &str) -> String {
    let mut repaired = text.trim().to_string();

    if repaired.starts_with("```") {
        repaired = repaired
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string();
    }

    for (smart, plain) in [('\u{201c}', '"'), ('\u{201d}', '"'), ('\u{00ab}', '"'), ('\u{00bb}', '"')] {
        repaired = repaired.replace(smart, &plain.to_string());
    }

    repaired = trailing_comma_pattern()
        .replace_all(&repaired, "$1")
        .to_string();
    repaired = missing_comma_pattern()
        .replace_all(&repaired, "}, {")
        .to_string();

    repaired
}

/// First balanced array in `text`, repaired and parsed.
pub fn parse_array(text: &str) -> Option<Vec<Value>> {
    let candidate = extract_balanced(text, '[', ']')?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Array(items)) => Some(items),
        _ => match serde_json::from_str::<Value>(&repair(candidate)) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        },
    }
}

/// First balanced object in `text`, repaired and parsed.
pub fn parse_object(text: &str) -> Option<Value> {
    let candidate = extract_balanced(text, '{', '}')?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => match serde_json::from_str::<Value>(&repair(candidate)) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_balanced_array() {
        let text = "Sure! Here you go:\n[{\"index\": 0, \"text\": \"a [b]\"}] trailing";
        let extracted = extract_balanced(text, '[', ']').unwrap();
        assert!(extracted.starts_with('['));
        assert!(extracted.ends_with(']'));
        let parsed = parse_array(text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["text"], "a [b]");
    }

    #[test]
    fn brackets_inside_strings_do_not_break_extraction() {
        let text = r#"[{"text": "smile :] now"}]"#;
        let parsed = parse_array(text).unwrap();
        assert_eq!(parsed[0]["text"], "smile :] now");
    }

    #[test]
    fn repairs_markdown_fence_and_trailing_comma() {
        let text = "```json\n[{\"index\": 0, \"text\": \"привет\"},]\n```";
        let parsed = parse_array(&repair(text)).unwrap();
        assert_eq!(parsed[0]["text"], "привет");
    }

    #[test]
    fn repairs_missing_comma_between_objects() {
        let text = r#"[{"index": 0} {"index": 1}]"#;
        let parsed = parse_array(text).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn parses_object_with_commentary_around_it() {
        let text = "The analysis follows.\n{\"cefrLevel\": \"B1\"}\nHope this helps!";
        let parsed = parse_object(text).unwrap();
        assert_eq!(parsed["cefrLevel"], "B1");
    }

    #[test]
    fn unbalanced_input_returns_none() {
        assert!(parse_array("[1, 2").is_none());
        assert!(parse_object("not json at all").is_none());
    }
}
