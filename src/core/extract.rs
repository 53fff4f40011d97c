//! Recovers structured JSON from free-form model replies.
//!
//! Replies routinely wrap the payload in commentary and code fences
//! (```` ```json ````, bare ```` ``` ````, or `'''json` copied from the prompt
//! examples). The scan is deliberately narrow: jump to the first opening
//! token, cut at the closing fence, strip stray backticks, and parse exactly
//! one JSON value. Anything after that value is ignored.

use serde_json::{Map, Value};

use crate::core::error::ExtractionError;

const FENCES: [&str; 2] = ["```", "'''"];
const FRAGMENT_LIMIT: usize = 240;

/// Parse the first bracket-delimited JSON array in `raw`.
pub fn extract_json_array(raw: &str) -> Result<Vec<Value>, ExtractionError> {
    match extract_json_value(raw, '[')? {
        Value::Array(items) => Ok(items),
        other => Err(malformed(&other.to_string(), "expected a JSON array")),
    }
}

/// Parse the first brace-delimited JSON object in `raw`.
pub fn extract_json_object(raw: &str) -> Result<Map<String, Value>, ExtractionError> {
    match extract_json_value(raw, '{')? {
        Value::Object(map) => Ok(map),
        other => Err(malformed(&other.to_string(), "expected a JSON object")),
    }
}

fn extract_json_value(raw: &str, open: char) -> Result<Value, ExtractionError> {
    let start = raw.find(open).ok_or(ExtractionError::NoJsonFound)?;
    let mut candidate = &raw[start..];

    if let Some(end) = FENCES.iter().filter_map(|f| candidate.find(f)).min() {
        candidate = &candidate[..end];
    }
    let candidate = candidate.trim().trim_matches('`').trim();

    let mut values = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(malformed(candidate, &e.to_string())),
        None => Err(malformed(candidate, "empty payload")),
    }
}

/// Markdown passthrough: drop an enclosing code fence (and its language tag)
/// and any stray backticks at either end.
pub fn strip_code_fences(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(fence) = FENCES.iter().find(|f| text.starts_with(**f)) {
        text = match text.find('\n') {
            Some(nl) => &text[nl + 1..],
            None => &text[fence.len()..],
        };
    }
    for fence in FENCES {
        if let Some(stripped) = text.trim_end().strip_suffix(fence) {
            text = stripped;
        }
    }

    text.trim().trim_matches('`').trim().to_string()
}

fn malformed(fragment: &str, message: &str) -> ExtractionError {
    ExtractionError::MalformedJson {
        fragment: fragment.chars().take(FRAGMENT_LIMIT).collect(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SUGGESTIONS: &str = r#"[
        {"querySuggestion": "Top regions by revenue in the last 30 days", "visualizationType": "bar", "filters": "last 30 days"},
        {"querySuggestion": "Lowest converting channels in the last 30 days", "visualizationType": "table", "filters": "last 30 days"},
        {"querySuggestion": "Signup trend by week for the past 3 months", "visualizationType": "line", "filters": "last 3 months"}
    ]"#;

    #[test]
    fn fence_style_does_not_change_the_result() {
        let variants = [
            SUGGESTIONS.to_string(),
            format!("```json\n{}\n```", SUGGESTIONS),
            format!("```\n{}\n```", SUGGESTIONS),
            format!("Here you go:\n```json\n{}\n```\nLet me know!", SUGGESTIONS),
            format!("'''json\n{}\n'''", SUGGESTIONS),
            format!("{}\n\nHope this helps.", SUGGESTIONS),
        ];
        let expected = extract_json_array(SUGGESTIONS).unwrap();
        assert_eq!(expected.len(), 3);
        for variant in &variants {
            assert_eq!(extract_json_array(variant).unwrap(), expected, "{}", variant);
        }
    }

    #[test]
    fn suggestions_keep_all_three_keys() {
        let parsed = extract_json_array(&format!("```json\n{}\n```", SUGGESTIONS)).unwrap();
        assert_eq!(parsed.len(), 3);
        for item in parsed {
            for key in ["querySuggestion", "visualizationType", "filters"] {
                assert!(item.get(key).is_some(), "missing {}", key);
            }
        }
    }

    #[test]
    fn prose_without_bracket_is_no_json_found() {
        let prose = "## Summary of Findings\n1. Seattle leads revenue.\n\n## Next Steps\n* Expand.";
        assert_eq!(extract_json_array(prose), Err(ExtractionError::NoJsonFound));
        assert_eq!(extract_json_array(""), Err(ExtractionError::NoJsonFound));
    }

    #[test]
    fn broken_json_is_malformed_with_fragment() {
        let err = extract_json_array("```json\n[{\"querySuggestion\": \"oops\",]\n```").unwrap_err();
        match err {
            ExtractionError::MalformedJson { fragment, .. } => {
                assert!(fragment.starts_with("[{\"querySuggestion\""));
                assert!(!fragment.contains("```"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fragment_is_truncated() {
        let long = format!("[{}", "x".repeat(1000));
        match extract_json_array(&long).unwrap_err() {
            ExtractionError::MalformedJson { fragment, .. } => {
                assert_eq!(fragment.chars().count(), FRAGMENT_LIMIT)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn refine_groups_parse() {
        let raw = "Sure!\n```json\n[{\"summary_of_findings\": \"Revenue\", \"key_points\": [\"Seattle leads\"]}]\n```";
        let groups = extract_json_array(raw).unwrap();
        assert_eq!(groups[0]["key_points"], json!(["Seattle leads"]));
    }

    #[test]
    fn object_extraction_for_summary_schema() {
        let raw = "```json\n{\"queryName\": \"Revenue by Region\", \"nextSteps\": [\"a\", \"b\"]}\n```";
        let obj = extract_json_object(raw).unwrap();
        assert_eq!(obj["queryName"], json!("Revenue by Region"));
        assert_eq!(extract_json_object("no braces"), Err(ExtractionError::NoJsonFound));
    }

    #[test]
    fn strip_code_fences_passes_markdown_through() {
        assert_eq!(
            strip_code_fences("```markdown\n## Summary\n* item\n```"),
            "## Summary\n* item"
        );
        assert_eq!(strip_code_fences("## Summary\n[link](x)"), "## Summary\n[link](x)");
        assert_eq!(strip_code_fences("``## Summary``"), "## Summary");
    }
}
