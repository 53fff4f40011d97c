mod templates;

use serde_json::Value;

use crate::core::bi::types::{QueryDefinition, QueryResult};

/// Shape the per-query summary must come back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryFormat {
    /// Heading, description, blockquote summary, next steps. Used when streaming.
    Markdown,
    /// One object with the fixed `queryName ... actionableInsights` keys.
    Json,
}

/// What the dashboard-wide synthesis is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisSource {
    /// Per-query summaries collected during a streaming run.
    Summaries,
    /// Raw results plus summaries supplied by a stateless caller.
    ResultsAndSummaries,
    /// Raw results only (one-shot run).
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionStyle {
    /// `{querySuggestion}` objects built from summaries and the synthesis.
    Streaming,
    /// `{querySuggestion, visualizationType, filters}` objects.
    Structured,
    /// `{querySuggestion}` objects built from raw results and the one-shot summary.
    OneShot,
}

/// Everything needed to produce one prompt. Inputs are only borrowed.
#[derive(Debug, Clone, Copy)]
pub enum PromptKind<'a> {
    QuerySummary {
        description: Option<&'a str>,
        query: &'a QueryDefinition,
        rows: &'a [Value],
        instructions: &'a str,
        format: SummaryFormat,
    },
    DashboardSynthesis {
        results: &'a [Value],
        summaries: &'a [Value],
        instructions: &'a str,
        source: SynthesisSource,
    },
    QuerySuggestions {
        results: &'a [Value],
        summaries: &'a [Value],
        synthesis: Option<&'a str>,
        instructions: &'a str,
        style: SuggestionStyle,
    },
    Refine {
        summary: &'a str,
    },
}

pub fn build_prompt(kind: &PromptKind<'_>) -> String {
    match *kind {
        PromptKind::QuerySummary {
            description,
            query,
            rows,
            instructions,
            format,
        } => {
            let data = embed_rows(rows);
            let note_line = note_line(query.note_text.as_deref());
            let fields = query.query_body.field_list();
            let (template, grounding) = match format {
                SummaryFormat::Markdown => (templates::QUERY_SUMMARY_MARKDOWN, ""),
                SummaryFormat::Json => (templates::QUERY_SUMMARY_JSON, templates::GROUNDING_NOTE),
            };
            render(
                template,
                &[
                    ("persona", templates::PERSONA),
                    ("description", text_or_empty(description)),
                    ("title", query.title.as_str()),
                    ("note_line", note_line.as_str()),
                    ("fields", fields.as_str()),
                    ("data", data.as_str()),
                    ("instructions", instructions),
                    ("grounding", grounding),
                ],
            )
        }
        PromptKind::DashboardSynthesis {
            results,
            summaries,
            instructions,
            source,
        } => match source {
            SynthesisSource::Summaries => render(
                templates::SYNTHESIS_FROM_SUMMARIES,
                &[
                    ("instructions", instructions),
                    ("summaries", render_summary_records(summaries).as_str()),
                ],
            ),
            SynthesisSource::ResultsAndSummaries => render(
                templates::SYNTHESIS_FROM_RESULTS_AND_SUMMARIES,
                &[
                    ("persona", templates::PERSONA),
                    ("results", embed_rows(results).as_str()),
                    ("summaries", render_summary_records(summaries).as_str()),
                    ("instructions", instructions),
                    ("grounding", templates::GROUNDING_NOTE),
                ],
            ),
            SynthesisSource::Results => render(
                templates::SYNTHESIS_FROM_RESULTS,
                &[
                    ("persona", templates::PERSONA),
                    ("summaries", render_summary_records(results).as_str()),
                    ("instructions", instructions),
                ],
            ),
        },
        PromptKind::QuerySuggestions {
            results,
            summaries,
            synthesis,
            instructions,
            style,
        } => match style {
            SuggestionStyle::Streaming => render(
                templates::SUGGESTIONS_STREAMING,
                &[
                    ("instructions", instructions),
                    ("summaries", render_summary_records(summaries).as_str()),
                    ("synthesis", text_or_empty(synthesis)),
                ],
            ),
            SuggestionStyle::Structured => render(
                templates::SUGGESTIONS_STRUCTURED,
                &[
                    ("instructions", instructions),
                    ("results", embed_rows(results).as_str()),
                    ("summaries", render_summary_records(summaries).as_str()),
                    ("grounding", templates::GROUNDING_NOTE),
                ],
            ),
            SuggestionStyle::OneShot => render(
                templates::SUGGESTIONS_ONE_SHOT,
                &[
                    ("instructions", instructions),
                    ("results", embed_rows(results).as_str()),
                    ("summaries", render_summary_records(summaries).as_str()),
                ],
            ),
        },
        PromptKind::Refine { summary } => render(templates::REFINE, &[("summary", summary)]),
    }
}

pub fn per_query_summary(
    description: Option<&str>,
    query: &QueryDefinition,
    rows: &[Value],
    instructions: &str,
    format: SummaryFormat,
) -> String {
    build_prompt(&PromptKind::QuerySummary {
        description,
        query,
        rows,
        instructions,
        format,
    })
}

pub fn dashboard_synthesis(
    results: &[Value],
    summaries: &[Value],
    instructions: &str,
    source: SynthesisSource,
) -> String {
    build_prompt(&PromptKind::DashboardSynthesis {
        results,
        summaries,
        instructions,
        source,
    })
}

pub fn query_suggestions(
    results: &[Value],
    summaries: &[Value],
    synthesis: Option<&str>,
    instructions: &str,
    style: SuggestionStyle,
) -> String {
    build_prompt(&PromptKind::QuerySuggestions {
        results,
        summaries,
        synthesis,
        instructions,
        style,
    })
}

pub fn refine(summary: &str) -> String {
    build_prompt(&PromptKind::Refine { summary })
}

/// Converts typed results into the loosely-shaped records the builders accept.
pub fn results_as_values(results: &[QueryResult]) -> Vec<Value> {
    results
        .iter()
        .filter_map(|r| serde_json::to_value(r).ok())
        .collect()
}

/// Single-pass `{{name}}` substitution. Inserted values are never rescanned.
/// Unknown placeholders are left as they are.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = &after[..end];
                match vars.iter().find(|(k, _)| *k == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn text_or_empty(value: Option<&str>) -> &str {
    value.unwrap_or_default()
}

fn note_line(note: Option<&str>) -> String {
    match note.map(str::trim) {
        Some(n) if !n.is_empty() => format!("Query Note: {}", n),
        _ => String::new(),
    }
}

/// Textual form of an arbitrary JSON value: strings unquoted, absent and null empty.
fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => embed_json(other),
    }
}

/// Blank out null cells so serialized rows never spell the word.
fn scrub_nulls(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::Array(items) => Value::Array(items.iter().map(scrub_nulls).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), scrub_nulls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn embed_json(value: &Value) -> String {
    serde_json::to_string(&scrub_nulls(value)).unwrap_or_default()
}

fn embed_rows(rows: &[Value]) -> String {
    embed_json(&Value::Array(rows.to_vec()))
}

/// Renders summaries as `## title` blocks. Plain strings pass through as-is.
fn render_summary_records(records: &[Value]) -> String {
    records
        .iter()
        .map(|record| match record {
            Value::String(text) => text.clone(),
            Value::Object(map) => {
                let title = value_text(map.get("title").or_else(|| map.get("queryName")));
                let note = note_line(map.get("note_text").and_then(Value::as_str));
                let data = match map.get("data") {
                    Some(d) => value_text(Some(d)),
                    None => embed_json(record),
                };
                let mut block = format!("## {}\n", title);
                if !note.is_empty() {
                    block.push_str(&note);
                    block.push('\n');
                }
                block.push_str(&format!("Query Data: {}\n", data));
                block
            }
            other => value_text(Some(other)),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bi::types::QueryBody;
    use serde_json::json;

    fn revenue_query(note: Option<&str>) -> QueryDefinition {
        QueryDefinition {
            title: "Revenue by Region".to_string(),
            note_text: note.map(str::to_string),
            query_body: QueryBody {
                model: "ecommerce".to_string(),
                view: "orders".to_string(),
                fields: Some(vec![
                    "orders.region".to_string(),
                    "orders.revenue".to_string(),
                ]),
                ..Default::default()
            },
            query_data: None,
        }
    }

    fn assert_no_placeholder_words(prompt: &str) {
        assert!(!prompt.contains("undefined"), "prompt leaked 'undefined'");
        assert!(!prompt.contains("null"), "prompt leaked 'null'");
        assert!(!prompt.contains("{{"), "prompt has an unrendered placeholder");
    }

    #[test]
    fn query_summary_embeds_title_fields_and_rows() {
        let rows = vec![json!({"orders.region": "Seattle", "orders.revenue": 1200})];
        let prompt = per_query_summary(
            Some("Sales overview"),
            &revenue_query(Some("Quarter to date")),
            &rows,
            "focus on operational levers",
            SummaryFormat::Markdown,
        );
        assert!(prompt.contains("Query Title: Revenue by Region"));
        assert!(prompt.contains("Query Note: Quarter to date"));
        assert!(prompt.contains("Query Fields: orders.region,orders.revenue"));
        assert!(prompt.contains("\"orders.region\":\"Seattle\""));
        assert!(prompt.contains("Dashboard Detail: Sales overview"));
        assert!(prompt.contains("focus on operational levers"));
        assert!(!prompt.contains(templates::GROUNDING_NOTE));
    }

    #[test]
    fn missing_optional_fields_render_empty() {
        let rows = vec![json!({"orders.region": null, "orders.revenue": 10})];
        for format in [SummaryFormat::Markdown, SummaryFormat::Json] {
            let prompt = per_query_summary(None, &revenue_query(None), &rows, "", format);
            assert_no_placeholder_words(&prompt);
            assert!(!prompt.contains("Query Note:"));
            assert!(prompt.contains("Dashboard Detail: \n"));
        }

        let blank_note = per_query_summary(
            None,
            &revenue_query(Some("   ")),
            &[],
            "",
            SummaryFormat::Markdown,
        );
        assert!(!blank_note.contains("Query Note:"));
    }

    #[test]
    fn json_summary_lists_every_schema_key() {
        let prompt = per_query_summary(
            None,
            &revenue_query(None),
            &[],
            "",
            SummaryFormat::Json,
        );
        for key in [
            "queryName",
            "description",
            "summary",
            "nextSteps",
            "keyMetrics",
            "trends",
            "anomalies",
            "actionableInsights",
        ] {
            assert!(prompt.contains(&format!("\"{}\"", key)), "missing {}", key);
        }
        assert!(prompt.contains(templates::GROUNDING_NOTE));
    }

    #[test]
    fn synthesis_variants_carry_instructions_and_inputs() {
        let results = vec![json!({"title": "Signups by Channel", "data": [{"channel": "email"}]})];
        let summaries = vec![json!("## Revenue by Region\n> Seattle leads.")];

        let streaming = dashboard_synthesis(&[], &summaries, "be brief", SynthesisSource::Summaries);
        assert!(streaming.contains("Seattle leads."));
        assert!(streaming.contains("be brief"));
        assert!(streaming.contains("Summary of Findings"));

        let rest = dashboard_synthesis(
            &results,
            &summaries,
            "be brief",
            SynthesisSource::ResultsAndSummaries,
        );
        assert!(rest.contains("\"channel\":\"email\""));
        assert!(rest.contains("Seattle leads."));
        assert!(rest.contains("row number"));
        assert!(rest.contains(templates::GROUNDING_NOTE));

        let one_shot = dashboard_synthesis(&results, &[], "be brief", SynthesisSource::Results);
        assert!(one_shot.contains("## Signups by Channel"));
        assert_no_placeholder_words(&one_shot);
    }

    #[test]
    fn suggestion_prompts_mandate_three_entries_and_date_filter() {
        let summaries = vec![json!({"queryName": "Revenue by Region", "note_text": null})];
        for style in [
            SuggestionStyle::Streaming,
            SuggestionStyle::Structured,
            SuggestionStyle::OneShot,
        ] {
            let prompt = query_suggestions(&[], &summaries, None, "focus", style);
            assert!(prompt.contains("exactly three"));
            assert!(prompt.contains("last 30 days"));
            assert!(prompt.contains("## Revenue by Region"));
            assert_no_placeholder_words(&prompt);
        }
        let structured =
            query_suggestions(&[], &[], None, "", SuggestionStyle::Structured);
        assert!(structured.contains("\"visualizationType\""));
        assert!(structured.contains("\"filters\""));
    }

    #[test]
    fn streaming_suggestions_include_past_advice() {
        let prompt = query_suggestions(
            &[],
            &[],
            Some("Expand the Seattle pilot"),
            "",
            SuggestionStyle::Streaming,
        );
        assert!(prompt.contains("Expand the Seattle pilot"));
    }

    #[test]
    fn refine_embeds_summary_and_groups() {
        let prompt = refine("## Summary of Findings\n1. Seattle leads");
        assert!(prompt.contains("1. Seattle leads"));
        assert!(prompt.contains("key_points"));
        assert!(prompt.contains("recommended_next_steps"));
    }

    #[test]
    fn render_does_not_rescan_inserted_text() {
        let out = render("{{a}} and {{b}}", &[("a", "{{b}}"), ("b", "x")]);
        assert_eq!(out, "{{b}} and x");
        assert_eq!(render("keep {{unknown}}", &[]), "keep {{unknown}}");
        assert_eq!(render("open {{ end", &[]), "open {{ end");
    }

    #[test]
    fn builder_does_not_mutate_inputs() {
        let query = revenue_query(None);
        let rows = vec![json!({"a": null})];
        let before = (query.clone(), rows.clone());
        let _ = per_query_summary(None, &query, &rows, "", SummaryFormat::Markdown);
        assert_eq!(before, (query, rows));
    }
}
