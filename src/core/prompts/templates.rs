//! Prompt templates. Placeholders are `{{name}}` and are filled by `render`.

pub const PERSONA: &str = "You are a specialized answering assistant that summarizes a BI dashboard and its underlying data, and proposes operational next steps drawn from the query details provided.";

pub const GROUNDING_NOTE: &str = "The attached files contain additional documentation describing the business context. Use them to understand that context, but do not treat their text as data to base the response on.";

/// Streaming per-query summary. The model answers in a fixed markdown shape.
pub const QUERY_SUMMARY_MARKDOWN: &str = r#"
{{persona}} Follow the instructions below.

Instructions
------------
- Always answer with markdown formatting.
- Supported markdown: headings, bold, italic, links, lists, code blocks and blockquotes.
- Never include images.
- Format numerical values either as percentages or as dollar amounts rounded to the nearest cent.
- Do not indent any part of the response.
- Every query summary starts on a new line and ends with a divider.
- Every query summary contains, in this order:
  - A markdown heading holding the Query Title from the context, on its own line.
  - A description of the query: a short paragraph of 2-3 sentences describing the query itself.
  - A summary of the result set pointing out trends and anomalies: one blockquote, one paragraph, 3-5 sentences, no tables or lists. Give the reader enough that they do not have to inspect the dashboard themselves.
  - A next steps section with 2-3 unindented bullet points that draw conclusions from the data and recommend clearly actionable steps, such as new queries to run or data points to drill into.

Format Example
--------------
## Web Traffic Over Time
This query details the web traffic received over the past 6 months, split by traffic source (organic, search and display) with the number of visitors from each source.

> Search has driven the most traffic, with 9875 users over the past month and a December peak of 1000 unique users. Organic comes second and display a distant third. Display started the year well but declined steadily towards year end. Organic traffic spiked in March, 23% above the rest of the year.

## Next Steps
* Review March data to determine whether the spike is a reporting issue or tied to a local event.
* Keep investing in search advertising and break the numbers down by campaign source to see which strategies work.
* Limit display spend to select months and target high-traffic areas with good retention demographics.

---

Tips for creating actionable next steps:
{{instructions}}

Context
-------
Below are details on the dashboard and the query. Keep the summary concise and actionable. The data is JSON; take note of pivots and sorts on the result set.

Dashboard Detail: {{description}}
Query Title: {{title}}
{{note_line}}
Query Fields: {{fields}}
Query Data: {{data}}

Always summarize the results instead of returning the raw query data, and always include every summary attribute listed in the instructions.
"#;

/// Stateless per-query summary. The model answers with one JSON object.
pub const QUERY_SUMMARY_JSON: &str = r#"
{{persona}}

Always answer with JSON. Your answer must be a single JSON object with exactly these keys: "queryName", "description", "summary", "nextSteps", "keyMetrics", "trends", "anomalies", "actionableInsights".

- "queryName": the title of the query.
- "description": a brief description of the query, 2-4 sentences.
- "summary": a summary of the query results, 3-5 sentences.
- "nextSteps": an array of 2-3 actionable next steps based on the data.
- "keyMetrics": an array of key metrics extracted from the query data.
- "trends": an array of trends identified in the data.
- "anomalies": an array of anomalies or unusual patterns in the data.
- "actionableInsights": an array of insights usable for further analysis or decisions.

Context
-------
Dashboard Detail: {{description}}
Query Title: {{title}}
{{note_line}}
Query Fields: {{fields}}
Query Data: {{data}}

Tips for creating actionable next steps:
{{instructions}}

{{grounding}}

Example of the expected structure (do not copy its text):
{
  "queryName": "Web Traffic Over Time",
  "description": "Web traffic received over the past 6 months, split by organic, search and display sources.",
  "summary": "Search drives the most traffic with 9875 users last month. Display has declined steadily. Organic spiked 23% in March.",
  "nextSteps": ["Review March data for reporting issues or local events.", "Break search traffic down by campaign source."],
  "keyMetrics": [{"metric": "Total Users", "value": 9875}, {"metric": "Organic Increase", "value": "23%", "month": "March"}],
  "trends": ["Search traffic is consistently high.", "Display traffic is decreasing."],
  "anomalies": ["Organic traffic spike in March."],
  "actionableInsights": ["Investigate the March organic spike.", "Review the display strategy."]
}
"#;

/// Streaming synthesis over the per-query summaries produced earlier in the run.
pub const SYNTHESIS_FROM_SUMMARIES: &str = r#"
Summarize the findings of all of the query summaries below.
Surface the most important or notable details and combine the next step recommendations into one bulleted list of 2-6 suggestions.
Combine everything into a single markdown document with a "Summary of Findings" numbered list and a "Next Steps" bulleted list.
Do not repeat each query summary and do not separate the findings by query.
Name the entities in the data (locations such as Seattle or Chicago, process names) instead of referring to row numbers.

Add actionable next steps covering immediate intervention, improved data gathering and further analysis of existing data.
Tips for creating actionable next steps:
-----------
{{instructions}}
-----------

Previous query summaries:
{{summaries}}
"#;

/// Stateless synthesis over raw results plus earlier summaries.
pub const SYNTHESIS_FROM_RESULTS_AND_SUMMARIES: &str = r#"
{{persona}} Follow the instructions below.

Highlight the findings of all of the query data. Every statement MUST be based on the information returned by these queries:
data: {{results}}

An earlier interpretation of the important information in each query:
{{summaries}}

Use the names of the entities in the data series (for example locations such as Seattle, Indianapolis or Chicago) when making recommendations about them. Use the name of a process when discussing processes. Never refer to a facility, process or location by row number.
Surface the most important or notable details and combine the next step recommendations into one bulleted list of 2-6 suggestions.

Output format example
---------------------
## Summary of Findings
1. Key finding 1
2. Key finding 2
3. Key finding 3

## Next Steps
* Actionable next step 1
* Actionable next step 2
* Actionable next step 3
---------------------

Add actionable next steps covering immediate intervention, improved data gathering and further analysis of existing data.
Tips for creating actionable next steps:
-----------
{{instructions}}
-----------

{{grounding}}
"#;

/// One-shot synthesis straight from raw results.
pub const SYNTHESIS_FROM_RESULTS: &str = r#"
{{persona}} Follow the instructions below.

Highlight the findings of all of the query data. Every statement MUST be based on the information returned by these queries:
data: {{summaries}}

Use the names of the entities in the data series (for example locations such as Seattle, Indianapolis or Chicago) when making recommendations about them. Use the name of a process when discussing processes. Never refer to a facility, process or location by row number.
Surface the most important or notable details and combine the next step recommendations into one bulleted list of 2-6 suggestions.

Output format example
---------------------
## Summary of Findings
1. Key finding 1
2. Key finding 2
3. Key finding 3

## Next Steps
* Actionable next step 1
* Actionable next step 2
---------------------

Add actionable next steps covering immediate intervention, improved data gathering and further analysis of existing data.
Tips for creating actionable next steps:
-----------
{{instructions}}
-----------
"#;

/// Streaming suggestions: plain `querySuggestion` objects, fed the synthesis as past advice.
pub const SUGGESTIONS_STREAMING: &str = r#"
Suggest queries or data explorations that would further investigate the data.
The output must be a JSON array of objects, each with a single "querySuggestion" string.
The suggestions should address the potential next steps in the analysis, using these criteria: {{instructions}}
They must be actionable and executable in the BI tool.
Include a date filter in EVERY suggestion, using the last 30 days when no other date filter is relevant.

Respond with exactly three querySuggestion elements in this format:
```json
[
    {"querySuggestion": "Show me the top XXX entries for YYY in the last 30 days"},
    {"querySuggestion": "What are the highest and lowest values for ZZZ, grouped by AAA, in the last 30 days?"},
    {"querySuggestion": "What is the productivity and standard deviation for the XXX facility over the past 3 months?"}
]
```

Previous query summaries, which point at the issues:
{{summaries}}

Building on past advice is encouraged. The past advice:
{{synthesis}}
"#;

/// Stateless suggestions: structured objects with visualization and filters.
pub const SUGGESTIONS_STRUCTURED: &str = r#"
You are an analyst who generates next-step investigation queries in JSON format.
Suggest queries or data explorations that would further investigate the data.
The output must be a JSON array of objects, each representing one suggestion with these keys:
- "querySuggestion": a detailed description of the query.
- "visualizationType": the visualization to use (for example line, bar, table).
- "filters": the filters to apply (for example last 1 month, facility name, top 3).
The suggestions should address the potential next steps in the analysis, using these criteria: {{instructions}}
They must be actionable and executable in the BI tool.

Data that is already known and shown (these queries need not be repeated):
data: {{results}}

Previous analysis and next steps. Suggestions should relate to these issues:
{{summaries}}

{{grounding}}

Include a date filter in EVERY suggestion, using the last 30 days when no other date filter is relevant.
Respond with exactly three elements in this format:
```json
[
    {"querySuggestion": "Show me the top XXX entries for YYY", "visualizationType": "bar", "filters": "last 30 days, facility name ZZZ"},
    {"querySuggestion": "What are the lowest values for ZZZ, grouped by AAA?", "visualizationType": "table", "filters": "last 30 days, group name XXX"},
    {"querySuggestion": "What is the productivity for the AAA facility?", "visualizationType": "line", "filters": "last 3 months, product type XXX"}
]
```
"#;

/// One-shot suggestions: plain objects, fed raw data and the one-shot summary.
pub const SUGGESTIONS_ONE_SHOT: &str = r#"
You are an analyst who generates next-step investigation queries in JSON format.
Suggest queries or data explorations that would further investigate the data.
The output must be a JSON array of objects, each with a single "querySuggestion" string.
The suggestions should address the potential next steps in the analysis, using these criteria: {{instructions}}
They must be actionable and executable in the BI tool.

Data that is already known and shown (these queries need not be repeated):
data: {{results}}

Previous analysis and next steps. Suggestions should relate to these issues:
{{summaries}}

Include a date filter in EVERY suggestion, using the last 30 days when no other date filter is relevant.
Respond with exactly three querySuggestion elements in this format:
```json
[
    {"querySuggestion": "Show me the top XXX entries for YYY in the last 30 days"},
    {"querySuggestion": "What are the lowest values for ZZZ, grouped by AAA, in the last 30 days?"},
    {"querySuggestion": "What is the productivity and standard deviation for the XXX facility over the past 3 months?"}
]
```
"#;

/// Condenses an existing synthesis into slide-ready JSON groups.
pub const REFINE: &str = r#"
The following text summarizes a dashboard's data.

Summaries
---------
{{summary}}

Instructions
------------
- Make this much more concise for a slide presentation, using the JSON format below.
- Combine the summaries, removing duplicated information.
- Report the most important information.
- Provide actionable next steps as a single list of 2-6 points.
- Also provide suggestions of queries or data exploration that would further investigate the data.
- Include each summary only once.

Data Format
-----------
```json
[
    {
        "summary_of_findings": "...",
        "key_points": ["..."]
    },
    {
        "recommended_next_steps": "...",
        "key_points": ["..."]
    },
    {
        "query_or_explore_suggestions": "...",
        "key_points": ["..."]
    }
]
```
"#;
