use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Filter expressions keyed by field name. Sorted so that equal filter sets
/// serialize identically (the metadata cache key depends on it).
pub type Filters = BTreeMap<String, String>;

/// Drops null-valued entries, which the BI API emits for unset filters.
pub(crate) fn deserialize_filters<'de, D>(deserializer: D) -> Result<Filters, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Option<Value>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            Some(Value::String(s)) => Some((k, s)),
            Some(Value::Null) | None => None,
            Some(other) => Some((k, other.to_string())),
        })
        .collect())
}

/// Reads a string field that callers may send as `null`.
pub(crate) fn deserialize_null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parameters of one tabular request against the BI platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryBody {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub view: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivots: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_fields: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_filters")]
    pub filters: Filters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_total: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotals: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_fields: Option<String>,
}

impl QueryBody {
    pub fn field_list(&self) -> String {
        self.fields.as_deref().unwrap_or_default().join(",")
    }
}

/// One dashboard tile's query, as shipped between the UI and the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_text: Option<String>,
    #[serde(rename = "queryBody", default)]
    pub query_body: QueryBody,
    /// Rows the caller already fetched. Only the stateless endpoints use it.
    #[serde(rename = "queryData", default, skip_serializing_if = "Option::is_none")]
    pub query_data: Option<Vec<Value>>,
}

/// Rows returned for one query, tagged with the query's title and note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_text: Option<String>,
    pub data: Vec<Value>,
}

impl QueryResult {
    pub fn new(query: &QueryDefinition, data: Vec<Value>) -> Self {
        Self {
            title: query.title.clone(),
            note_text: query.note_text.clone(),
            data,
        }
    }
}

/// Description plus ordered query definitions for one (possibly merged) dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetadata {
    #[serde(rename = "dashboardId", default)]
    pub dashboard_id: String,
    #[serde(rename = "dashboardFilters", default)]
    pub dashboard_filters: Filters,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub queries: Vec<QueryDefinition>,
}
