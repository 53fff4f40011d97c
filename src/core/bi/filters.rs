use serde::Deserialize;

use super::types::Filters;

/// Which dashboard filter feeds which query field, as reported per tile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Filterable {
    #[serde(default)]
    pub listen: Vec<FilterListener>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterListener {
    pub dashboard_filter_name: String,
    pub field: String,
}

/// Rewrites a tile's own filters with the dashboard's active filter values.
///
/// A listener whose dashboard filter is unset or blank removes the field's
/// filter, so the tile matches any value like it does on the dashboard.
pub fn apply_filter_listeners(
    filterables: &[Filterable],
    mut filters: Filters,
    dashboard_filters: &Filters,
) -> Filters {
    for listener in filterables.iter().flat_map(|f| f.listen.iter()) {
        match dashboard_filters.get(&listener.dashboard_filter_name) {
            Some(value) if !value.trim().is_empty() => {
                filters.insert(listener.field.clone(), value.clone());
            }
            _ => {
                filters.remove(&listener.field);
            }
        }
    }
    filters
}
