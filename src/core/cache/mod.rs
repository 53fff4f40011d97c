use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::bi::{DashboardMetadata, DashboardSource, Filters, merge_dashboards};

/// `<[dashboard_id, extra ids...] as JSON>:<filters as JSON>`. Filters are a
/// sorted map, so equal filter sets always produce the same key.
pub fn cache_key(dashboard_id: &str, extra_dashboards: &[String], filters: &Filters) -> String {
    let ids: Vec<&str> = std::iter::once(dashboard_id)
        .chain(extra_dashboards.iter().map(String::as_str))
        .collect();
    let ids_json = serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string());
    let filters_json = serde_json::to_string(filters).unwrap_or_else(|_| "{}".to_string());
    format!("{}:{}", ids_json, filters_json)
}

/// Dashboard metadata keyed by dashboard and filter set. Entries are only
/// ever replaced whole; there is no eviction.
pub struct MetadataCache {
    db: Arc<Mutex<Connection>>,
}

impl MetadataCache {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = Connection::open(path)?;
        Self::init(db, &path.display().to_string())
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(db: Connection, label: &str) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS dashboard_metadata (
                cache_key TEXT PRIMARY KEY,
                metadata_json TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        info!("Metadata cache ready at {}", label);
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub async fn get(&self, key: &str) -> Result<Option<DashboardMetadata>> {
        let db = self.db.lock().await;
        let raw: Option<String> = db
            .query_row(
                "SELECT metadata_json FROM dashboard_metadata WHERE cache_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(metadata) => Ok(Some(metadata)),
                Err(e) => {
                    warn!("Ignoring unreadable cache entry {}: {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Single statement, so readers see the old entry or the new one, never a mix.
    pub async fn put(&self, key: &str, metadata: &DashboardMetadata) -> Result<()> {
        let json = serde_json::to_string(metadata)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO dashboard_metadata (cache_key, metadata_json, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            params![key, json],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedMetadata {
    pub metadata: DashboardMetadata,
    pub from_cache: bool,
}

/// Read-through access to dashboard metadata.
#[derive(Clone)]
pub struct MetadataService {
    cache: Arc<MetadataCache>,
}

impl MetadataService {
    pub fn new(cache: Arc<MetadataCache>) -> Self {
        Self { cache }
    }

    pub async fn load(
        &self,
        source: &dyn DashboardSource,
        dashboard_id: &str,
        filters: &Filters,
        extra_dashboards: &[String],
        refresh: bool,
    ) -> Result<LoadedMetadata> {
        let key = cache_key(dashboard_id, extra_dashboards, filters);

        if !refresh && let Some(metadata) = self.cache.get(&key).await? {
            info!("Dashboard metadata for {} served from cache", dashboard_id);
            return Ok(LoadedMetadata {
                metadata,
                from_cache: true,
            });
        }

        let mut metadata = source.fetch_dashboard(dashboard_id, filters).await?;
        for extra in extra_dashboards {
            let additional = source.fetch_dashboard(extra, filters).await?;
            metadata = merge_dashboards(metadata, additional);
        }

        self.cache.put(&key, &metadata).await?;
        Ok(LoadedMetadata {
            metadata,
            from_cache: false,
        })
    }
}
