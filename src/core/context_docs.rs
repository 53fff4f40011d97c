//! Grounding documents attached to every stateless model call.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::core::config::{ContextDocsConfig, ContextFile};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";

#[async_trait]
pub trait ContextDocumentStore: Send + Sync {
    async fn list_files(&self) -> Result<Vec<ContextFile>>;
}

pub struct StaticDocuments {
    files: Vec<ContextFile>,
}

impl StaticDocuments {
    pub fn new(files: Vec<ContextFile>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl ContextDocumentStore for StaticDocuments {
    async fn list_files(&self) -> Result<Vec<ContextFile>> {
        Ok(self.files.clone())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectItem {
    name: String,
    #[serde(default)]
    content_type: Option<String>,
}

/// Lists every object in a storage bucket and references it by `gs://` URI.
pub struct BucketDocuments {
    api_base: String,
    bucket: String,
    access_token: Option<String>,
    default_mime_type: String,
    client: Client,
}

impl BucketDocuments {
    pub fn new(bucket: String, access_token: Option<String>, default_mime_type: String) -> Self {
        Self {
            api_base: STORAGE_API.to_string(),
            bucket,
            access_token,
            default_mime_type,
            client: Client::new(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    fn to_file(&self, item: ObjectItem) -> ContextFile {
        ContextFile {
            uri: format!("gs://{}/{}", self.bucket, item.name),
            mime_type: item
                .content_type
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| self.default_mime_type.clone()),
        }
    }
}

#[async_trait]
impl ContextDocumentStore for BucketDocuments {
    async fn list_files(&self) -> Result<Vec<ContextFile>> {
        let url = format!(
            "{}/b/{}/o",
            self.api_base,
            urlencoding::encode(&self.bucket)
        );
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.client.get(&url);
            if let Some(token) = &self.access_token {
                req = req.bearer_auth(token);
            }
            if let Some(page) = &page_token {
                req = req.query(&[("pageToken", page.as_str())]);
            }
            let res = req.send().await?;
            let status = res.status();
            if !status.is_success() {
                return Err(anyhow!(
                    "listing bucket {} failed ({}): {}",
                    self.bucket,
                    status,
                    res.text().await.unwrap_or_default()
                ));
            }
            let list: ObjectList = res.json().await?;
            files.extend(
                list.items
                    .into_iter()
                    .filter(|i| !i.name.ends_with('/'))
                    .map(|i| self.to_file(i)),
            );
            match list.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        info!("Found {} grounding documents in bucket {}", files.len(), self.bucket);
        Ok(files)
    }
}

pub fn build_document_store(config: &ContextDocsConfig) -> Arc<dyn ContextDocumentStore> {
    match &config.bucket {
        Some(bucket) if !bucket.is_empty() => Arc::new(BucketDocuments::new(
            bucket.clone(),
            config.access_token.clone(),
            config.mime_type.clone(),
        )),
        _ => Arc::new(StaticDocuments::new(config.files.clone())),
    }
}
