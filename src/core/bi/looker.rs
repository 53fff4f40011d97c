use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::filters::{Filterable, apply_filter_listeners};
use super::types::{DashboardMetadata, Filters, QueryBody, QueryDefinition};
use super::{DashboardSource, QueryExecutor, Row};
use crate::core::config::BiInstanceConfig;

const API_PREFIX: &str = "/api/4.0";
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct CreatedQuery {
    id: Value,
}

#[derive(Deserialize)]
struct DashboardDescription {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct DashboardElement {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    note_text: Option<String>,
    #[serde(default)]
    query: Option<QueryBody>,
    #[serde(default)]
    result_maker: Option<ResultMaker>,
}

#[derive(Deserialize)]
struct ResultMaker {
    #[serde(default)]
    query: Option<QueryBody>,
    #[serde(default)]
    filterables: Option<Vec<Filterable>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Client for a Looker-compatible REST API.
pub struct LookerClient {
    base_url: String,
    client_id: String,
    client_secret: String,
    row_limit: u32,
    token: Mutex<Option<CachedToken>>,
    client: Client,
}

impl LookerClient {
    pub fn new(config: &BiInstanceConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            row_limit: config.row_limit,
            token: Mutex::new(None),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN
        {
            return Ok(token.value.clone());
        }

        let body = format!(
            "client_id={}&client_secret={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.client_secret)
        );
        let res = self
            .client
            .post(self.url("/login"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("BI login failed ({})", status));
        }
        let login: LoginResponse = res.json().await?;
        info!("Authenticated against BI instance at {}", self.base_url);

        let value = login.access_token.clone();
        *cached = Some(CachedToken {
            value: login.access_token,
            expires_at: Instant::now() + Duration::from_secs(login.expires_in),
        });
        Ok(value)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(self.client.request(method, self.url(path)).bearer_auth(token))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let res = builder.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!(
                "{} failed ({}): {}",
                what,
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        res.json().await.with_context(|| format!("decoding {}", what))
    }
}

#[async_trait]
impl QueryExecutor for LookerClient {
    async fn run_query(&self, body: &QueryBody) -> Result<Vec<Row>> {
        let mut body = body.clone();
        body.limit = Some(self.row_limit.to_string());

        let created: CreatedQuery = self
            .send_json(
                self.request(Method::POST, "/queries").await?.json(&body),
                "creating query",
            )
            .await?;
        let id = match created.id {
            Value::String(s) => s,
            other => other.to_string(),
        };

        let path = format!(
            "/queries/{}/run/json?apply_formatting=true&cache=true&limit={}",
            urlencoding::encode(&id),
            self.row_limit
        );
        let rows: Vec<Row> = self
            .send_json(self.request(Method::GET, &path).await?, "running query")
            .await?;
        debug!("Query {} ({}.{}) returned {} rows", id, body.model, body.view, rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl DashboardSource for LookerClient {
    async fn fetch_dashboard(
        &self,
        dashboard_id: &str,
        filters: &Filters,
    ) -> Result<DashboardMetadata> {
        let id = urlencoding::encode(dashboard_id);
        let dashboard: DashboardDescription = self
            .send_json(
                self.request(Method::GET, &format!("/dashboards/{}?fields=description", id))
                    .await?,
                "loading dashboard",
            )
            .await?;
        let elements: Vec<DashboardElement> = self
            .send_json(
                self.request(
                    Method::GET,
                    &format!(
                        "/dashboards/{}/dashboard_elements?fields=query,result_maker,note_text,title",
                        id
                    ),
                )
                .await?,
                "loading dashboard elements",
            )
            .await?;

        let queries = queries_from_elements(elements, filters);
        info!("Loaded dashboard {} with {} queries", dashboard_id, queries.len());
        Ok(DashboardMetadata {
            dashboard_id: dashboard_id.to_string(),
            dashboard_filters: filters.clone(),
            description: dashboard.description.unwrap_or_default(),
            queries,
        })
    }
}

/// Keeps tiles that carry a query, directly or through their result maker.
fn queries_from_elements(
    elements: Vec<DashboardElement>,
    filters: &Filters,
) -> Vec<QueryDefinition> {
    elements
        .into_iter()
        .filter_map(|element| {
            let (query, filterables) = match element.result_maker {
                Some(maker) => (
                    element.query.or(maker.query),
                    maker.filterables.unwrap_or_default(),
                ),
                None => (element.query, Vec::new()),
            };
            let mut query_body = query?;
            query_body.filters = apply_filter_listeners(
                &filterables,
                std::mem::take(&mut query_body.filters),
                filters,
            );
            Some(QueryDefinition {
                title: element.title.unwrap_or_default(),
                note_text: element.note_text.filter(|n| !n.is_empty()),
                query_body,
                query_data: None,
            })
        })
        .collect()
}
