use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_CONFIG_FILE: &str = "dashsum.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub bi: BiConfig,
    #[serde(default)]
    pub context_docs: ContextDocsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret for the stateless endpoints. When unset every request is rejected.
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BiConfig {
    #[serde(default)]
    pub default_instance: Option<String>,
    #[serde(default)]
    pub instances: BTreeMap<String, BiInstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiInstanceConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_row_limit")]
    pub row_limit: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextDocsConfig {
    #[serde(default)]
    pub files: Vec<ContextFile>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFile {
    pub uri: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_provider() -> String {
    "vertex".to_string()
}
fn default_model() -> String {
    "gemini-1.5-flash-001".to_string()
}
fn default_max_output_tokens() -> u32 {
    2500
}
fn default_temperature() -> f32 {
    0.4
}
fn default_region() -> String {
    "us-central1".to_string()
}
fn default_row_limit() -> u32 {
    200
}
fn default_mime_type() -> String {
    "application/pdf".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            api_key: None,
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            project: None,
            region: default_region(),
        }
    }
}

impl AppConfig {
    /// Reads the TOML file (defaults when it does not exist) and applies
    /// environment overrides on top.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let parsed: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            parsed
        } else {
            info!("No {} found, using defaults.", path.display());
            AppConfig::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(secret) =
            non_empty("DASHSUM_CLIENT_SECRET").or_else(|| non_empty("GENAI_CLIENT_SECRET"))
        {
            self.auth.client_secret = Some(secret);
        }
        if let Some(key) = non_empty("DASHSUM_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(host) = non_empty("DASHSUM_HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("DASHSUM_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("dashsum")
                .join("metadata.db")
        })
    }

    /// Copy safe to print: every secret replaced by a mask.
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        mask(&mut copy.auth.client_secret);
        mask(&mut copy.llm.api_key);
        mask(&mut copy.context_docs.access_token);
        for instance in copy.bi.instances.values_mut() {
            instance.client_secret = mask_str(&instance.client_secret);
        }
        copy
    }
}

fn mask(value: &mut Option<String>) {
    if let Some(v) = value.as_mut() {
        *v = mask_str(v);
    }
}

fn mask_str(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}
