use anyhow::{Context, Result, anyhow};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::config::{AppConfig, DEFAULT_CONFIG_FILE};
use crate::core::lifecycle::LifecycleManager;
use crate::core::llm::registry::ProviderRegistry;
use crate::core::orchestrator::Orchestrator;
use crate::core::terminal::{self, GuideSection, print_error};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::{LogFormat, init_logging};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Commands")
        .command("serve", "Start the summarization API and streaming socket")
        .command("check-config", "Print the resolved configuration (secrets masked)")
        .command("help", "Show this message")
        .print();

    GuideSection::new("Options")
        .text("--config <path>          Configuration file (default: dashsum.toml)")
        .text("--host <host>            Bind address (serve only)")
        .text("--port <port>            Bind port (serve only)")
        .text("--log-format json|pretty Log output format (serve only, default: json)")
        .blank()
        .hint("dashsum serve --config /etc/dashsum.toml", "")
        .hint("DASHSUM_CLIENT_SECRET=... dashsum serve --port 8080", "")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("dashsum").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandFlags {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_format: Option<String>,
}

pub(crate) fn parse_command_flags(args: &[String], start: usize) -> Result<CommandFlags> {
    let mut flags = CommandFlags::default();
    let mut i = start;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "--config" | "-c" => {
                flags.config = Some(PathBuf::from(value.ok_or_else(|| anyhow!("--config needs a path"))?));
                i += 2;
            }
            "--host" => {
                flags.host = Some(value.ok_or_else(|| anyhow!("--host needs a value"))?);
                i += 2;
            }
            "--port" | "-p" => {
                let raw = value.ok_or_else(|| anyhow!("--port needs a value"))?;
                flags.port = Some(
                    raw.parse()
                        .with_context(|| format!("invalid port '{}'", raw))?,
                );
                i += 2;
            }
            "--log-format" => {
                flags.log_format = Some(value.ok_or_else(|| anyhow!("--log-format needs a value"))?);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(flags)
}

async fn run_serve(flags: CommandFlags) -> Result<()> {
    let format: LogFormat = flags
        .log_format
        .as_deref()
        .unwrap_or("json")
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    let log_tx = init_logging(format);

    let mut config = AppConfig::load(flags.config.as_deref()).await?;
    if let Some(host) = flags.host {
        config.server.host = host;
    }
    if let Some(port) = flags.port {
        config.server.port = port;
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&config).await?);
    let server = Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        orchestrator,
        client_secret: config.auth.client_secret.clone(),
        allowed_origins: config.server.allowed_origins.clone(),
        log_tx,
        host: config.server.host.clone(),
        port: config.server.port,
    })));

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(server.clone());
    lifecycle.start().await?;

    let addr = server
        .lock()
        .await
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    GuideSection::new("dashsum")
        .status("API", &format!("http://{}", addr))
        .status("Socket", &format!("ws://{}/ws", addr))
        .status("Logs", &format!("http://{}/logs", addr))
        .blank()
        .text("Press Ctrl+C to stop.")
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    terminal::print_goodbye();
    Ok(())
}

async fn check_config(flags: CommandFlags) -> Result<()> {
    let config = AppConfig::load(flags.config.as_deref()).await?;
    let source = flags
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    terminal::print_info(&format!("Configuration resolved from {}", source.display()));

    let rendered = toml::to_string_pretty(&config.masked()).context("rendering configuration")?;
    println!("\n{}", rendered);

    let registry = ProviderRegistry::load()?;
    match registry.get_provider(&config.llm.provider) {
        Some(def) => terminal::print_status("LLM provider", &format!("{} ({})", def.name, config.llm.model)),
        None => print_error(&format!("Unknown LLM provider '{}'", config.llm.provider)),
    }
    terminal::print_status(
        "BI instances",
        &config.bi.instances.keys().cloned().collect::<Vec<_>>().join(", "),
    );
    terminal::print_link(
        "Listen address",
        &format!("http://{}:{}", config.server.host, config.server.port),
    );
    terminal::print_status("Metadata cache", &config.cache_path().display().to_string());

    if config.auth.client_secret.as_deref().unwrap_or_default().is_empty() {
        terminal::print_warn("No client secret set: stateless endpoints will reject every request.");
    } else {
        terminal::print_success("Configuration looks usable.");
    }
    Ok(())
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1) else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "serve" => run_serve(parse_command_flags(&args, 2)?).await,
        "check-config" => check_config(parse_command_flags(&args, 2)?).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command: {}", other));
            print_help();
            Ok(())
        }
    }
}
