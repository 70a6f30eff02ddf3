//! Stream Gateway server.
//!
//! SSE gateway for long-running tool calls with a one-time credential
//! exchange.

use anyhow::Context;
use clap::Parser;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stream_gateway::config::{Args, Config};
use stream_gateway::credentials::source::{
    resolve_secret, EnvSecret, ExchangeSecret, PromptSecret, SecretProvider,
};
use stream_gateway::credentials::{
    CredentialService, LicenseStore, SecretConfig, TokenSettings,
};
use stream_gateway::gateway::Gateway;
use stream_gateway::mcp::handler::ToolDispatcher;
use stream_gateway::metrics::{install_prometheus, Metrics};
use stream_gateway::{http, tools, VERSION};

fn init_logging(config: &Config) {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.log_json {
        builder.json().flatten_event(true).init();
    } else {
        builder.with_ansi(std::io::stderr().is_terminal()).init();
    }
}

fn secret_providers(config: &Config, client: &reqwest::Client) -> Vec<Box<dyn SecretProvider>> {
    let mut providers: Vec<Box<dyn SecretProvider>> = vec![Box::new(EnvSecret {
        var: config.secret_env.clone(),
    })];
    if let (Some(url), Some(license)) = (&config.upstream_url, &config.upstream_license) {
        providers.push(Box::new(ExchangeSecret::new(client.clone(), url, license)));
    }
    if config.secret_prompt {
        providers.push(Box::new(PromptSecret {
            label: "Protected secret".to_string(),
        }));
    }
    providers
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Build configuration from args
    let config: Config = args.into();
    init_logging(&config);
    config.validate()?;

    info!("Stream Gateway v{}", VERSION);
    info!("Listening address: {}", config.bind_addr());

    let metrics = Arc::new(Metrics::default());
    if config.metrics {
        let addr: SocketAddr = format!("{}:{}", config.host, config.metrics_port)
            .parse()
            .context("invalid metrics listen address")?;
        install_prometheus(addr)?;
        info!("Prometheus exporter listening on {}", addr);
    }

    let client = reqwest::Client::builder()
        .user_agent(format!("stream-gateway/{}", VERSION))
        .build()
        .context("failed to build HTTP client")?;

    let licenses = match &config.licenses {
        Some(path) => LicenseStore::load(path).await?,
        None => LicenseStore::new(Vec::new()),
    };

    let secret = resolve_secret(&secret_providers(&config, &client)).await?;

    let credentials = Arc::new(CredentialService::new(
        licenses,
        SecretConfig { secret },
        TokenSettings {
            ttl: config.token_ttl(),
            required_capability: config.required_capability.clone(),
            ..TokenSettings::default()
        },
        metrics.clone(),
    ));

    let mut dispatcher = ToolDispatcher::new();
    tools::register_all_tools(&mut dispatcher, client)?;
    info!("Registered {} tools", dispatcher.tool_count());

    let gateway = Gateway::new(config, dispatcher, credentials, metrics);
    let reaper = gateway.start_background();

    let shutdown_gateway = gateway.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C");
                shutdown_gateway.shutdown().await;
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    http::start_server(gateway.clone()).await?;
    reaper.join().await;
    info!("Stopped");

    Ok(())
}
