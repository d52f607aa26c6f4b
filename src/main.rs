use anyhow::{Context, Result, bail};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stalker_proxy::{
    config::Config,
    models::HttpMethod,
    proxy::{ProxyPipeline, UpstreamIdentity, playlist::playlist_url},
    services::{AuthStore, FileAuthStore, KeepAliveService},
    sources::PortalClient,
    utils::{HttpClientFactory, UrlUtils},
    web::ProxyServer,
};

#[derive(Parser)]
#[command(name = "stalker-proxy")]
#[command(version)]
#[command(about = "Stalker portal client with a local HLS rewriting proxy")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Device MAC address (overrides config file)
    #[arg(short, long)]
    mac: Option<String>,

    /// Portal URL, e.g. http://portal.example/c/ (overrides config file)
    #[arg(short, long)]
    portal: Option<String>,

    /// HTTP method for portal calls: GET or POST (overrides config file)
    #[arg(long)]
    method: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in, start the HLS proxy and keep the session alive until Ctrl-C
    Serve,
    /// List channel genres
    Genres,
    /// List the channels of a genre
    Channels {
        #[arg(short, long, default_value = "*")]
        genre: String,
    },
    /// Search the full channel list by name, title or alias
    Search { query: String },
    /// Short EPG for one channel
    Epg { channel_id: String },
    /// EPG for all channels
    EpgAll {
        /// Period in hours
        #[arg(long, default_value_t = 24)]
        period: u32,
    },
    /// Print the upstream link the portal hands out for a channel command
    Resolve {
        cmd: String,
        /// Timeshift start: unix seconds or RFC 3339
        #[arg(long)]
        at: Option<String>,
    },
    /// Print the proxy URL for a channel command (needs a fixed proxy port)
    StreamUrl {
        cmd: String,
        /// Timeshift start: unix seconds or RFC 3339
        #[arg(long)]
        at: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("stalker_proxy={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(mac) = cli.mac {
        config.portal.mac = mac;
    }
    if let Some(portal) = cli.portal {
        config.portal.url = portal;
    }
    if let Some(method) = cli.method {
        config.portal.method = HttpMethod::parse_lenient(&method);
    }

    match cli.command {
        Command::StreamUrl { cmd, at } => {
            if config.proxy.port == 0 {
                bail!("stream-url needs a fixed proxy.port; the running proxy's port is unknown");
            }
            let origin = format!("http://{}:{}", config.proxy.host, config.proxy.port);
            println!("{}", playlist_url(&origin, &cmd, parse_start(at.as_deref())?));
            Ok(())
        }
        Command::Serve => serve(config).await,
        command => {
            let client = login(&config).await?;
            run_query(&client, command).await
        }
    }
}

async fn login(config: &Config) -> Result<PortalClient> {
    if config.portal.url.trim().is_empty() || config.portal.mac.trim().is_empty() {
        bail!("portal.url and portal.mac must be set (config file, STALKER_PROXY_PORTAL__*, or --portal/--mac)");
    }

    let client = PortalClient::new(config.portal.clone())?;
    client
        .login(&config.portal.mac, &config.portal.url, config.portal.method)
        .await
        .context("portal login failed")?;
    Ok(client)
}

async fn run_query(client: &PortalClient, command: Command) -> Result<()> {
    match command {
        Command::Genres => print_json(&client.get_genres().await),
        Command::Channels { genre } => print_json(&client.get_channels(&genre).await),
        Command::Search { query } => print_json(&client.search_channels(&query).await),
        Command::Epg { channel_id } => print_json(&client.get_short_epg(&channel_id).await),
        Command::EpgAll { period } => print_json(&client.get_all_epg(period).await),
        Command::Resolve { cmd, at } => {
            let url = client.get_stream(&cmd, parse_start(at.as_deref())?).await?;
            println!("{url}");
            Ok(())
        }
        Command::Serve | Command::StreamUrl { .. } => Ok(()),
    }
}

async fn serve(config: Config) -> Result<()> {
    let client = Arc::new(login(&config).await?);

    let file_store = FileAuthStore::new(&config.storage.auth_file);
    if let Some(record) = client.auth_record().await {
        file_store.save(&record).await?;
        info!("Auth record saved to {}", file_store.path().display());
    }
    let auth_store: Arc<dyn AuthStore> = Arc::new(file_store);

    let pipeline = ProxyPipeline::new(
        client.clone(),
        auth_store,
        UpstreamIdentity::from(&config.portal),
        config.proxy.clone(),
        &HttpClientFactory::default(),
    )?;
    let server = ProxyServer::new(Arc::new(pipeline));
    let port = server.start().await?;
    info!(
        "Proxy ready on http://{}:{} for portal {} ({})",
        config.proxy.host,
        port,
        config.portal.url,
        UrlUtils::obfuscate_mac(&config.portal.mac)
    );

    let keep_alive = KeepAliveService::new(client, config.portal.keep_alive_interval).start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Received Ctrl-C, shutting down");

    keep_alive.stop().await;
    server.stop().await;
    Ok(())
}

/// Unix seconds or an RFC 3339 timestamp
fn parse_start(value: Option<&str>) -> Result<Option<i64>> {
    let Some(value) = value.map(str::trim) else {
        return Ok(None);
    };
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(Some(seconds));
    }
    let parsed = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid start time '{value}'"))?;
    Ok(Some(parsed.timestamp()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
