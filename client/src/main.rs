use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

mod config;
mod console;
mod forward;
mod supervisor;
mod telemetry;
mod tunnel;
mod words;

#[derive(Parser)]
#[command(name = "vortex")]
#[command(version = "0.1.0")]
#[command(about = "Expose local services through a relay you control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Relay server URL (overrides the configured domain)
    #[arg(short, long)]
    server: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Expose a local HTTP server to the internet
    Http {
        /// Local port to expose
        port: u16,

        /// Static subdomain (e.g. --domain myapp)
        #[arg(short, long)]
        domain: Option<String>,

        /// Custom subdomain (alias for --domain)
        #[arg(long)]
        subdomain: Option<String>,
    },
    /// Run the local console (config editing + live traffic)
    Console,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Http {
            port,
            domain,
            subdomain,
        } => {
            run_http(cli.server, port, domain.or(subdomain)).await?;
        }
        Commands::Console => {
            let state = console::ConsoleState::new();
            tokio::select! {
                res = console::serve(state, telemetry::CONSOLE_PORT) => res?,
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
        }
    }

    Ok(())
}

async fn run_http(server_flag: Option<String>, port: u16, subdomain: Option<String>) -> Result<()> {
    let cfg = config::load();

    let tunnel_domain = cfg
        .tunnel_domain()
        .or_else(|| std::env::var("VORTEX_TUNNEL_DOMAIN").ok());
    let mut server_url = server_flag
        .or_else(|| std::env::var("VORTEX_SERVER_URL").ok())
        .or_else(|| cfg.server_url())
        .unwrap_or_else(|| "ws://localhost:8080".to_string());
    if let Some(rest) = server_url.strip_prefix("http") {
        server_url = format!("ws{}", rest);
    }
    if !server_url.starts_with("ws") {
        server_url = format!("ws://{}", server_url);
    }

    if tunnel_domain.is_none() && !server_url.contains("localhost") {
        anyhow::bail!(
            "no relay domain configured; set one via the console or VORTEX_TUNNEL_DOMAIN"
        );
    }
    let effective_domain = tunnel_domain.unwrap_or_else(|| "localhost".to_string());

    let (endpoint, public_url) = resolve_endpoint(subdomain, &effective_domain)?;

    if !probe_local_port(port).await {
        warn!(
            "nothing is listening on localhost:{}; requests will return 502 until your server is running",
            port
        );
    }

    let auth_token = cfg
        .auth_token
        .clone()
        .or_else(|| std::env::var("VORTEX_AUTH_TOKEN").ok());
    let opts = tunnel::TunnelOptions::new(server_url.clone(), endpoint.clone(), port, auth_token);
    let emitter = telemetry::Emitter::new();

    info!("connecting to {}...", server_url);
    info!("exposing localhost:{} at {}", port, public_url);

    let on_ready = {
        let public_url = public_url.clone();
        let endpoint = endpoint.clone();
        move || {
            info!("tunnel established; forwarding traffic to localhost:{}", port);
            info!("url: {}", public_url);
            info!("(or use X-Vortex-Endpoint: {})", endpoint);
        }
    };

    tokio::select! {
        res = supervisor::run(&opts, &emitter, on_ready) => {
            if let Err(err) = res {
                // One line, non-zero status; the supervisor already retried.
                error!("{}", err);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}

/// Derive the endpoint name and public URL from an explicit subdomain, a
/// dotted hostname, a full URL, or nothing at all (random mnemonic).
fn resolve_endpoint(requested: Option<String>, domain: &str) -> Result<(String, String)> {
    let Some(raw) = requested else {
        let endpoint = words::random_mnemonic_id();
        let public_url = format!("https://{}.{}", endpoint, domain);
        return Ok((endpoint, public_url));
    };

    let mut hostname = raw.trim().to_string();
    if let Some(stripped) = hostname
        .strip_prefix("https://")
        .or_else(|| hostname.strip_prefix("http://"))
    {
        hostname = stripped.split('/').next().unwrap_or(stripped).to_string();
    }

    let (endpoint, public_url) = if hostname.contains('.') {
        let endpoint = hostname
            .split('.')
            .next()
            .unwrap_or(hostname.as_str())
            .to_string();
        (endpoint, format!("https://{}", hostname))
    } else {
        (hostname.clone(), format!("https://{}.{}", hostname, domain))
    };

    if endpoint.is_empty() || endpoint.len() > 63 {
        anyhow::bail!("endpoint must be 1-63 characters");
    }
    Ok((endpoint, public_url))
}

/// Best-effort probe; a silent port only earns the operator a warning.
async fn probe_local_port(port: u16) -> bool {
    tokio::time::timeout(
        Duration::from_millis(500),
        tokio::net::TcpStream::connect(("127.0.0.1", port)),
    )
    .await
    .map(|r| r.is_ok())
    .unwrap_or(false)
}
