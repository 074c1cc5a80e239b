//! capgate MCP server entry point.

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use capgate::builtin::{DataAdapter, FileAdapter};
use capgate_mcp::access::{AccessControl, Policy};
use capgate_mcp::config::{load_config, resolve_workspace_path, ServerConfig, TransportKind};
use capgate_mcp::registry::ProtocolRegistry;
use capgate_mcp::server::{Server, ServerOptions, TransportConfig};

#[derive(Parser)]
#[command(
    name = "capgate-mcp",
    about = "MCP protocol adaptation server: versioned capability adapters over stdio or SSE",
    version
)]
struct Cli {
    /// Configuration file path.
    #[arg(short, long)]
    config: Option<String>,

    /// Access-policy file path.
    #[arg(short, long)]
    policy: Option<String>,

    /// Base directory of the `file` protocol.
    #[arg(short, long)]
    workspace: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one session over stdio (default).
    Serve,

    /// Serve event-stream sessions over HTTP.
    #[cfg(feature = "sse")]
    ServeHttp {
        /// Listen address.
        #[arg(long)]
        addr: Option<String>,
    },

    /// Print registered protocol descriptors as JSON.
    Info,

    /// Load and validate an access-policy file.
    CheckPolicy {
        /// Policy file to check.
        path: String,
    },
}

fn build_registry(config: &ServerConfig, workspace: Option<&str>) -> anyhow::Result<ProtocolRegistry> {
    let base = resolve_workspace_path(workspace, config);
    let mut builder = ProtocolRegistry::builder();
    builder
        .add(Arc::new(FileAdapter::new(base)))?
        .add(Arc::new(DataAdapter::new()))?;
    Ok(builder.build())
}

fn build_access(config: &ServerConfig) -> anyhow::Result<AccessControl> {
    let policy = match &config.policy {
        Some(path) => {
            tracing::info!("Loading access policy from {path}");
            Policy::load(Path::new(path))?
        }
        None => {
            tracing::warn!("No access policy configured; allowing anonymous access");
            Policy::default()
        }
    };
    Ok(AccessControl::new(policy).with_auth_timeout(config.auth_timeout()))
}

async fn serve(config: ServerConfig, transport: TransportConfig, workspace: Option<&str>) -> anyhow::Result<()> {
    let registry = Arc::new(build_registry(&config, workspace)?);
    let access = Arc::new(build_access(&config)?);
    let handle = Server::start_with(transport, registry, access, ServerOptions::from_config(&config)).await?;

    tokio::select! {
        _ = handle.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }
    handle.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(policy) = cli.policy.clone() {
        config.policy = Some(policy);
    }
    if let Some(level) = cli.log_level.clone() {
        config.log_level = level;
    }

    // stdout belongs to the stdio transport
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let command = match cli.command {
        Some(command) => command,
        None => match config.transport {
            TransportKind::Stdio => Commands::Serve,
            #[cfg(feature = "sse")]
            TransportKind::Http => Commands::ServeHttp { addr: None },
            #[cfg(not(feature = "sse"))]
            TransportKind::Http => anyhow::bail!("http transport requires the `sse` feature"),
        },
    };

    match command {
        Commands::Serve => {
            serve(config, TransportConfig::Stdio, cli.workspace.as_deref()).await?;
        }

        #[cfg(feature = "sse")]
        Commands::ServeHttp { addr } => {
            let bind = addr.unwrap_or_else(|| config.bind.clone());
            serve(config, TransportConfig::Http { bind }, cli.workspace.as_deref()).await?;
        }

        Commands::Info => {
            let registry = build_registry(&config, cli.workspace.as_deref())?;
            let info = serde_json::json!({
                "server": capgate_mcp::types::Implementation::server(),
                "protocols": registry.descriptors().collect::<Vec<_>>(),
                "protocol_count": registry.len(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::CheckPolicy { path } => match Policy::load(Path::new(&path)) {
            Ok(policy) => {
                println!("Valid policy: {path}");
                println!("  Anonymous access: {}", policy.allow_anonymous);
                println!("  Credentials: {}", policy.credentials.len());
                println!("  Rules: {}", policy.rules.len());
                println!("  Root grants: {}", policy.roots.len());
                println!("  Rate limited: {}", policy.rate_limit.is_some());
            }
            Err(e) => {
                eprintln!("Invalid policy: {e}");
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
