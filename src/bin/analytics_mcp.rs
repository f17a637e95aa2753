//! Analytics MCP server binary.
//!
//! # Commands
//!
//! - `serve` - Start the MCP HTTP server
//! - `tools` - List the registered tools

use std::path::PathBuf;
use std::sync::Arc;

use analytics_mcp::{
    config::Config,
    server::{self, AppState},
    tools::{builtin, ToolRegistry},
    transport::TcpTransport,
    VERSION,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "analytics-mcp")]
#[command(version = VERSION)]
#[command(about = "Analytics MCP server - Model Context Protocol over HTTP", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/analytics-mcp/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP HTTP server (default)
    Serve(ServeArgs),

    /// List registered tools and their input schemas
    Tools {
        /// Print the full `tools/list` JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Default)]
struct ServeArgs {
    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Session idle timeout in milliseconds
    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    /// Tool call timeout in milliseconds
    #[arg(long)]
    call_timeout_ms: Option<u64>,

    /// Reject requests without `Authorization: Bearer`
    #[arg(long)]
    require_bearer: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Tools { json }) => cmd_tools(json),
        Some(Commands::Serve(args)) => cmd_serve(config, args),
        None => cmd_serve(config, ServeArgs::default()),
    }
}

fn build_registry() -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    builtin::register_builtin_tools(&mut registry)?;
    Ok(registry)
}

fn cmd_tools(json: bool) -> anyhow::Result<()> {
    let registry = build_registry()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&registry.list_result())?);
        return Ok(());
    }

    println!("{:<28} DESCRIPTION", "NAME");
    println!("{}", "-".repeat(72));
    for tool in registry.list() {
        println!("{:<28} {}", tool.name(), tool.description());
    }
    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn cmd_serve(mut config: Config, args: ServeArgs) -> anyhow::Result<()> {
    // CLI flags win over file and environment
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ms) = args.idle_timeout_ms {
        config.server.idle_timeout_ms = ms;
    }
    if let Some(ms) = args.call_timeout_ms {
        config.server.call_timeout_ms = ms;
    }
    if args.require_bearer {
        config.server.require_bearer = true;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    if args.log_json {
        config.logging.json = true;
    }

    init_logging(&config.logging.level, config.logging.json);

    let server_config = config.server_config()?;
    let registry = build_registry()?;
    let transport = TcpTransport::new(server_config.addr);

    tracing::info!(
        version = VERSION,
        call_timeout_ms = server_config.call_timeout.as_millis() as u64,
        idle_timeout_ms = server_config.idle_timeout.as_millis() as u64,
        require_bearer = server_config.require_bearer,
        "Configured"
    );

    let state = Arc::new(AppState::new(server_config, registry));
    let shutdown = CancellationToken::new();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                wait_for_signal().await;
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
        });

        server::run(state, &transport, shutdown, None).await?;
        tracing::info!("Server stopped");
        Ok::<_, anyhow::Error>(())
    })
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
