mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabsense")]
#[command(about = "Browser perception and control plane", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (long-running daemon)
    Gateway {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Show gateway status
    Status {
        /// Gateway base url
        #[arg(long, default_value = "http://127.0.0.1:9333")]
        gateway: String,
    },

    /// List connected tabs
    Tabs {
        #[arg(long, default_value = "ws://127.0.0.1:9333/controller")]
        gateway: String,
    },

    /// Search a tab's action candidates
    Query {
        /// Tab id
        tab: u64,
        /// Search text
        search: Option<String>,
        /// Filter by exact role
        #[arg(long)]
        role: Option<String>,
        /// Filter by exact tag
        #[arg(long)]
        tag: Option<String>,
        #[arg(long, default_value = "ws://127.0.0.1:9333/controller")]
        gateway: String,
    },

    /// Submit a command and print its ack
    Act {
        /// Tab id
        tab: u64,
        /// Command JSON, e.g. '{"type":"click","id":"a_0"}'
        command: String,
        #[arg(long, default_value = "ws://127.0.0.1:9333/controller")]
        gateway: String,
    },

    /// Navigate the browser via the remote debugging collaborator
    Navigate {
        url: String,
        #[arg(long, default_value = "ws://127.0.0.1:9333/controller")]
        gateway: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Get a config value by dot-separated key (e.g. policy.domainMode)
    Get { key: String },
    /// Set a config value by dot-separated key
    Set { key: String, value: String },
    /// Reset config to defaults
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Gateway { port, host } => commands::gateway::run(port, host).await,
        Commands::Status { gateway } => commands::controller::status(&gateway).await,
        Commands::Tabs { gateway } => commands::controller::tabs(&gateway).await,
        Commands::Query {
            tab,
            search,
            role,
            tag,
            gateway,
        } => commands::controller::query(&gateway, tab, search.as_deref(), role, tag).await,
        Commands::Act {
            tab,
            command,
            gateway,
        } => commands::controller::act(&gateway, tab, &command).await,
        Commands::Navigate { url, gateway } => {
            commands::controller::navigate(&gateway, &url).await
        }
        Commands::Config { command } => commands::config_cmd::run(command),
    }
}
