use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bridgelease::server::shutdown_on;
use bridgelease::{Config, DhcpServer, Result};

#[derive(Parser)]
#[command(name = "bridgelease")]
#[command(author, version, about = "A minimal DHCP server for private bridge networks", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve DHCP requests until interrupted.
    Run,
    /// Print the effective configuration as JSON.
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting DHCP server with config: {:?}", cli.config);
            let server = match DhcpServer::bind(config) {
                Ok(server) => server,
                Err(bind_error) => {
                    error!("{}", bind_error);
                    return Err(bind_error);
                }
            };

            let shutdown = shutdown_on(tokio::signal::ctrl_c());
            server.run(shutdown).await
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
