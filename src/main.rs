use std::net::SocketAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use vodstream::{AllowAll, RelayConfig, RelayServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "vodstream")]
#[command(about = "Live broadcast ingest and relay node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a stream ingest node that accepts every publisher
    #[command(alias = "streamingester")]
    Ingest {
        /// Address to accept publishers and viewers on
        #[arg(long, env = "VODSTREAM_BIND", default_value = "0.0.0.0:1935")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vodstream=info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Ingest { bind } => {
            let relay_config = RelayConfig::default();
            relay_config.validate()?;

            // No user store is wired in here: every publisher is accepted and publish
            // keys are ignored. Use `UserPublishAuthorizer` from the library to check them.
            let server =
                RelayServer::with_relay_config(ServerConfig::with_addr(bind), AllowAll, relay_config);
            info!("Starting ingest node on {} (publish keys not checked)", bind);

            server
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for shutdown signal");
                        std::future::pending::<()>().await;
                    }
                })
                .await?;

            info!("Ingest node stopped");
        }
    }

    Ok(())
}
