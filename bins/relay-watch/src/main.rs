mod client;
mod config;
mod error;
mod sse;
mod watch;

use clap::Parser;
use config::{Cli, Commands};

use crate::client::RelayClient;
use crate::error::WatchError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), WatchError> {
    let client = RelayClient::new(&cli.server)?;
    let watching = async {
        match cli.command {
            Commands::Poll(args) => watch::poll(&client, args).await,
            Commands::LongPoll(args) => watch::long_poll(&client, args).await,
            Commands::Stream(args) => watch::stream(&client, args).await,
        }
    };

    tokio::select! {
        result = watching => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupted");
            Ok(())
        }
    }
}
