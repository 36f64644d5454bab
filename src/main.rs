use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use peertty::config::{Command, Config, Settings};
use peertty::handshake;
use peertty::relay_server::RelayServer;
use peertty_core::SessionError;

/// Exit status after Ctrl-C
const INTERRUPTED_EXIT: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.validate();

    let outcome = match &cli.command {
        Some(Command::Relay { port }) => return RelayServer::new(*port).run().await,
        Some(Command::Connect { offer, .. }) => handshake::run_client(&settings, offer).await?,
        Some(Command::Host { .. }) | None => {
            handshake::run_host(&settings, cli.is_one_way()).await?
        }
    };

    match outcome {
        Ok(()) => {
            println!("\r\nSession ended.");
            Ok(())
        }
        Err(SessionError::Interrupted) => {
            eprintln!("\r\nInterrupted.");
            std::process::exit(INTERRUPTED_EXIT);
        }
        Err(e) => Err(e.into()),
    }
}

fn setup_logging(debug: bool) {
    // stdout carries the shared terminal, so logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("peertty=debug,peertty_core=debug")
        } else {
            EnvFilter::new("peertty=warn,peertty_core=warn")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
