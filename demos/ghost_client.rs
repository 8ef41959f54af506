//! Headless client that joins a spreadsheet and keeps editing it.
//!
//! Useful for load testing a server or watching a second editor in action.
//!
//! ```text
//! cargo run --example ghost_client -- localhost:1100 --name ghost --edits 20
//! RUST_LOG=cellwire_client=debug cargo run --example ghost_client
//! ```

use std::time::Duration;

use cellwire_client::{ClientBuilder, ClientEvent};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ghost-client")]
#[command(about = "Join a spreadsheet and edit random cells")]
struct Cli {
    /// Server address, `host` or `host:port`
    #[arg(default_value = "localhost")]
    address: String,

    /// Username sent during the handshake
    #[arg(long, default_value = "ghost")]
    name: String,

    /// Spreadsheet to open (defaults to the first one offered)
    #[arg(long)]
    spreadsheet: Option<String>,

    /// Milliseconds between edits
    #[arg(long, default_value_t = 500)]
    interval: u64,

    /// Number of edits before disconnecting
    #[arg(long, default_value_t = 10)]
    edits: u32,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Walk the grid A1..J10 in a fixed but scattered order.
fn cell_for(step: u32) -> String {
    let scattered = step.wrapping_mul(37) % 100;
    let column = char::from(b'A' + (scattered % 10) as u8);
    format!("{}{}", column, scattered / 10 + 1)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let (client, mut events) = ClientBuilder::new().build()?;
    client.connect(&cli.address, &cli.name)?;

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.interval.max(1)));
    let mut done = 0;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ClientEvent::Connected { spreadsheets } => {
                        let choice = cli
                            .spreadsheet
                            .clone()
                            .or_else(|| spreadsheets.first().cloned())
                            .unwrap_or_else(|| "ghost".to_string());
                        tracing::info!(?spreadsheets, %choice, "Opening spreadsheet");
                        client.choose_spreadsheet(&choice)?;
                    }
                    ClientEvent::IdAssigned { id } => tracing::info!(id, "Joined"),
                    ClientEvent::ConnectionFailed { reason } => {
                        tracing::error!(%reason, "Could not connect");
                        break;
                    }
                    ClientEvent::Disconnected { reason } => {
                        tracing::info!(%reason, "Disconnected");
                        break;
                    }
                    other => tracing::info!(?other, "Server update"),
                }
            }
            _ = ticker.tick(), if client.client_id().is_some() => {
                if done == cli.edits {
                    client.disconnect()?;
                    continue;
                }
                let cell = cell_for(done);
                client.send_select(&cell)?;
                client.send_edit(&cell, &format!("={} + {}", cell_for(done + 1), done))?;
                done += 1;
            }
        }
    }

    Ok(())
}
