//! Minimal in-memory spreadsheet server speaking the client protocol.
//!
//! Cells are stored verbatim (no formula evaluation). Edits, selections and
//! departures are relayed to every client on the same spreadsheet.
//!
//! ```text
//! cargo run --example relay_server -- --port 1100
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use cellwire_client::codec::JsonCodec;
use cellwire_client::protocol::{ClientId, DEFAULT_PORT};
use cellwire_client::transport::{
    network_action, start_listening, ConnectionId, SocketConfig, SocketState,
};
use cellwire_client::{Command, InboundMessage};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay-server")]
#[command(about = "Serve shared spreadsheets to cellwire clients")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Spreadsheets offered to new clients
    #[arg(long, default_values_t = vec!["Sheet1".to_string()])]
    sheet: Vec<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[derive(Default)]
struct Sheet {
    cells: BTreeMap<String, String>,
    /// (cell, previous contents), newest last.
    history: Vec<(String, String)>,
}

impl Sheet {
    fn set(&mut self, cell: &str, contents: String) {
        let previous = self.cells.insert(cell.to_owned(), contents).unwrap_or_default();
        self.history.push((cell.to_owned(), previous));
    }

    fn undo(&mut self) -> Option<(String, String)> {
        let (cell, previous) = self.history.pop()?;
        self.cells.insert(cell.clone(), previous.clone());
        Some((cell, previous))
    }

    fn revert(&mut self, cell: &str) -> Option<String> {
        let index = self.history.iter().rposition(|(name, _)| name == cell)?;
        let (_, previous) = self.history.remove(index);
        self.cells.insert(cell.to_owned(), previous.clone());
        Some(previous)
    }
}

enum Stage {
    Username,
    SpreadsheetName,
    Joined,
}

struct Peer {
    socket: SocketState,
    stage: Stage,
    id: ClientId,
    name: String,
    sheet: String,
}

#[derive(Default)]
struct Relay {
    sheets: HashMap<String, Sheet>,
    peers: HashMap<ConnectionId, Peer>,
    last_id: ClientId,
}

impl Relay {
    fn on_network(&mut self, state: SocketState) {
        let id = state.id();

        if state.has_error() {
            let reason = state.error_message().unwrap_or_default();
            match self.peers.remove(&id) {
                Some(peer) => {
                    tracing::info!(%id, name = %peer.name, %reason, "Client left");
                    if matches!(peer.stage, Stage::Joined) {
                        let message = InboundMessage::ClientLeft { id: peer.id };
                        self.broadcast(&peer.sheet, &message);
                    }
                }
                None => tracing::info!(%reason, "Listener finished"),
            }
            return;
        }

        if !self.peers.contains_key(&id) {
            tracing::info!(%id, peer = ?state.peer_addr(), "Client connected");
            self.peers.insert(
                id,
                Peer {
                    socket: state.clone(),
                    stage: Stage::Username,
                    id: 0,
                    name: String::new(),
                    sheet: String::new(),
                },
            );
        } else {
            for record in state.extract_frames() {
                self.on_record(id, record);
            }
        }

        if self.peers.contains_key(&id) {
            if let Err(e) = state.receive() {
                tracing::warn!(%id, "Could not receive: {}", e);
            }
        }
    }

    fn on_record(&mut self, id: ConnectionId, record: String) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };

        match peer.stage {
            Stage::Username => {
                peer.name = record;
                peer.stage = Stage::SpreadsheetName;

                let mut roster: String = self.sheets.keys().map(|name| format!("{name}\n")).collect();
                roster.push('\n');
                peer.socket.send(&roster);
            }
            Stage::SpreadsheetName => {
                self.last_id += 1;
                peer.id = self.last_id;
                peer.sheet = record;
                peer.stage = Stage::Joined;

                let sheet = self.sheets.entry(peer.sheet.clone()).or_default();
                for (cell, contents) in &sheet.cells {
                    let message = InboundMessage::CellUpdated {
                        cell: cell.clone(),
                        contents: contents.clone(),
                    };
                    if let Ok(line) = JsonCodec::encode_message(&message) {
                        peer.socket.send(&line);
                    }
                }
                peer.socket.send(&format!("{}\n", peer.id));
                tracing::info!(%id, name = %peer.name, sheet = %peer.sheet, client = peer.id, "Client joined");
            }
            Stage::Joined => {
                let Some(command) = JsonCodec::decode_command(&record) else {
                    return;
                };
                let (sheet_name, selector_id, selector_name) =
                    (peer.sheet.clone(), peer.id, peer.name.clone());
                self.on_command(id, &sheet_name, selector_id, selector_name, command);
            }
        }
    }

    fn on_command(
        &mut self,
        id: ConnectionId,
        sheet_name: &str,
        selector_id: ClientId,
        selector_name: String,
        command: Command,
    ) {
        let sheet = self.sheets.entry(sheet_name.to_owned()).or_default();

        let message = match command {
            Command::EditCell { cell, contents } => {
                sheet.set(&cell, contents.clone());
                InboundMessage::CellUpdated { cell, contents }
            }
            Command::RevertCell { cell } => match sheet.revert(&cell) {
                Some(contents) => InboundMessage::CellUpdated { cell, contents },
                None => {
                    return self.reply(
                        id,
                        &InboundMessage::RequestRejected {
                            cell,
                            reason: "nothing to revert".into(),
                        },
                    )
                }
            },
            Command::Undo => match sheet.undo() {
                Some((cell, contents)) => InboundMessage::CellUpdated { cell, contents },
                None => return,
            },
            Command::SelectCell { cell } => InboundMessage::CellSelected {
                cell,
                selector_name,
                selector_id,
            },
        };

        self.broadcast(sheet_name, &message);
    }

    fn reply(&self, id: ConnectionId, message: &InboundMessage) {
        if let (Some(peer), Ok(line)) = (self.peers.get(&id), JsonCodec::encode_message(message)) {
            peer.socket.send(&line);
        }
    }

    fn broadcast(&self, sheet: &str, message: &InboundMessage) {
        let Ok(line) = JsonCodec::encode_message(message) else {
            return;
        };
        for peer in self.peers.values() {
            if matches!(peer.stage, Stage::Joined) && peer.sheet == sheet {
                peer.socket.send(&line);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let relay = Arc::new(Mutex::new(Relay::default()));
    {
        let mut relay = relay.lock().unwrap_or_else(PoisonError::into_inner);
        for name in cli.sheet {
            relay.sheets.entry(name).or_default();
        }
    }

    let handler = Arc::clone(&relay);
    let listener = start_listening(
        network_action(move |state| {
            handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_network(state);
        }),
        cli.port,
        SocketConfig::default(),
    )
    .await?;
    tracing::info!(addr = %listener.local_addr(), "Relay server listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    let message = InboundMessage::FatalServerError {
        reason: "server shutting down".into(),
    };
    if let Ok(line) = JsonCodec::encode_message(&message) {
        let relay = relay.lock().unwrap_or_else(PoisonError::into_inner);
        for peer in relay.peers.values() {
            peer.socket.send_and_close(&line);
        }
    }
    listener.shutdown().await;

    Ok(())
}
