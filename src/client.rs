//! Client builder and the socket-facing driver.
//!
//! The [`ClientBuilder`] configures ports, timeouts and the runtime. The
//! [`SpreadsheetClient`] it builds owns a [`Machine`] and the live socket:
//! 1. Commands run the machine synchronously and fail fast on misuse
//! 2. Socket callbacks forward completions to a driver task
//! 3. The driver feeds them through the same machine
//! 4. Published events land in [`ClientEvents`]
//!
//! # Example
//!
//! ```ignore
//! use cellwire_client::{ClientBuilder, ClientEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client, mut events) = ClientBuilder::new().build()?;
//!     client.connect("localhost", "alice")?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ClientEvent::Connected { spreadsheets } => {
//!                 client.choose_spreadsheet(&spreadsheets[0])?;
//!             }
//!             ClientEvent::IdAssigned { .. } => client.send_edit("A1", "5")?,
//!             ClientEvent::Disconnected { .. } => break,
//!             other => println!("{other:?}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::codec::Command;
use crate::error::{CellwireError, Result};
use crate::protocol::{split_host_port, ClientId, DEFAULT_PORT};
use crate::session::{AttemptId, ClientAction, ClientEvent, ConnectionPhase, Machine};
use crate::transport::{
    connect_to_server, network_action, ConnectionId, SocketConfig, SocketState,
};

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Port used when the address carries none.
    pub port: u16,
    /// Connect timeout and read size.
    pub socket: SocketConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            socket: SocketConfig::default(),
        }
    }
}

/// Builder for configuring and creating a [`SpreadsheetClient`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    runtime: Option<Handle>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default server port.
    ///
    /// Default: 1100
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the time allowed for resolving and connecting.
    ///
    /// Default: 3 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket.connect_timeout = timeout;
        self
    }

    /// Set how many bytes a single socket read asks for.
    ///
    /// Default: 4096
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.socket.read_chunk_size = size.max(1);
        self
    }

    /// Run socket work on `runtime` instead of the ambient one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the client and its event stream.
    ///
    /// # Errors
    ///
    /// Returns `NoRuntime` if no runtime was given and none is current.
    pub fn build(self) -> Result<(SpreadsheetClient, ClientEvents)> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| CellwireError::NoRuntime)?,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (network_tx, network_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                machine: Machine::new(),
                socket: None,
                events: events_tx,
                network: network_tx,
            }),
            config: self.config,
            runtime,
        });

        shared
            .runtime
            .spawn(drive(Arc::downgrade(&shared), network_rx));

        Ok((SpreadsheetClient { shared }, ClientEvents { rx: events_rx }))
    }
}

/// Completions reported by socket callbacks.
enum NetworkEvent {
    Connected {
        attempt: AttemptId,
        state: SocketState,
    },
    Received(SocketState),
}

struct Core {
    machine: Machine,
    /// Socket owned by the current session.
    socket: Option<SocketState>,
    events: mpsc::UnboundedSender<ClientEvent>,
    network: mpsc::UnboundedSender<NetworkEvent>,
}

struct Shared {
    core: Mutex<Core>,
    config: ClientConfig,
    runtime: Handle,
}

fn lock(core: &Mutex<Core>) -> MutexGuard<'_, Core> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Run a command against the machine and carry out what it asks for.
    fn apply(
        &self,
        command: impl FnOnce(&mut Machine) -> Result<Vec<ClientAction>>,
    ) -> Result<()> {
        let _runtime = self.runtime.enter();
        let mut core = lock(&self.core);
        let actions = command(&mut core.machine)?;
        self.execute(&mut core, actions);
        Ok(())
    }

    fn on_network(&self, event: NetworkEvent) {
        let mut core = lock(&self.core);

        let actions = match event {
            NetworkEvent::Connected { attempt, state } => match state.error_message() {
                Some(reason) => core.machine.on_connect_failed(attempt, &reason),
                None => {
                    let actions = core.machine.on_connected(attempt, state.id());
                    if core.machine.connection() == Some(state.id()) {
                        let tx = core.network.clone();
                        state.set_on_network_action(network_action(move |state| {
                            let _ = tx.send(NetworkEvent::Received(state));
                        }));
                        core.socket = Some(state);
                    } else {
                        state.close();
                    }
                    actions
                }
            },
            NetworkEvent::Received(state) => match state.error_message() {
                Some(reason) => core.machine.on_transport_error(state.id(), &reason),
                None => {
                    let machine = &mut core.machine;
                    state.with_data(|buffer| machine.on_received(state.id(), buffer))
                }
            },
        };

        self.execute(&mut core, actions);
    }

    fn execute(&self, core: &mut Core, actions: Vec<ClientAction>) {
        for action in actions {
            match action {
                ClientAction::Connect {
                    attempt,
                    host,
                    port,
                } => {
                    tracing::debug!(attempt, %host, port, "Connecting");
                    let tx = core.network.clone();
                    connect_to_server(
                        network_action(move |state| {
                            let _ = tx.send(NetworkEvent::Connected { attempt, state });
                        }),
                        &host,
                        port,
                        &self.config.socket,
                    );
                }
                ClientAction::Send { connection, data } => match core.socket_for(connection) {
                    Some(socket) if socket.send(&data) => {}
                    _ => tracing::warn!(%connection, "Dropping outbound data for closed socket"),
                },
                ClientAction::Receive { connection } => {
                    if let Some(socket) = core.socket_for(connection) {
                        if let Err(e) = socket.receive() {
                            tracing::warn!(%connection, "Could not issue receive: {}", e);
                        }
                    }
                }
                ClientAction::Close { connection } => {
                    if core.socket_for(connection).is_some() {
                        if let Some(socket) = core.socket.take() {
                            socket.close();
                        }
                    }
                }
                ClientAction::Publish(event) => {
                    tracing::trace!(?event, "Publishing");
                    let _ = core.events.send(event);
                }
            }
        }
    }
}

impl Core {
    fn socket_for(&self, connection: ConnectionId) -> Option<&SocketState> {
        self.socket
            .as_ref()
            .filter(|socket| socket.id() == connection)
    }
}

/// Feed socket completions into the machine until the client is dropped.
async fn drive(shared: Weak<Shared>, mut network: mpsc::UnboundedReceiver<NetworkEvent>) {
    while let Some(event) = network.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.on_network(event);
    }
    tracing::trace!("Client driver stopped");
}

/// Network core of a spreadsheet editor.
///
/// Every command either starts work and returns `Ok`, or is rejected with
/// `InvalidPhase` (or `EmbeddedNewline`) without changing anything.
/// Outcomes arrive as [`ClientEvent`]s. Dropping the client closes its socket.
pub struct SpreadsheetClient {
    shared: Arc<Shared>,
}

impl SpreadsheetClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to `address` (`host` or `host:port`) as `username`.
    ///
    /// Succeeds only from `Disconnected`.
    pub fn connect(&self, address: &str, username: &str) -> Result<()> {
        let (host, port) = split_host_port(address, self.shared.config.port);
        self.shared
            .apply(|machine| machine.connect(host, port, username))
    }

    /// Open `name`; valid only while a spreadsheet choice is pending.
    ///
    /// Names not in the roster are sent as-is.
    pub fn choose_spreadsheet(&self, name: &str) -> Result<()> {
        self.shared
            .apply(|machine| machine.choose_spreadsheet(name))
    }

    /// Request that `cell` hold `contents`.
    pub fn send_edit(&self, cell: &str, contents: &str) -> Result<()> {
        self.send(Command::EditCell {
            cell: cell.to_owned(),
            contents: contents.to_owned(),
        })
    }

    /// Request that `cell` go back to its previous contents.
    pub fn send_revert(&self, cell: &str) -> Result<()> {
        self.send(Command::RevertCell {
            cell: cell.to_owned(),
        })
    }

    /// Tell the server this client selected `cell`.
    pub fn send_select(&self, cell: &str) -> Result<()> {
        self.send(Command::SelectCell {
            cell: cell.to_owned(),
        })
    }

    /// Request that the most recent change be undone.
    pub fn send_undo(&self) -> Result<()> {
        self.send(Command::Undo)
    }

    /// Send any request. Only valid while `Active`.
    pub fn send(&self, command: Command) -> Result<()> {
        self.shared
            .apply(|machine| machine.send_command(&command))
    }

    /// End the session. Publishes `Disconnected("user disconnected")`.
    pub fn disconnect(&self) -> Result<()> {
        self.shared.apply(Machine::disconnect)
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        lock(&self.shared.core).machine.phase()
    }

    /// Id assigned by the server, once `Active`.
    pub fn client_id(&self) -> Option<ClientId> {
        lock(&self.shared.core).machine.client_id()
    }

    /// Username of the current session.
    pub fn username(&self) -> Option<String> {
        lock(&self.shared.core).machine.username().map(str::to_owned)
    }

    /// Spreadsheet chosen for the current session.
    pub fn spreadsheet(&self) -> Option<String> {
        lock(&self.shared.core)
            .machine
            .spreadsheet()
            .map(str::to_owned)
    }

    /// Spreadsheets offered while a choice is pending.
    pub fn spreadsheets(&self) -> Option<Vec<String>> {
        lock(&self.shared.core)
            .machine
            .spreadsheets()
            .map(<[String]>::to_vec)
    }
}

impl Drop for SpreadsheetClient {
    fn drop(&mut self) {
        if let Some(socket) = lock(&self.shared.core).socket.take() {
            socket.close();
        }
    }
}

impl std::fmt::Debug for SpreadsheetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpreadsheetClient")
            .field("phase", &self.phase())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Stream of [`ClientEvent`]s published by a [`SpreadsheetClient`].
#[derive(Debug)]
pub struct ClientEvents {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ClientEvents {
    /// Wait for the next event. `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.rx.try_recv().ok()
    }
}
