//! TCP socket handle with callback-driven completions.
//!
//! A [`SocketState`] wraps one TCP connection together with its receive
//! buffer, its error flag and the single callback that is told about every
//! completion on it.
//!
//! - [`connect_to_server`] resolves, connects and hands back a handle once
//! - [`SocketState::receive`] arranges exactly one callback per call
//! - [`SocketState::send`] queues data and never blocks
//!
//! Every failure (resolution, refused connect, timeout, mid-stream error,
//! peer hang-up) is reported the same way: the handle's error flag is set
//! and the callback fires with it. Failures are terminal for the handle.
//!
//! # Example
//!
//! ```ignore
//! use cellwire_client::transport::{connect_to_server, network_action, SocketConfig};
//!
//! connect_to_server(
//!     network_action(|state| {
//!         if state.has_error() {
//!             eprintln!("connect failed: {:?}", state.error_message());
//!             return;
//!         }
//!         state.send("alice\n");
//!         let _ = state.receive();
//!     }),
//!     "localhost",
//!     1100,
//!     &SocketConfig::default(),
//! );
//! ```

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{CellwireError, Result};
use crate::protocol::LineBuffer;
use crate::writer::{spawn_writer_task, WriterHandle};

/// Default time allowed for resolving and connecting.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default size of a single socket read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Error message used when an operation meets a closed socket.
const SOCKET_CLOSED: &str = "Socket closed";

/// Error message used when the peer ends the stream.
const PEER_CLOSED: &str = "Connection closed by peer";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Callback invoked on every completion for a socket.
pub type NetworkAction = Arc<dyn Fn(SocketState) + Send + Sync>;

/// Wrap a closure as a [`NetworkAction`].
pub fn network_action<F>(action: F) -> NetworkAction
where
    F: Fn(SocketState) + Send + Sync + 'static,
{
    Arc::new(action)
}

/// Process-unique identity of a socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Socket tuning shared by connecting and accepting.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Upper bound for resolve + connect.
    pub connect_timeout: Duration,
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

/// Handle to one connection (or to one failed attempt at making one).
///
/// Cheap to clone; all clones refer to the same socket.
#[derive(Clone)]
pub struct SocketState {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    runtime: Option<Handle>,
    read_chunk_size: usize,
    /// Read half; `None` once closed or for failed handles.
    reader: tokio::sync::Mutex<Option<OwnedReadHalf>>,
    /// Writer task handle; taken on close.
    writer: Mutex<Option<WriterHandle>>,
    /// Received-but-unprocessed text.
    data: Mutex<LineBuffer>,
    on_network_action: Mutex<NetworkAction>,
    /// First error wins.
    error: Mutex<Option<String>>,
    closed: watch::Sender<bool>,
    receiving: AtomicBool,
    /// Held while the callback runs so invocations never overlap.
    dispatch_gate: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SocketState {
    /// Wrap a connected stream. Must run inside a tokio runtime.
    pub(crate) fn from_stream(
        stream: TcpStream,
        action: NetworkAction,
        config: &SocketConfig,
    ) -> Self {
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let (writer, _task) = spawn_writer_task(write_half, move || {
                if let Some(inner) = weak.upgrade() {
                    SocketState { inner }.close();
                }
            });

            Inner {
                id: ConnectionId::next(),
                peer,
                runtime: Some(Handle::current()),
                read_chunk_size: config.read_chunk_size.max(1),
                reader: tokio::sync::Mutex::new(Some(read_half)),
                writer: Mutex::new(Some(writer)),
                data: Mutex::new(LineBuffer::new()),
                on_network_action: Mutex::new(action),
                error: Mutex::new(None),
                closed,
                receiving: AtomicBool::new(false),
                dispatch_gate: Mutex::new(()),
            }
        });

        Self { inner }
    }

    /// Build an error-flagged handle that owns no socket.
    pub(crate) fn failed(action: NetworkAction, message: impl Into<String>) -> Self {
        let (closed, _) = watch::channel(true);

        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                peer: None,
                runtime: Handle::try_current().ok(),
                read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
                reader: tokio::sync::Mutex::new(None),
                writer: Mutex::new(None),
                data: Mutex::new(LineBuffer::new()),
                on_network_action: Mutex::new(action),
                error: Mutex::new(Some(message.into())),
                closed,
                receiving: AtomicBool::new(false),
                dispatch_gate: Mutex::new(()),
            }),
        }
    }

    /// Identity of this handle.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Remote address, if connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Whether an error has been recorded on this handle.
    pub fn has_error(&self) -> bool {
        lock(&self.inner.error).is_some()
    }

    /// The recorded error message, if any.
    pub fn error_message(&self) -> Option<String> {
        lock(&self.inner.error).clone()
    }

    /// Whether the socket is still open.
    pub fn is_connected(&self) -> bool {
        !*self.inner.closed.borrow() && lock(&self.inner.writer).is_some()
    }

    /// Replace the callback used for future completions.
    pub fn set_on_network_action(&self, action: NetworkAction) {
        *lock(&self.inner.on_network_action) = action;
    }

    /// Run `f` with exclusive access to the receive buffer.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut LineBuffer) -> R) -> R {
        f(&mut lock(&self.inner.data))
    }

    /// Remove and return every complete record in the receive buffer.
    pub fn extract_frames(&self) -> Vec<String> {
        self.with_data(LineBuffer::extract_frames)
    }

    /// Arrange for the callback to run once more data arrives or the socket fails.
    ///
    /// Received bytes are appended to the buffer before the callback runs.
    /// There is no timeout.
    ///
    /// # Errors
    ///
    /// Returns `ReceiveInFlight` if the previous receive has not completed.
    /// Returns `NoRuntime` for a handle created outside a runtime.
    pub fn receive(&self) -> Result<()> {
        let runtime = self.inner.runtime.clone().ok_or(CellwireError::NoRuntime)?;

        if self.inner.receiving.swap(true, Ordering::AcqRel) {
            return Err(CellwireError::ReceiveInFlight);
        }

        let state = self.clone();
        runtime.spawn(async move {
            match state.read_chunk().await {
                Ok(bytes) => state.with_data(|data| data.append(&bytes)),
                Err(reason) => state.fail(reason),
            }
            state.inner.receiving.store(false, Ordering::Release);
            state.dispatch();
        });

        Ok(())
    }

    /// Queue `data` for sending.
    ///
    /// Returns whether the send was started; `false` if the socket is
    /// already closed. A failure while writing closes the socket; a pending
    /// receive then reports the error.
    pub fn send(&self, data: &str) -> bool {
        self.queue(data, false)
    }

    /// Like [`send`](Self::send), then close the socket once written.
    pub fn send_and_close(&self, data: &str) -> bool {
        self.queue(data, true)
    }

    fn queue(&self, data: &str, close_after: bool) -> bool {
        if *self.inner.closed.borrow() {
            return false;
        }

        let Some(writer) = lock(&self.inner.writer).clone() else {
            return false;
        };

        let payload = Bytes::copy_from_slice(data.as_bytes());
        let queued = if close_after {
            writer.send_and_close(payload)
        } else {
            writer.send(payload)
        };

        match queued {
            Ok(()) => true,
            Err(_) => {
                self.close();
                false
            }
        }
    }

    /// Close the socket. Idempotent.
    ///
    /// Queued data is still flushed by the writer; a pending receive
    /// completes with an error.
    pub fn close(&self) {
        self.inner.closed.send_replace(true);
        lock(&self.inner.writer).take();
        if let Ok(mut reader) = self.inner.reader.try_lock() {
            reader.take();
        }
    }

    /// Record `reason` (unless an error is already set) and close.
    fn fail(&self, reason: String) {
        {
            let mut error = lock(&self.inner.error);
            if error.is_none() {
                *error = Some(reason);
            }
        }
        self.close();
    }

    /// Invoke the callback with this handle.
    pub(crate) fn dispatch(&self) {
        let _gate = lock(&self.inner.dispatch_gate);
        let action = lock(&self.inner.on_network_action).clone();
        action(self.clone());
    }

    async fn read_chunk(&self) -> std::result::Result<Vec<u8>, String> {
        if let Some(message) = self.error_message() {
            return Err(message);
        }

        let mut closed = self.inner.closed.subscribe();
        let mut guard = self.inner.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(SOCKET_CLOSED.to_string());
        };

        let mut buf = vec![0u8; self.inner.read_chunk_size];
        let read = tokio::select! {
            result = reader.read(&mut buf) => Some(result),
            _ = closed.wait_for(|closed| *closed) => None,
        };

        match read {
            Some(Ok(0)) => {
                guard.take();
                Err(PEER_CLOSED.to_string())
            }
            Some(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Some(Err(e)) => {
                guard.take();
                Err(e.to_string())
            }
            None => {
                guard.take();
                Err(SOCKET_CLOSED.to_string())
            }
        }
    }
}

impl fmt::Debug for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketState")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("error", &self.error_message())
            .field("closed", &*self.inner.closed.borrow())
            .finish()
    }
}

/// Connect to `host:port` on a spawned task.
///
/// `action` is invoked exactly once: with a connected handle, or with an
/// error-flagged handle if resolution fails, the connect is refused, or the
/// attempt outlives `config.connect_timeout`.
///
/// Must be called from within a tokio runtime.
pub fn connect_to_server(
    action: NetworkAction,
    host: &str,
    port: u16,
    config: &SocketConfig,
) -> JoinHandle<()> {
    let host = host.to_owned();
    let config = config.clone();

    tokio::spawn(async move {
        let attempt = tokio::time::timeout(config.connect_timeout, open_stream(&host, port)).await;

        let state = match attempt {
            Ok(Ok(stream)) => SocketState::from_stream(stream, action, &config),
            Ok(Err(e)) => {
                tracing::debug!(host = %host, port, "Connect failed: {}", e);
                SocketState::failed(action, e.to_string())
            }
            Err(_) => {
                tracing::debug!(host = %host, port, "Connect timed out");
                SocketState::failed(action, CellwireError::ConnectTimeout.to_string())
            }
        };

        state.dispatch();
    })
}

async fn open_stream(host: &str, port: u16) -> Result<TcpStream> {
    let address = resolve(host, port).await?;
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Resolve to the first IPv4 address; fall back to parsing `host` literally.
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    match tokio::net::lookup_host((host, port)).await {
        Ok(addresses) => first_ipv4(host, addresses),
        Err(e) => parse_literal(host, port, &e),
    }
}

fn first_ipv4(host: &str, addresses: impl IntoIterator<Item = SocketAddr>) -> Result<SocketAddr> {
    addresses
        .into_iter()
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| CellwireError::Resolve(format!("no IPv4 address found for {}", host)))
}

/// Used when lookup fails: accept `host` only if it is an IPv4 literal.
fn parse_literal(host: &str, port: u16, lookup_error: &dyn fmt::Display) -> Result<SocketAddr> {
    match host.parse::<IpAddr>() {
        Ok(ip) => first_ipv4(host, [SocketAddr::new(ip, port)]),
        Err(_) => Err(CellwireError::Resolve(format!("{}: {}", host, lookup_error))),
    }
}
