//! Dedicated writer task for non-blocking sends.
//!
//! Each connected socket owns one writer task that receives records via an
//! unbounded mpsc channel. Queuing never waits, so `send` can be called
//! from any thread, including while the session lock is held.
//!
//! # Architecture
//!
//! ```text
//! send()           ─┐
//! send()           ─┼─► mpsc::UnboundedSender<Outbound> ─► Writer Task ─► socket
//! send_and_close() ─┘
//! ```
//!
//! Records that are already queued when the task wakes up are written
//! together with a single `write_vectored` call where the kernel allows.
//! Any write failure ends the task and runs its exit hook, which closes the
//! socket.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CellwireError, Result};

/// Maximum records to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// An item queued for the writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Bytes to write.
    Data(Bytes),
    /// Flush everything queued before this marker, then shut the socket down.
    Close,
}

/// Handle for queuing data on the writer task.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WriterHandle {
    /// Queue bytes for sending. Never blocks.
    ///
    /// Fails only when the writer task has already exited.
    pub fn send(&self, data: Bytes) -> Result<()> {
        self.tx
            .send(Outbound::Data(data))
            .map_err(|_| CellwireError::ConnectionClosed)
    }

    /// Queue bytes followed by a close marker.
    pub fn send_and_close(&self, data: Bytes) -> Result<()> {
        self.send(data)?;
        self.tx
            .send(Outbound::Close)
            .map_err(|_| CellwireError::ConnectionClosed)
    }

    /// Whether the writer task is gone.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for queuing data.
///
/// `on_exit` runs exactly once when the task stops, whether because the
/// channel was closed, a close marker was reached, or a write failed.
pub fn spawn_writer_task<W, F>(writer: W, on_exit: F) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer).await;
        if let Err(e) = &result {
            tracing::debug!("Writer stopped after send failure: {}", e);
        }
        on_exit();
        result
    });

    (WriterHandle { tx }, task)
}

/// Main writer loop - receives records and writes them to the socket.
async fn writer_loop<W>(mut rx: mpsc::UnboundedReceiver<Outbound>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(item) => item,
            None => {
                // Every handle dropped, clean shutdown
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        let mut close_after = false;

        match first {
            Outbound::Data(data) => batch.push(data),
            Outbound::Close => close_after = true,
        }

        while !close_after && batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(Outbound::Data(data)) => batch.push(data),
                Ok(Outbound::Close) => close_after = true,
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;

        if close_after {
            writer.shutdown().await?;
            return Ok(());
        }
    }
}

/// Write a batch of records using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(CellwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for data in batch {
        let end = offset + data.len();
        if skip_bytes < end && !data.is_empty() {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&data[start..]));
        }
        offset = end;
    }

    slices
}
