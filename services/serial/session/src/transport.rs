//! Transport seam and a TCP byte-stream transport.
//!
//! A transport opens a link to an address and reports everything that happens
//! on it through a [`TransportListener`]. Opening never blocks: the link is
//! established in the background and confirmed through `on_connect`.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SerialError;

/// Callback surface a transport drives. May be invoked from any context.
pub trait TransportListener: Send + Sync {
    /// Link established
    fn on_connect(&self);
    /// Connection attempt failed
    fn on_connect_error(&self, error: SerialError);
    /// Chunk of received bytes
    fn on_read(&self, data: Bytes);
    /// Read or write failure
    fn on_io_error(&self, error: SerialError);
}

/// Live link owned by the session
pub trait TransportHandle: Send + Sync {
    /// Human-readable peer name
    fn name(&self) -> &str;
    /// Queue bytes for sending. Failures arrive through `on_io_error`.
    fn write(&self, data: Bytes);
    /// Tear the link down. No callbacks fire afterwards. Idempotent.
    fn disconnect(&self);
}

/// Factory for links
pub trait Transport: Send + Sync {
    /// Begin connecting to `address`. Errors here mean the link could not even
    /// be constructed.
    fn connect(
        &self,
        address: &str,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Box<dyn TransportHandle>, SerialError>;
}

/// Read buffer size for TCP links
const READ_BUFFER_BYTES: usize = 4 * 1024;

/// Serial link over a TCP stream, for serial-over-network bridges
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a TCP transport
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TcpTransport {
    fn connect(
        &self,
        address: &str,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Box<dyn TransportHandle>, SerialError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| SerialError::TransportOpen(format!("invalid address {}: {}", address, e)))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SerialError::TransportOpen(format!("no runtime: {}", e)))?;

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(run_link(addr, listener.clone(), write_rx));

        debug!("Opened TCP link task for {}", addr);
        Ok(Box::new(TcpHandle {
            name: address.to_string(),
            write_tx,
            listener,
            task,
        }))
    }
}

/// Handle to a running TCP link task
struct TcpHandle {
    name: String,
    write_tx: mpsc::UnboundedSender<Bytes>,
    listener: Arc<dyn TransportListener>,
    task: JoinHandle<()>,
}

impl TransportHandle for TcpHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self, data: Bytes) {
        if self.write_tx.send(data).is_err() {
            self.listener
                .on_io_error(SerialError::Io("link closed".to_string()));
        }
    }

    fn disconnect(&self) {
        if !self.task.is_finished() {
            self.task.abort();
            debug!("Aborted TCP link task for {}", self.name);
        }
    }
}

impl Drop for TcpHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_link(
    addr: SocketAddr,
    listener: Arc<dyn TransportListener>,
    mut write_rx: mpsc::UnboundedReceiver<Bytes>,
) {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", addr, e);
            listener.on_connect_error(SerialError::Connect(e.to_string()));
            return;
        }
    };
    info!("TCP link established to {}", addr);
    listener.on_connect();

    let (mut reader, mut writer) = stream.into_split();
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_BYTES);

    loop {
        tokio::select! {
            read = reader.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => {
                        info!("Peer {} closed the link", addr);
                        listener.on_io_error(SerialError::Io("connection closed by peer".to_string()));
                        break;
                    }
                    Ok(n) => {
                        debug!("Read {} bytes from {}", n, addr);
                        listener.on_read(buffer.split().freeze());
                        buffer.reserve(READ_BUFFER_BYTES);
                    }
                    Err(e) => {
                        warn!("Read error from {}: {}", addr, e);
                        listener.on_io_error(e.into());
                        break;
                    }
                }
            }

            Some(data) = write_rx.recv() => {
                if let Err(e) = writer.write_all(&data).await {
                    warn!("Write error to {}: {}", addr, e);
                    listener.on_io_error(e.into());
                    break;
                }
                debug!("Wrote {} bytes to {}", data.len(), addr);
            }
        }
    }
}
