//! Connection handling
//!
//! Each accepted socket gets one task running the read/parse/dispatch
//! cycle: read exactly one header, then exactly one body, validate the
//! checksum, hand the message to the assigned protocol, repeat. Reads are
//! bounded by an attempt count and a wall-clock deadline, and raced against
//! the connection's cancellation token.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::service::{Protocol, ProtocolService};
use super::ConnectionSettings;
use crate::protocol::{encode_frame, CodecError, Decoder, Frame, Message};

/// The set of services eligible on one listening port, shared between the
/// server and its connections
pub(crate) type ServiceList = Arc<RwLock<Vec<Arc<dyn ProtocolService>>>>;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("checksum mismatch: header {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("unknown protocol identifier {0:#04x}")]
    UnknownProtocol(u8),

    #[error("read timed out")]
    ReadTimeout,

    #[error("remote closed the stream")]
    RemoteClosed,

    #[error("connection closed")]
    Closed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// A handle for sending frames to a connection and closing it.
///
/// Handles are what protocol instances hold instead of the connection
/// itself: cloneable, and valid to keep across the connection's lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    out_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Identity of the connection this handle belongs to
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an already-encoded frame for the outbound socket
    pub async fn send(&self, frame: Bytes) -> ConnectionResult<()> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        self.out_tx
            .send(frame)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Encode a message and queue the resulting frame
    pub async fn send_message(&self, message: &Message) -> ConnectionResult<()> {
        let frame = encode_frame(message)?;
        self.send(frame).await
    }

    /// Request the connection to close. Any pending read unblocks promptly;
    /// closing an already-closed connection is a no-op.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Process-wide tracking of live connections for bulk close operations.
///
/// Owned by the composition root (through [`ServerRegistry`]) rather than a
/// global, so tests can run isolated instances side by side.
///
/// [`ServerRegistry`]: super::ServerRegistry
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Wrap an accepted socket in a connection and add it to the live set
    pub(crate) async fn create(
        self: &Arc<Self>,
        stream: TcpStream,
        services: ServiceList,
        settings: ConnectionSettings,
    ) -> Connection {
        let connection = Connection::new(stream, services, Arc::clone(self), settings);

        let mut connections = self.connections.write().await;
        connections.insert(connection.id(), connection.handle().clone());

        connection
    }

    /// Remove a connection from the live set; releasing an absent id is
    /// harmless
    pub(crate) async fn release(&self, id: Uuid) {
        self.connections.write().await.remove(&id);
    }

    /// Close every tracked connection, then clear the set
    pub async fn close_all(&self) {
        let mut connections = self.connections.write().await;
        for handle in connections.values() {
            handle.close();
        }
        connections.clear();
    }

    /// Number of live connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One accepted socket plus its parsing state
pub struct Connection {
    id: Uuid,
    reader: OwnedReadHalf,
    read_buf: BytesMut,
    decoder: Decoder,
    cancel: CancellationToken,
    handle: ConnectionHandle,
    service: Option<Arc<dyn ProtocolService>>,
    protocol: Option<Box<dyn Protocol>>,
    received_first_message: bool,
    services: ServiceList,
    registry: Arc<ConnectionRegistry>,
    settings: ConnectionSettings,
}

impl Connection {
    fn new(
        stream: TcpStream,
        services: ServiceList,
        registry: Arc<ConnectionRegistry>,
        settings: ConnectionSettings,
    ) -> Self {
        let id = Uuid::new_v4();
        let (reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(settings.outbound_queue_depth);
        let cancel = CancellationToken::new();

        spawn_writer(id, writer, out_rx, cancel.clone());

        Self {
            id,
            reader,
            read_buf: BytesMut::with_capacity(settings.read_buffer_capacity),
            decoder: Decoder::new(),
            cancel: cancel.clone(),
            handle: ConnectionHandle { id, out_tx, cancel },
            service: None,
            protocol: None,
            received_first_message: false,
            services,
            registry,
            settings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Bind a protocol before the first byte is read. Used by single-socket
    /// servers, where the wire carries no protocol identifier.
    pub fn accept_protocol(&mut self, service: Arc<dyn ProtocolService>) {
        self.protocol = Some(service.make_protocol(self.handle.clone()));
        self.service = Some(service);
    }

    /// Drive the connection until it closes.
    ///
    /// All per-connection errors end here: the connection is closed and
    /// released, nothing escalates to other connections or the server.
    pub async fn run(mut self) {
        if let Some(protocol) = self.protocol.as_mut() {
            protocol.on_connect().await;
        }

        let cancel = self.cancel.clone();
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Connection {} cancelled", self.id);
                    break;
                }
                result = self.next_frame() => match result {
                    Ok(frame) => frame,
                    Err(ConnectionError::RemoteClosed) => {
                        tracing::debug!("Connection {}: remote closed the stream", self.id);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Connection {}: {}", self.id, e);
                        break;
                    }
                },
            };

            if let Err(e) = self.dispatch(frame).await {
                tracing::warn!("Connection {}: {}", self.id, e);
                break;
            }
        }

        self.handle.close();
        self.registry.release(self.id).await;
        tracing::debug!("Connection {} closed", self.id);
    }

    /// Read exactly one frame off the socket.
    ///
    /// The header read and the body read are each bounded by
    /// `max_read_attempts` short reads and by the `read_timeout` deadline;
    /// whichever bound trips first fails the cycle.
    async fn next_frame(&mut self) -> ConnectionResult<Frame> {
        let timeout = self.settings.read_timeout();
        let mut deadline = Instant::now() + timeout;
        let mut attempts: u32 = 0;
        let mut in_body = self.decoder.awaiting_body();

        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(frame);
            }

            if self.decoder.awaiting_body() != in_body {
                in_body = self.decoder.awaiting_body();
                deadline = Instant::now() + timeout;
                attempts = 0;
            }

            attempts += 1;
            if attempts > self.settings.max_read_attempts {
                return Err(ConnectionError::ReadTimeout);
            }

            let read = timeout_at(deadline, self.reader.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| ConnectionError::ReadTimeout)?;

            if read? == 0 {
                return Err(ConnectionError::RemoteClosed);
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> ConnectionResult<()> {
        if !frame.verify_checksum() {
            let actual = frame.message.compute_checksum();
            let enforced = self.service.as_ref().map_or(true, |s| s.is_checksummed());
            if enforced {
                return Err(ConnectionError::ChecksumMismatch {
                    expected: frame.checksum,
                    actual,
                });
            }

            // Checksums are optional for this protocol: drop the frame and
            // resync on the next header
            tracing::warn!("Connection {}: dropping frame with bad checksum", self.id);
            return Ok(());
        }

        let mut message = frame.message;

        if !self.received_first_message {
            self.received_first_message = true;

            if self.protocol.is_none() {
                let identifier = message.get_u8().map_err(CodecError::from)?;
                let service = self
                    .resolve_protocol(identifier)
                    .await
                    .ok_or(ConnectionError::UnknownProtocol(identifier))?;

                tracing::debug!(
                    "Connection {} assigned to protocol \"{}\"",
                    self.id,
                    service.protocol_name()
                );
                self.accept_protocol(service);
            }

            if let Some(protocol) = self.protocol.as_mut() {
                protocol.on_first_message(message).await;
            }
        } else if let Some(protocol) = self.protocol.as_mut() {
            protocol.on_message(message).await;
        }

        Ok(())
    }

    async fn resolve_protocol(&self, identifier: u8) -> Option<Arc<dyn ProtocolService>> {
        let services = self.services.read().await;
        services
            .iter()
            .find(|service| service.protocol_identifier() == identifier)
            .cloned()
    }
}

/// Outbound half: drains the frame queue into the socket until the
/// connection is cancelled or all senders are gone, then sends FIN.
fn spawn_writer(
    id: Uuid,
    mut writer: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = out_rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = writer.write_all(&frame).await {
                            tracing::debug!("Connection {}: outbound write failed: {}", id, e);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let _ = writer.shutdown().await;
    });
}
