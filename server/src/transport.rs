//! TCP transport: listener, per-connection reader and writer tasks
//!
//! Each accepted socket is split in two. A reader task owns the read half and
//! is the only code that ever reads from it, so at most one receive is
//! outstanding per connection and bytes are decoded strictly in order. A
//! writer task owns the write half and drains an unbounded queue, which makes
//! [`ConnectionHandle::send`] non-blocking from any thread.

use crate::error::TransportError;
use log::{debug, error, info, trace, warn};
use protocol::{FrameDecoder, Reply};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinSet;

/// Size of the scratch buffer used for every receive
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

/// Identifier of one accepted connection, unique for the server's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Messages consumed by the writer task
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Vec<u8>),
    Close,
}

#[derive(Debug, Default)]
struct ConnectionState {
    closed: AtomicBool,
    close: Notify,
}

/// Cheap, cloneable reference to a live connection
///
/// The transport owns the socket; the slot registry and the server only hold
/// handles, which can queue replies and request a close.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Arc<ConnectionState>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        peer: SocketAddr,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            peer,
            outbound,
            state: Arc::new(ConnectionState::default()),
        };
        (handle, outbound_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a framed reply; completion or failure is reported by the writer
    pub fn send(&self, reply: Reply) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.id));
        }
        trace!("[{}] -> {}", self.id, reply);
        self.outbound
            .send(Outbound::Frame(reply.encode()))
            .map_err(|_| TransportError::Closed(self.id))
    }

    /// Closes the connection after already queued replies are flushed
    ///
    /// Returns false if the connection was already closing.
    pub fn shutdown(&self) -> bool {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!("[{}] Closing connection to {}", self.id, self.peer);
        let _ = self.outbound.send(Outbound::Close);
        // notify_one leaves a permit if the reader is not currently waiting
        self.state.close.notify_one();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

/// Why a reader task stopped
#[derive(Debug)]
pub enum Disconnect {
    /// The peer closed its side
    Eof,
    /// [`ConnectionHandle::shutdown`] was called
    Closed,
    /// The whole server is stopping
    ServerShutdown,
    IdleTimeout,
    Failed(TransportError),
}

/// Callbacks from connection tasks into the server
pub(crate) trait ConnectionEvents: Send + Sync + 'static {
    fn on_message(&self, connection: &ConnectionHandle, message: String);

    fn on_disconnect(&self, connection: &ConnectionHandle, reason: Disconnect);
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadSettings {
    pub idle_timeout: Option<Duration>,
    pub max_message_len: usize,
}

/// Binds a listening socket with an explicit backlog
pub(crate) async fn listen(addr: &str, backlog: u32) -> Result<TcpListener, TransportError> {
    let bind_err = |source| TransportError::Bind {
        addr: addr.to_string(),
        source,
    };

    let resolved = lookup_host(addr)
        .await
        .map_err(bind_err)?
        .next()
        .ok_or_else(|| {
            bind_err(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "address did not resolve",
            ))
        })?;

    let socket = if resolved.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;

    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(resolved).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)
}

/// Accepts connections until shutdown, then waits for every connection task
///
/// The next `accept` is armed as soon as a connection has been handed to its
/// own task, so slow clients never hold up new ones.
pub(crate) async fn accept_loop<E: ConnectionEvents>(
    listener: TcpListener,
    events: Arc<E>,
    settings: ReadSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let next_id = AtomicU64::new(1);
    let mut connections = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = ConnectionId(next_id.fetch_add(1, Ordering::Relaxed));
                    info!("[{}] Accepted connection from {}", id, peer);
                    connections.spawn(serve_connection(
                        stream,
                        id,
                        peer,
                        Arc::clone(&events),
                        settings,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!("{}", TransportError::Accept(e));
                    // Back off briefly so a persistent error does not spin
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    error!("Connection task panicked: {}", e);
                }
            }
        }
    }

    drop(listener);
    info!("Listener closed, waiting for {} connections", connections.len());
    while connections.join_next().await.is_some() {}
}

async fn serve_connection<E: ConnectionEvents>(
    stream: TcpStream,
    id: ConnectionId,
    peer: SocketAddr,
    events: Arc<E>,
    settings: ReadSettings,
    shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("[{}] Failed to set TCP_NODELAY: {}", id, e);
    }

    let (handle, outbound_rx) = ConnectionHandle::new(id, peer);
    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_loop(writer, outbound_rx, handle.clone()));

    let reason = read_loop(reader, &handle, shutdown, settings, |message| {
        events.on_message(&handle, message)
    })
    .await;

    events.on_disconnect(&handle, reason);
    handle.shutdown();

    if let Err(e) = writer_task.await {
        error!("[{}] Writer task panicked: {}", id, e);
    }
    debug!("[{}] Connection task finished", id);
}

/// Reads, frames and forwards messages until the connection ends
pub(crate) async fn read_loop<R, F>(
    mut reader: R,
    handle: &ConnectionHandle,
    mut shutdown: watch::Receiver<bool>,
    settings: ReadSettings,
    mut on_message: F,
) -> Disconnect
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut decoder = FrameDecoder::new(settings.max_message_len);
    let mut scratch = [0u8; RECEIVE_BUFFER_SIZE];

    loop {
        if handle.is_closed() {
            return Disconnect::Closed;
        }
        if *shutdown.borrow() {
            return Disconnect::ServerShutdown;
        }

        let read = tokio::select! {
            _ = handle.state.close.notified() => return Disconnect::Closed,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Disconnect::ServerShutdown;
                }
                continue;
            }
            read = read_some(&mut reader, &mut scratch, settings.idle_timeout) => read,
        };

        match read {
            None => return Disconnect::IdleTimeout,
            Some(Ok(0)) => return Disconnect::Eof,
            Some(Ok(n)) => {
                trace!("[{}] Received {} bytes", handle.id, n);
                match decoder.push(&scratch[..n]) {
                    Ok(messages) => {
                        for message in messages {
                            // A message in this batch may have closed us
                            if handle.is_closed() {
                                return Disconnect::Closed;
                            }
                            on_message(message);
                        }
                    }
                    Err(source) => {
                        return Disconnect::Failed(TransportError::Frame {
                            id: handle.id,
                            source,
                        })
                    }
                }
            }
            Some(Err(source)) => {
                return Disconnect::Failed(TransportError::Receive {
                    id: handle.id,
                    source,
                })
            }
        }
    }
}

/// One receive, bounded by the idle timeout. `None` means the timeout fired.
async fn read_some<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Option<std::io::Result<usize>>
where
    R: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, reader.read(buf)).await.ok(),
        None => Some(reader.read(buf).await),
    }
}

/// Writes queued frames in order until closed or a write fails
pub(crate) async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    handle: ConnectionHandle,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Frame(bytes) => {
                if let Err(source) = writer.write_all(&bytes).await {
                    error!(
                        "{}",
                        TransportError::Send {
                            id: handle.id,
                            source
                        }
                    );
                    handle.shutdown();
                    return;
                }
            }
            Outbound::Close => break,
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("[{}] Shutdown of write half failed: {}", handle.id, e);
    }
}
