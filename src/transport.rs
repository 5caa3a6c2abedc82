// =============================================================================
// transport.rs — pluggable backend + correlated request/response transport
// =============================================================================
//
// Turns an unreliable packet link into a future-based request/response
// protocol:
//   1. Backend / Listener  — pluggable connect/listen seam (TCP default)
//   2. Transport           — accept loop, per-connection workers, send paths
//   3. Dispatch rule       — responses resolve futures, requests go to the
//                            inbound channel, everything else is dropped
// =============================================================================

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::error::NetError;
use crate::future::{FutureRegistry, ResponseFuture};
use crate::packet::{JsonCodec, Packet, RequestId, WireCodec};

pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;
pub const READ_DEADLINE_MS: u64 = 50;
pub const CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Anything that can carry a length-prefixed frame.
pub trait WireStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> WireStream for T {}

/// Pluggable network backend: the transport only needs connect and listen
/// with stream semantics, so a reliable-datagram or QUIC backend slots in
/// behind the same trait.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Listener>, NetError>;
    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> Result<Box<dyn WireStream>, NetError>;
}

#[async_trait]
pub trait Listener: Send {
    async fn accept(&mut self) -> Result<(Box<dyn WireStream>, SocketAddr), NetError>;
    fn local_addr(&self) -> Result<SocketAddr, NetError>;
}

/// Default backend over TCP.
pub struct TcpBackend;

struct TcpWireListener(TcpListener);

#[async_trait]
impl Backend for TcpBackend {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Listener>, NetError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Box::new(TcpWireListener(listener)))
    }

    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> Result<Box<dyn WireStream>, NetError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                NetError::SendFailure(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                ))
            })??;
        Ok(Box::new(stream))
    }
}

#[async_trait]
impl Listener for TcpWireListener {
    async fn accept(&mut self) -> Result<(Box<dyn WireStream>, SocketAddr), NetError> {
        let (stream, peer) = self.0.accept().await?;
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.0.local_addr()?)
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub listen_addr: SocketAddr,
    pub connect_timeout: Duration,
    pub read_deadline: Duration,
    pub request_timeout: Duration,
}

impl TransportConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        TransportConfig {
            listen_addr,
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            read_deadline: Duration::from_millis(READ_DEADLINE_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

/// Correlated request/response transport over a pluggable backend.
///
/// Every send dials the receiver's listen address, so responses arrive on
/// the requester's own accept loop and are matched to their future by
/// request id.
pub struct Transport {
    config: TransportConfig,
    backend: Arc<dyn Backend>,
    codec: Arc<dyn WireCodec>,
    futures: Arc<FutureRegistry>,
    sequence: AtomicU64,
    local_addr: SocketAddr,
    listener: Mutex<Option<Box<dyn Listener>>>,
    inbound_tx: Mutex<Option<mpsc::Sender<Packet>>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Packet>>>,
    disconnect_tx: watch::Sender<bool>,
    disconnect_rx: watch::Receiver<bool>,
    finished_tx: watch::Sender<bool>,
    finished_rx: watch::Receiver<bool>,
}

impl Transport {
    /// Bind the default TCP backend with the default JSON codec.
    pub async fn bind(config: TransportConfig) -> Result<Arc<Self>, NetError> {
        Self::with_backend(config, Arc::new(TcpBackend), Arc::new(JsonCodec)).await
    }

    pub async fn with_backend(
        config: TransportConfig,
        backend: Arc<dyn Backend>,
        codec: Arc<dyn WireCodec>,
    ) -> Result<Arc<Self>, NetError> {
        let listener = backend.listen(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (disconnect_tx, disconnect_rx) = watch::channel(false);
        let (finished_tx, finished_rx) = watch::channel(false);

        Ok(Arc::new(Transport {
            config,
            backend,
            codec,
            futures: FutureRegistry::new(),
            sequence: AtomicU64::new(1),
            local_addr,
            listener: Mutex::new(Some(listener)),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            disconnect_tx,
            disconnect_rx,
            finished_tx,
            finished_rx,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.futures.len()
    }

    /// Send a request packet and return its future, `Pending`. Fails
    /// immediately on an invalid packet; a transmit failure cancels the
    /// future before the error is returned.
    pub async fn send_request(&self, mut packet: Packet) -> Result<Arc<ResponseFuture>, NetError> {
        if !packet.is_valid() {
            return Err(NetError::InvalidPacket("sender, receiver or payload missing"));
        }

        packet.request_id = self.generate_id();
        let actor = match packet.receiver.clone() {
            Some(host) => host,
            None => return Err(NetError::InvalidPacket("receiver missing")),
        };

        let future = self.futures.create(packet.request_id, actor, packet.clone());

        if let Err(err) = self.transmit(&packet).await {
            future.cancel();
            return Err(err);
        }

        Ok(future)
    }

    /// Send a response: stamp the original request id so the requester can
    /// correlate it. No future is created for responses.
    pub async fn send_response(&self, request_id: RequestId, mut packet: Packet) -> Result<(), NetError> {
        packet.request_id = request_id;
        self.transmit(&packet).await
    }

    /// Accept loop. Each connection gets its own worker; a worker's read
    /// errors never reach this loop. Blocks until `stop()` signals or the
    /// listener fails, then acknowledges shutdown.
    pub async fn start(self: Arc<Self>) -> Result<(), NetError> {
        let mut listener = self.listener.lock().take().ok_or(NetError::ChannelClosed)?;
        let mut stop_rx = self.disconnect_rx.clone();

        log::info!("transport listening on {}", self.local_addr);

        let result = loop {
            // A cloned watch receiver has already "seen" the current value,
            // so a stop signaled before this task ran must be read directly.
            if *stop_rx.borrow_and_update() {
                break Ok(());
            }
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::debug!("accepted connection from {}", peer);
                        let transport = Arc::clone(&self);
                        tokio::spawn(async move {
                            transport.handle_connection(stream, peer).await;
                        });
                    }
                    Err(err) => break Err(err),
                },
                _ = stop_rx.changed() => break Ok(()),
            }
        };

        drop(listener);
        let _ = self.finished_tx.send(true);
        result
    }

    /// Signal shutdown and block until the accept loop acknowledges. Must
    /// only be called while `start` is running.
    pub async fn stop(&self) {
        let _ = self.disconnect_tx.send(true);

        let mut finished = self.finished_rx.clone();
        while !*finished.borrow() {
            if finished.changed().await.is_err() {
                break;
            }
        }
        log::info!("transport on {} stopped", self.local_addr);
    }

    /// Release the inbound channel. Only call after `stop()` completed.
    pub fn close(&self) {
        self.inbound_tx.lock().take();
        self.inbound_rx.lock().take();
    }

    /// The inbound *request* stream. Responses never appear here; they are
    /// routed to their future instead. Single consumer: the receiver can be
    /// taken exactly once.
    pub fn packets(&self) -> Option<mpsc::Receiver<Packet>> {
        self.inbound_rx.lock().take()
    }

    /// Fires once when shutdown begins.
    pub fn stopped(&self) -> watch::Receiver<bool> {
        self.disconnect_rx.clone()
    }

    fn generate_id(&self) -> RequestId {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Serialize and write one frame to the receiver's listen address.
    /// Connection per send, like the wire protocol expects; retry policy
    /// belongs to the caller.
    async fn transmit(&self, packet: &Packet) -> Result<(), NetError> {
        let receiver = packet
            .receiver
            .as_ref()
            .ok_or(NetError::InvalidPacket("receiver missing"))?;

        let data = self.codec.serialize(packet)?;
        if data.len() > MAX_FRAME_SIZE {
            return Err(NetError::FrameTooLarge(data.len()));
        }

        let mut stream = self
            .backend
            .connect(receiver.addr, self.config.connect_timeout)
            .await?;

        let mut frame = BytesMut::with_capacity(4 + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
        frame.extend_from_slice(&data);

        stream.write_all(&frame).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Per-connection worker: one frame per iteration under a rolling read
    /// deadline. A timed-out, closed or malformed read ends this worker
    /// only.
    async fn handle_connection(self: Arc<Self>, mut stream: Box<dyn WireStream>, peer: SocketAddr) {
        loop {
            let frame = match tokio::time::timeout(self.config.read_deadline, read_frame(&mut stream)).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(err)) => {
                    log::debug!("connection from {} ended: {}", peer, err);
                    return;
                }
                Err(_) => return, // idle past the deadline
            };

            match self.codec.deserialize(&frame) {
                Ok(packet) => self.dispatch(packet).await,
                Err(err) => {
                    log::debug!("malformed frame from {} dropped: {}", peer, err);
                    return;
                }
            }
        }
    }

    /// Inbound dispatch rule. Responses resolve their future exactly once;
    /// a duplicate response or one racing a cancel is dropped silently.
    /// Valid requests go to the inbound channel; invalid packets are
    /// dropped.
    async fn dispatch(&self, packet: Packet) {
        if packet.is_response {
            match self.futures.get(packet.request_id) {
                Some(future) => {
                    if !future.set_result(packet) {
                        log::warn!("duplicate or late response for request {} dropped", future.request_id());
                    }
                }
                None => {
                    log::debug!("response for unknown request {} dropped", packet.request_id);
                }
            }
        } else if packet.is_valid() {
            let inbound = { self.inbound_tx.lock().clone() };
            if let Some(tx) = inbound {
                if tx.send(packet).await.is_err() {
                    log::debug!("inbound channel closed, request dropped");
                }
            }
        } else {
            log::debug!("invalid inbound packet dropped");
        }
    }
}

async fn read_frame(stream: &mut Box<dyn WireStream>) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the maximum frame size", len),
        ));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
