//! Server Lifecycle
//!
//! One listening socket, one accepted connection. Accepting and reading run
//! on their own threads and hand results over `mpsc` channels, so every wait
//! here is a bounded blocking receive.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use proxy_protocol::{read_frame, FrameError, IncomingMessage, TargetBuildParameters};
use tracing::{debug, error, trace, warn};

use crate::error::ProxyError;

/// How long `stop` waits for the wake-up connection.
const WAKE_TIMEOUT: Duration = Duration::from_millis(250);

/// The startup line the launching peer reads from stdout.
pub fn announcement(address: SocketAddr) -> String {
    format!(
        "Gradle target server hostAddress: {} port: {}",
        address.ip(),
        address.port()
    )
}

type Incoming = Result<IncomingMessage, FrameError>;

pub struct TargetServer {
    address: SocketAddr,
    stopped: Arc<AtomicBool>,
    connections: Receiver<TcpStream>,
    accept_thread: Option<JoinHandle<()>>,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    incoming: Option<Receiver<Incoming>>,
    reader_thread: Option<JoinHandle<()>>,
}

impl TargetServer {
    /// Bind and start accepting. Returns once the socket is listening.
    pub fn start(ip: IpAddr, port: u16) -> Result<Self, ProxyError> {
        let requested = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(requested).map_err(|source| ProxyError::Bind {
            address: requested,
            source,
        })?;
        let address = listener.local_addr().map_err(|source| ProxyError::Bind {
            address: requested,
            source,
        })?;
        debug!(%address, "listening");

        let stopped = Arc::new(AtomicBool::new(false));
        let (tx, connections) = mpsc::channel();
        let accept_thread = {
            let stopped = Arc::clone(&stopped);
            thread::Builder::new()
                .name("proxy-accept".to_string())
                .spawn(move || accept_one(listener, tx, stopped))?
        };

        Ok(Self {
            address,
            stopped,
            connections,
            accept_thread: Some(accept_thread),
            stream: None,
            peer: None,
            incoming: None,
            reader_thread: None,
        })
    }

    /// The bound address, with the actual port when `0` was requested.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait for the single peer connection.
    pub fn await_connection(&mut self, timeout: Duration) -> Result<SocketAddr, ProxyError> {
        if let Some(peer) = self.peer {
            return Ok(peer);
        }

        let stream = match self.connections.recv_timeout(timeout) {
            Ok(stream) => stream,
            Err(RecvTimeoutError::Timeout) => self
                .connections
                .try_recv()
                .map_err(|_| ProxyError::ConnectionTimeout(timeout))?,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ProxyError::ConnectionTimeout(timeout))
            }
        };

        let peer = stream.peer_addr()?;
        let reader = stream.try_clone()?;
        let (tx, incoming) = mpsc::channel();
        let reader_thread = thread::Builder::new()
            .name("proxy-reader".to_string())
            .spawn(move || read_incoming(reader, tx))?;

        debug!(%peer, "peer connected");
        self.stream = Some(stream);
        self.peer = Some(peer);
        self.incoming = Some(incoming);
        self.reader_thread = Some(reader_thread);
        Ok(peer)
    }

    /// A second handle on the accepted connection for writing messages.
    pub fn writer(&self) -> Result<TcpStream, ProxyError> {
        let stream = self.stream.as_ref().ok_or(ProxyError::NotConnected)?;
        Ok(stream.try_clone()?)
    }

    /// Wait for the peer's build parameters. Other messages are skipped.
    pub fn await_build_parameters(
        &mut self,
        timeout: Duration,
    ) -> Result<TargetBuildParameters, ProxyError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.next_incoming(deadline, || ProxyError::ParametersTimeout(timeout))? {
                IncomingMessage::BuildParameters(params) => return Ok(params),
                IncomingMessage::ResultAck => {
                    warn!("ignoring result acknowledgment received before build parameters")
                }
            }
        }
    }

    /// Wait for the peer to acknowledge the terminal message.
    pub fn await_result_ack(&mut self, timeout: Duration) -> Result<(), ProxyError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.next_incoming(deadline, || ProxyError::AckTimeout(timeout))? {
                IncomingMessage::ResultAck => {
                    debug!("result acknowledged");
                    return Ok(());
                }
                IncomingMessage::BuildParameters(_) => {
                    warn!("ignoring build parameters received after the build started")
                }
            }
        }
    }

    fn next_incoming<F>(&self, deadline: Instant, timed_out: F) -> Result<IncomingMessage, ProxyError>
    where
        F: Fn() -> ProxyError,
    {
        let incoming = self.incoming.as_ref().ok_or(ProxyError::NotConnected)?;
        let remaining = deadline.saturating_duration_since(Instant::now());

        let received = match incoming.recv_timeout(remaining) {
            Ok(received) => received,
            Err(RecvTimeoutError::Timeout) => match incoming.try_recv() {
                Ok(received) => received,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return Err(timed_out())
                }
            },
            Err(RecvTimeoutError::Disconnected) => {
                debug!("peer closed the connection");
                return Err(timed_out());
            }
        };

        received.map_err(ProxyError::InvalidFrame)
    }

    /// Close the connection and the listening socket. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }

        if let Some(handle) = self.accept_thread.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                match TcpStream::connect_timeout(&wake_address(self.address), WAKE_TIMEOUT) {
                    Ok(_) => {
                        let _ = handle.join();
                    }
                    Err(e) => warn!(error = %e, "could not wake the accept thread"),
                }
            }
        }
        debug!(address = %self.address, "server stopped");
    }
}

impl Drop for TargetServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TargetServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetServer")
            .field("address", &self.address)
            .field("peer", &self.peer)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Accept exactly one connection, then drop the listener.
fn accept_one(listener: TcpListener, tx: Sender<TcpStream>, stopped: Arc<AtomicBool>) {
    match listener.accept() {
        Ok((stream, peer)) => {
            if stopped.load(Ordering::SeqCst) {
                trace!(%peer, "accept woken by stop");
                return;
            }
            if tx.send(stream).is_err() {
                debug!(%peer, "connection arrived after the server gave up waiting");
            }
        }
        Err(e) => {
            if !stopped.load(Ordering::SeqCst) {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}

/// Decode frames until the peer closes, errors, or nobody is listening.
fn read_incoming(mut stream: TcpStream, tx: Sender<Incoming>) {
    loop {
        match read_frame::<_, IncomingMessage>(&mut stream) {
            Ok(Some(message)) => {
                trace!(?message, "received message");
                if tx.send(Ok(message)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(FrameError::Io(e)) if is_disconnect(&e) => return,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// An address that reaches `bound`, replacing an unspecified IP with loopback.
fn wake_address(bound: SocketAddr) -> SocketAddr {
    let ip = match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, bound.port())
}
