//! How a probe reaches a host.
//!
//! Probes only ever talk to a [`Transport`]. [`TcpTransport`] opens real
//! connections; [`MockTransport`] answers from a table, which lets the whole
//! scanner run without a network.
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::time;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Opens a connection, giving up after `timeout`.
    async fn connect(&self, socket: SocketAddrV4, timeout: Duration) -> io::Result<Self::Stream>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    /// Performs the connection to the socket with timeout
    async fn connect(&self, socket: SocketAddrV4, timeout: Duration) -> io::Result<TcpStream> {
        time::timeout(timeout, async move { TcpStream::connect(socket).await }).await?
    }
}

/// How a [`MockTransport`] reacts to a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Accepts, reads the request and answers with these bytes.
    Respond(Vec<u8>),
    /// Accepts, reads the request and hangs up without answering.
    Silent,
    Refuse,
    Unreachable,
    /// Fails as if the process ran out of file descriptors.
    Exhausted,
}

/// In-memory transport that records every connection attempt.
#[derive(Debug, Clone)]
pub struct MockTransport {
    behaviors: Arc<Mutex<HashMap<SocketAddrV4, Vec<MockBehavior>>>>,
    fallback: MockBehavior,
    delay: Duration,
    attempts: Arc<Mutex<Vec<SocketAddrV4>>>,
    connecting: Arc<AtomicUsize>,
    peak_connecting: Arc<AtomicUsize>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            behaviors: Arc::default(),
            fallback: MockBehavior::Refuse,
            delay: Duration::ZERO,
            attempts: Arc::default(),
            connecting: Arc::default(),
            peak_connecting: Arc::default(),
        }
    }
}

impl MockTransport {
    /// Everything not configured refuses the connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reaction for sockets without an explicit entry.
    #[must_use]
    pub fn with_fallback(mut self, fallback: MockBehavior) -> Self {
        self.fallback = fallback;
        self
    }

    /// Every connection attempt takes this long before it resolves.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the reaction for one socket.
    #[must_use]
    pub fn on(self, socket: SocketAddrV4, behavior: MockBehavior) -> Self {
        self.then(socket, behavior)
    }

    /// Queues a reaction for one socket; queued reactions are used in order
    /// and the last one sticks.
    #[must_use]
    pub fn then(self, socket: SocketAddrV4, behavior: MockBehavior) -> Self {
        self.behaviors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(socket)
            .or_default()
            .push(behavior);
        self
    }

    /// Sockets connected to so far, in call order.
    pub fn attempts(&self) -> Vec<SocketAddrV4> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of connection attempts that were pending at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_connecting.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, socket: SocketAddrV4) -> MockBehavior {
        let mut behaviors = self.behaviors.lock().unwrap_or_else(PoisonError::into_inner);
        match behaviors.get_mut(&socket) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue.first().cloned().unwrap_or_else(|| self.fallback.clone()),
            None => self.fallback.clone(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Stream = DuplexStream;

    async fn connect(&self, socket: SocketAddrV4, timeout: Duration) -> io::Result<DuplexStream> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(socket);

        let now = self.connecting.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_connecting.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            time::sleep(self.delay.min(timeout)).await;
        }
        self.connecting.fetch_sub(1, Ordering::SeqCst);

        let reply = match self.behavior_for(socket) {
            MockBehavior::Respond(reply) => reply,
            MockBehavior::Silent => Vec::new(),
            MockBehavior::Refuse => return Err(io::ErrorKind::ConnectionRefused.into()),
            MockBehavior::Unreachable => return Err(io::ErrorKind::HostUnreachable.into()),
            MockBehavior::Exhausted => return Err(io::Error::other("Too many open files (os error 24)")),
        };

        let (client, mut server) = io::duplex(4096);
        tokio::spawn(async move {
            let mut request = [0u8; 512];
            if server.read(&mut request).await.is_err() {
                return;
            }
            if reply.is_empty() {
                return;
            }
            if let Err(e) = server.write_all(&reply).await {
                debug!("Mock server write error {e}");
                return;
            }
            // hold the connection open until the client hangs up
            let _ = server.read(&mut request).await;
        });

        Ok(client)
    }
}
