//! The per-host probe: ask every configured port for a snapshot and look
//! for the Hipcam server banner in the answer.
use super::transport::Transport;
use super::ProbeResult;
use crate::address::Address;
use log::{debug, warn};
use std::net::SocketAddrV4;
use std::time::Duration;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time;

/// HTTP request for `http://user:user@<ip>/tmpfs/snap.jpg`.
pub const REQUEST: &[u8] = b"GET /tmpfs/snap.jpg HTTP/1.1\r\n\
Authorization: Basic dXNlcjp1c2Vy\r\n\
Accept: */*\r\n\r\n";

pub const SIGNATURE: &[u8] = b"Server: Hipcam";

/// Only the first read of at most this many bytes is inspected.
pub const RESPONSE_BUFSIZE: usize = 290;

/// Anything shorter is not an HTTP answer worth looking at.
pub const MIN_RESPONSE: usize = 30;

/// Length of the `HTTP/1.x NNN ...` region skipped before searching.
const STATUS_LINE_SKIP: usize = 16;

const EXHAUSTED_BACKOFF: Duration = Duration::from_secs(1);

/// Whether `reply` is the answer of a Hipcam.
///
/// The first 16 bytes are skipped no matter how long the status line really
/// is, and the rest is searched as raw bytes.
///
/// ```rust
/// # use hipscan::scanner::probe::is_match;
/// let reply = b"HTTP/1.1 200 OK\r\nServer: Hipcam RealServer/V1.0\r\n\r\n";
/// assert!(is_match(reply));
/// assert!(!is_match(b"HTTP/1.1 200 OK\r\nServer: nginx\r\n\r\n"));
/// ```
pub fn is_match(reply: &[u8]) -> bool {
    reply.len() >= MIN_RESPONSE
        && reply[STATUS_LINE_SKIP..]
            .windows(SIGNATURE.len())
            .any(|window| window == SIGNATURE)
}

/// Result of probing a single port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOutcome {
    Matched,
    /// Connected, but the answer was short, foreign or missing.
    NoMatch,
    /// Refused, timed out or otherwise not connectable.
    Closed,
    /// The network says the whole host is gone.
    HostUnreachable,
}

/// Probes hosts on a fixed list of ports and reports matches on a channel.
#[derive(Debug)]
pub struct Prober<T> {
    transport: T,
    ports: Vec<u16>,
    timeout: Duration,
    results: UnboundedSender<ProbeResult>,
}

impl<T: Transport> Prober<T> {
    /// `ports` is given in configuration order; the last one is tried first.
    pub fn new(
        transport: T,
        ports: &[u16],
        timeout: Duration,
        results: UnboundedSender<ProbeResult>,
    ) -> Self {
        Self {
            transport,
            ports: ports.iter().rev().copied().collect(),
            timeout,
            results,
        }
    }

    /// Ports in the order they are tried.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Probes every port of `address`, stopping early when the host is
    /// unreachable. Returns the number of matches reported.
    pub async fn probe(&self, address: Address) -> usize {
        let mut matches = 0;

        for &port in &self.ports {
            match self.probe_port(address.socket(port)).await {
                PortOutcome::Matched => {
                    debug!("Match {address}:{port}");
                    matches += 1;
                    // a closed receiver means nobody is listening anymore
                    let _ = self.results.send(ProbeResult {
                        address,
                        port,
                        matched: true,
                    });
                }
                PortOutcome::HostUnreachable => {
                    debug!("Host {address} unreachable, skipping remaining ports");
                    break;
                }
                PortOutcome::NoMatch | PortOutcome::Closed => {}
            }
        }

        matches
    }

    /// Connects, sends the request and inspects the reply. The connection
    /// is always shut down before returning.
    pub async fn probe_port(&self, socket: SocketAddrV4) -> PortOutcome {
        let mut stream = loop {
            match self.transport.connect(socket, self.timeout).await {
                Ok(stream) => break stream,
                Err(e) if is_resource_exhausted(&e) => {
                    warn!("{e} while connecting to {socket}, retrying in {EXHAUSTED_BACKOFF:?}. Consider lowering --max-concurrency.");
                    time::sleep(EXHAUSTED_BACKOFF).await;
                }
                Err(e) if e.kind() == io::ErrorKind::HostUnreachable => {
                    return PortOutcome::HostUnreachable;
                }
                Err(e) => {
                    debug!("Connect to {socket} failed: {e}");
                    return PortOutcome::Closed;
                }
            }
        };

        let outcome = match self.exchange(&mut stream).await {
            Ok(true) => PortOutcome::Matched,
            Ok(false) => PortOutcome::NoMatch,
            Err(e) => {
                debug!("Exchange with {socket} failed: {e}");
                PortOutcome::NoMatch
            }
        };

        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown stream error {e}");
        }

        outcome
    }

    async fn exchange(&self, stream: &mut T::Stream) -> io::Result<bool> {
        time::timeout(self.timeout, stream.write_all(REQUEST)).await??;

        let mut reply = [0u8; RESPONSE_BUFSIZE];
        let received = time::timeout(self.timeout, stream.read(&mut reply)).await??;

        Ok(is_match(&reply[..received]))
    }
}

/// Running out of sockets is our problem, not the target's.
fn is_resource_exhausted(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        if matches!(
            e.raw_os_error().map(Errno::from_raw),
            Some(Errno::EMFILE | Errno::ENFILE)
        ) {
            return true;
        }
    }
    e.to_string().to_lowercase().contains("too many open files")
}
