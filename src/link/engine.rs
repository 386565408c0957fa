//! The link engine's single-threaded event loop (§4.5), grounded on
//! `original_source/linkfd.c`'s `lfd_linker`: the `select()`-based loop
//! that shuttles frames between the local device and the remote peer
//! through the transform stack, interleaved with keep-alive and
//! statistics housekeeping.
//!
//! Per REDESIGN FLAGS, the original's signal-driven alarm
//! (`sig_alarm`/`sig_usr1`) is rendered as a `tokio::select!` branch
//! racing a computed sleep deadline against the two I/O halves, rather
//! than an actual OS signal.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::config::host::HostProfile;
use crate::core::constants::MAX_FRAME;
use crate::core::error::EngineError;
use crate::framing::datagram::DatagramCodec;
use crate::framing::{stream, ControlFrame, ReadFrame};
use crate::link::stats::{flush_row, StatsCounters};
use crate::link::timer::HousekeepingTimer;
use crate::transform::TransformStack;

/// Why the link engine's event loop exited. Fatal I/O or transform
/// errors are instead returned as `Err(EngineError)` from
/// [`LinkEngine::run`] — idiomatic Rust has no need for a dedicated
/// `Error` variant alongside `Result`'s own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The local device reached EOF, or an external cancellation signal
    /// fired: an orderly shutdown, not a fault.
    Graceful,
    /// The remote peer closed the connection or sent `ConnClose`.
    PeerClosed,
    /// `keepalive_maxfail` consecutive probe intervals elapsed with no
    /// ingress traffic at all.
    NetworkTimeout,
}

/// The remote transport half of a session: either a connected TCP
/// stream (`Transport::Stream`) or a datagram socket
/// (`Transport::Datagram`), dispatching to the matching framing codec.
///
/// The stream variant carries a [`BufReader`] rather than a bare
/// `TcpStream` so the handshake's buffered reader — which may already
/// hold bytes the peer pipelined immediately after `FLAGS`/`CACK` — can
/// be handed straight to the engine with nothing lost.
pub enum RemoteChannel {
    /// Length-prefixed framing over a connected byte stream.
    Stream(BufReader<TcpStream>),
    /// Single-syscall framing over a datagram socket.
    Datagram(DatagramCodec),
}

impl RemoteChannel {
    /// Build a connected datagram channel, for callers that already know
    /// the peer address (the client role; the server role instead relies
    /// on [`DatagramCodec`]'s late-connect for NAT traversal).
    pub async fn connect_datagram(peer: SocketAddr) -> std::io::Result<Self> {
        let local_addr: SocketAddr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse().unwrap();
        let socket = tokio::net::UdpSocket::bind(local_addr).await?;
        socket.connect(peer).await?;
        Ok(Self::Datagram(DatagramCodec::new(socket, true)))
    }

    async fn read_frame(&mut self) -> Result<ReadFrame, EngineError> {
        match self {
            RemoteChannel::Stream(s) => Ok(stream::read_frame(s).await?),
            RemoteChannel::Datagram(d) => Ok(d.read_frame().await?),
        }
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        match self {
            RemoteChannel::Stream(s) => stream::write_frame(s, payload).await?,
            RemoteChannel::Datagram(d) => {
                d.write_frame(payload).await?;
            }
        }
        Ok(())
    }

    async fn write_control(&mut self, control: ControlFrame) -> Result<(), EngineError> {
        match self {
            RemoteChannel::Stream(s) => stream::write_control(s, control).await?,
            RemoteChannel::Datagram(d) => {
                d.write_control(control).await?;
            }
        }
        Ok(())
    }
}

/// Drives one session's data path to completion: installs the transform
/// stack, then loops shuttling frames between `local` and `remote` until
/// a [`Termination`] condition or a fatal error.
pub struct LinkEngine<L> {
    remote: RemoteChannel,
    local: L,
    stack: TransformStack,
    stats: std::sync::Arc<StatsCounters>,
    stats_file: Option<tokio::fs::File>,
    host: HostProfile,
    cancel: oneshot::Receiver<()>,
}

impl<L> LinkEngine<L>
where
    L: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Assemble the engine. `stats_file`, when set, receives one
    /// `linkfd.c`-style row per `stat_interval` tick.
    pub fn new(
        remote: RemoteChannel,
        local: L,
        stack: TransformStack,
        stats: std::sync::Arc<StatsCounters>,
        stats_file: Option<tokio::fs::File>,
        host: HostProfile,
        cancel: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            remote,
            local,
            stack,
            stats,
            stats_file,
            host,
            cancel,
        }
    }

    /// Run the event loop to completion.
    ///
    /// On return, the local device is handed back only if the host is
    /// flagged `persist_keep_interface` (§4.5's "keep the interface
    /// across a persistent reconnect" rule); otherwise it is dropped
    /// here, closing it.
    pub async fn run(mut self) -> Result<(Termination, Option<L>), EngineError> {
        self.stack.init()?;

        let mut timer = HousekeepingTimer::new(self.host.keepalive_interval, self.host.stat_interval);
        let mut ka_idle: u32 = 0;
        let mut local_buf = vec![0u8; MAX_FRAME];

        // The original always sends an initial echo-request unless
        // NAT-traversal late-connect is in play, where probing before the
        // peer's address is known would be a no-op anyway.
        if !self.host.nat_hack {
            let _ = self.remote.write_control(ControlFrame::EchoRequest).await;
        }

        let termination = loop {
            tokio::select! {
                biased;

                _ = &mut self.cancel => break Termination::Graceful,

                _ = tokio::time::sleep(timer.next_deadline()) => {
                    let tick = timer.tick();
                    if tick.stats_due {
                        if let Some(file) = self.stats_file.as_mut() {
                            let epoch_secs = std::time::SystemTime::now()
                                .duration_since(std::time::UNIX_EPOCH)
                                .map(|d| d.as_secs())
                                .unwrap_or(0);
                            let _ = flush_row(file, &self.stats, epoch_secs).await;
                        }
                    }
                    if tick.keepalive_due {
                        ka_idle += 1;
                        if ka_idle > self.host.keepalive_maxfail {
                            break Termination::NetworkTimeout;
                        }
                        let _ = self.remote.write_control(ControlFrame::EchoRequest).await;
                    }
                }

                frame = self.remote.read_frame(), if self.stack.avail_decode() => {
                    match frame? {
                        ReadFrame::Eof => break Termination::PeerClosed,
                        ReadFrame::Control(ControlFrame::ConnClose) => break Termination::PeerClosed,
                        ReadFrame::Control(ControlFrame::EchoRequest) => {
                            ka_idle = 0;
                            let _ = self.remote.write_control(ControlFrame::EchoReply).await;
                        }
                        ReadFrame::Control(ControlFrame::EchoReply) => {
                            ka_idle = 0;
                        }
                        ReadFrame::Control(ControlFrame::BadFrame) => {
                            tracing::debug!(host = %self.host.name, "dropped malformed ingress frame");
                        }
                        ReadFrame::Data(payload) => {
                            ka_idle = 0;
                            self.stats.add_wire_bytes_in(payload.len() as u64);
                            if let Some(plain) = self.stack.decode(&payload)? {
                                self.stats.add_bytes_out(plain.len() as u64);
                                self.local.write_all(&plain).await?;
                            }
                        }
                    }
                }

                n = self.local.read(&mut local_buf), if self.stack.avail_encode() => {
                    let n = n?;
                    if n == 0 {
                        break Termination::Graceful;
                    }
                    self.stats.add_bytes_in(n as u64);
                    if let Some(wire) = self.stack.encode(&local_buf[..n])? {
                        self.stats.add_wire_bytes_out(wire.len() as u64);
                        self.remote.write_frame(&wire).await?;
                    }
                }
            }
        };

        let _ = self.remote.write_control(ControlFrame::ConnClose).await;
        self.stack.teardown();

        let local_to_return = if self.host.persist_keep_interface { Some(self.local) } else { None };
        Ok((termination, local_to_return))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::flags::{InterfaceKind, Transport};
    use std::sync::Arc;
    use tokio::io::duplex;

    fn test_host() -> HostProfile {
        HostProfile::builder("peer")
            .passphrase("correct horse battery staple")
            .transport(Transport::Stream)
            .interface(InterfaceKind::Tun)
            .keepalive_interval(std::time::Duration::from_millis(20))
            .keepalive_maxfail(2)
            .stat_interval(std::time::Duration::from_secs(3600))
            .build()
            .unwrap()
    }

    /// A connected loopback `TcpStream` pair, standing in for the
    /// already-handshaken remote link a real session would have.
    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept, connect) = tokio::join!(listener.accept(), connect);
        (accept.unwrap().0, connect.unwrap())
    }

    #[tokio::test]
    async fn local_eof_terminates_gracefully() {
        let (engine_side, _peer_side) = tcp_pair().await;
        let (local_a, local_b) = duplex(4096);
        drop(local_b); // local device is already closed

        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let engine = LinkEngine::new(
            RemoteChannel::Stream(BufReader::new(engine_side)),
            local_a,
            TransformStack::new(vec![]),
            StatsCounters::new(),
            None,
            test_host(),
            cancel_rx,
        );
        let (termination, local_back) = engine.run().await.unwrap();
        assert_eq!(termination, Termination::Graceful);
        assert!(local_back.is_none());
    }

    #[tokio::test]
    async fn frames_flow_from_local_to_remote_and_back() {
        let (engine_side, mut peer_side) = tcp_pair().await;
        let (local_a, mut local_b) = duplex(4096);

        let host = test_host();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let engine = LinkEngine::new(
            RemoteChannel::Stream(BufReader::new(engine_side)),
            local_a,
            TransformStack::new(vec![]),
            StatsCounters::new(),
            None,
            host,
            cancel_rx,
        );
        let run_handle = tokio::spawn(engine.run());

        local_b.write_all(b"payload").await.unwrap();
        match stream::read_frame(&mut peer_side).await.unwrap() {
            ReadFrame::Data(payload) => assert_eq!(payload, b"payload"),
            other => panic!("expected data frame, got {other:?}"),
        }

        stream::write_frame(&mut peer_side, b"reply").await.unwrap();
        let mut buf = [0u8; 5];
        local_b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"reply");

        cancel_tx.send(()).unwrap();
        let (termination, _local_back) = run_handle.await.unwrap().unwrap();
        assert_eq!(termination, Termination::Graceful);
    }
}
