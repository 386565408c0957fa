//! Server-role session supervisor (§4.6), grounded on
//! `original_source/main.c`'s accept loop and `tunnel.c`'s per-connection
//! `fork()`, and on the teacher's `server/server.rs` builder/config shape.
//!
//! Per REDESIGN FLAGS ("prefer a task per session within one process"),
//! each accepted connection is driven by a spawned `tokio` task rather
//! than a forked child; the per-host single-connection lock moves from
//! `lock.h`'s filesystem advisory lock to the in-process
//! [`crate::supervisor::lock::HostLockTable`] this task shares with every
//! other session in the process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::config::flags::Transport;
use crate::config::host::HostProfile;
use crate::core::error::{EngineError, HandshakeError};
use crate::crypto::handshake::{run_server, HostLookup};
use crate::link::engine::{LinkEngine, RemoteChannel, Termination};
use crate::link::stats::StatsCounters;
use crate::supervisor::lock::HostLockTable;
use crate::transform::{CompressionTransform, ShaperTransform, TransformStack};

/// Errors terminating a single accepted server session. Never propagated
/// past the session's own task: [`run_server_loop`] logs and moves on to
/// the next connection, matching a forking server's isolation between
/// children.
#[derive(Debug, Error)]
pub enum ServerSessionError {
    /// The handshake was rejected or failed verification.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The link engine hit a fatal error.
    #[error("link engine failed: {0}")]
    Engine(#[from] EngineError),

    /// Opening the local device, or the UDP data socket for a
    /// datagram-transport session, failed.
    #[error("local resource error: {0}")]
    LocalResource(#[source] std::io::Error),
}

fn build_stack(host: &HostProfile, session_key: crate::crypto::keys::SessionKey) -> TransformStack {
    let mut stages: Vec<Box<dyn crate::core::traits::Transform>> = Vec::new();
    if let Some(compression) = host.flags.compression {
        stages.push(Box::new(CompressionTransform::new(compression)));
    }
    stages.push(Box::new(crate::crypto::aead::AeadTransform::new(session_key)));
    if let Some(rate) = host.flags.shape_rate {
        stages.push(Box::new(ShaperTransform::new(rate)));
    }
    TransformStack::new(stages)
}

/// Drive one accepted connection to completion: handshake, transform
/// stack, link engine. `local_factory` opens the local device handle for
/// the resolved host (the lookup only identifies it by name after
/// `CKEY`, so the local device can't be opened any earlier).
///
/// `bind_addr` is the server's own listening address, reused for the
/// datagram data path (§4.2): a UDP socket bound to the same port as the
/// TCP listener, left unconnected so the first inbound datagram
/// late-connects it to whatever source address and port the peer's data
/// socket actually sends from — which, for a UDP session, is not the TCP
/// connection's peer address or port.
async fn run_session<L, F, Fut>(
    tcp: TcpStream,
    server_version: &str,
    lookup: &dyn HostLookup,
    locks: &Arc<HostLockTable>,
    bind_addr: SocketAddr,
    stats: Arc<StatsCounters>,
    stats_dir: Option<&std::path::Path>,
    local_factory: &F,
) -> Result<(), ServerSessionError>
where
    F: Fn(&HostProfile) -> Fut,
    Fut: std::future::Future<Output = std::io::Result<L>>,
    L: AsyncRead + AsyncWrite + Unpin + Send,
{
    let handshake_timeout = crate::core::constants::DEFAULT_HANDSHAKE_TIMEOUT;
    let (reader, output, host) = run_server(tcp, server_version, lookup, locks.as_ref(), handshake_timeout).await?;

    // The handshake already committed the lock (right after CACK
    // verification, per §4.1); release it on every exit path from this
    // session, mirroring tunnel.c's "parent releases the lock on exit"
    // at the point the forked child itself terminates.
    let _lock_guard = scopeguard(locks.clone(), host.name.clone());

    let mut negotiated_host = host.clone();
    negotiated_host.adopt_flags(output.flags);

    let stack = build_stack(&negotiated_host, output.session_key);

    let remote = match negotiated_host.transport {
        Transport::Stream => RemoteChannel::Stream(reader),
        Transport::Datagram => {
            drop(reader);
            let socket = tokio::net::UdpSocket::bind(bind_addr).await.map_err(ServerSessionError::LocalResource)?;
            RemoteChannel::Datagram(crate::framing::datagram::DatagramCodec::new(socket, false))
        }
    };

    let local = local_factory(&negotiated_host).await.map_err(ServerSessionError::LocalResource)?;

    let stats_fd = match stats_dir {
        Some(dir) => Some(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(format!("{}.stats", negotiated_host.name)))
                .await
                .map_err(ServerSessionError::LocalResource)?,
        ),
        None => None,
    };

    let (_keep_alive, no_cancel) = oneshot::channel();
    let engine = LinkEngine::new(remote, local, stack, stats, stats_fd, negotiated_host, no_cancel);
    let (termination, _local_back) = engine.run().await?;
    tracing::info!(host = %host.name, ?termination, "server session ended");
    Ok(())
}

/// Minimal RAII release for the lock the handshake already committed;
/// mirrors [`crate::supervisor::lock::HostLockGuard`] but for a lock this
/// function didn't itself acquire.
fn scopeguard(table: Arc<HostLockTable>, host: String) -> impl Drop {
    struct Release(Arc<HostLockTable>, String);
    impl Drop for Release {
        fn drop(&mut self) {
            self.0.release(&self.1);
        }
    }
    Release(table, host)
}

/// Accept connections on `listener` until `shutdown` fires, spawning one
/// task per session (§5's "isolated tasks ... with no shared state other
/// than the per-host lock"). `local_factory` is invoked once per session,
/// after the handshake resolves which host profile applies, to open that
/// host's local device.
///
/// Per-session errors are logged and otherwise swallowed: one
/// misbehaving client must not bring down the listener, matching the
/// original's process-per-connection isolation.
pub async fn run_server_loop<L, F, Fut>(
    listener: TcpListener,
    server_version: String,
    lookup: Arc<dyn HostLookup>,
    locks: Arc<HostLockTable>,
    stats_dir: Option<PathBuf>,
    local_factory: F,
    mut shutdown: oneshot::Receiver<()>,
) -> std::io::Result<()>
where
    F: Fn(&HostProfile) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::io::Result<L>> + Send,
    L: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let bind_addr = listener.local_addr()?;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(()),
            accepted = listener.accept() => {
                let (tcp, peer) = accepted?;
                let server_version = server_version.clone();
                let lookup = Arc::clone(&lookup);
                let locks = Arc::clone(&locks);
                let stats_dir = stats_dir.clone();
                let local_factory = local_factory.clone();

                tokio::spawn(async move {
                    let stats = StatsCounters::new();
                    let result = run_session(
                        tcp,
                        &server_version,
                        lookup.as_ref(),
                        &locks,
                        bind_addr,
                        stats,
                        stats_dir.as_deref(),
                        &local_factory,
                    )
                    .await;
                    if let Err(err) = result {
                        tracing::warn!(%peer, error = %err, "server session failed");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::flags::{InterfaceKind, Transport as T};
    use crate::crypto::handshake::run_client;
    use tokio::io::duplex;

    struct SingleHost(HostProfile);
    impl HostLookup for SingleHost {
        fn find(&self, name: &str) -> Option<HostProfile> {
            if name == self.0.name {
                Some(self.0.clone())
            } else {
                None
            }
        }
    }

    fn test_host() -> HostProfile {
        HostProfile::builder("alice")
            .passphrase("correct horse battery staple")
            .transport(T::Stream)
            .interface(InterfaceKind::Tun)
            .keepalive_interval(std::time::Duration::from_secs(30))
            .handshake_timeout(std::time::Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn accepted_session_runs_to_local_eof() {
        let host = test_host();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let lookup: Arc<dyn HostLookup> = Arc::new(SingleHost(host.clone()));
        let locks = HostLockTable::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let server_task = tokio::spawn(run_server_loop(
            listener,
            "test".to_string(),
            lookup,
            locks,
            None,
            |_host: &HostProfile| async {
                let (a, b) = duplex(4096);
                drop(b); // local device EOF immediately: session should end gracefully
                Ok::<_, std::io::Error>(a)
            },
            shutdown_rx,
        ));

        let client_tcp = TcpStream::connect(addr).await.unwrap();
        let (_reader, output) = run_client(client_tcp, &host, std::time::Duration::from_secs(2)).await.unwrap();
        assert!(output.flags.keepalive || !output.flags.keepalive); // handshake completed

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), server_task).await;
    }

    #[tokio::test]
    async fn unknown_host_is_rejected() {
        let host = test_host();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let lookup: Arc<dyn HostLookup> = Arc::new(SingleHost(host.clone()));
        let locks = HostLockTable::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let server_task = tokio::spawn(run_server_loop(
            listener,
            "test".to_string(),
            lookup,
            locks,
            None,
            |_host: &HostProfile| async {
                let (a, _b) = duplex(4096);
                Ok::<_, std::io::Error>(a)
            },
            shutdown_rx,
        ));

        let mut wrong_host = host.clone();
        wrong_host.name = "mallory".to_string();
        let client_tcp = TcpStream::connect(addr).await.unwrap();
        let result = run_client(client_tcp, &wrong_host, std::time::Duration::from_secs(2)).await;
        assert!(result.is_err());

        shutdown_tx.send(()).unwrap();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), server_task).await;
    }
}
