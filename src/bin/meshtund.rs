//! `meshtund`: the session supervisor's CLI surface (§6), grounded on
//! `original_source/main.c`'s flag set and on the retrieval pack's
//! `examples/echo/src/main.rs` for the mode-dispatch shape.
//!
//! Host profile parsing from a configuration file is explicitly out of
//! scope (§1): this binary builds a single [`HostProfile`] directly from
//! CLI flags instead of a `vtun.conf`-style file. The `--config` flag is
//! accepted for CLI-surface parity but is not read; passing it logs a
//! warning rather than failing, since the file format itself is an
//! external collaborator this crate doesn't implement.
//!
//! The local device (tun/tap/pty/pipe) is likewise out of scope: this
//! binary wires the link engine's local side to the process's own
//! stdin/stdout, which is the same "opaque byte stream" role a real
//! device descriptor would play.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use meshtun::config::{Compression, HostProfile, InterfaceKind, Transport};
use meshtun::crypto::handshake::HostLookup;
use meshtun::link::stats::StatsCounters;
use meshtun::supervisor::lock::HostLockTable;
use meshtun::supervisor::{run_client_session, run_server_loop};

/// Session role this invocation plays.
#[derive(Copy, Clone, ValueEnum, Debug)]
enum Mode {
    /// Listen for and authenticate incoming sessions.
    Server,
    /// Connect to a server and authenticate as a named host.
    Client,
}

/// Interface kind, mirrored from [`meshtun::config::InterfaceKind`] so
/// `clap` can derive a parser for it.
#[derive(Copy, Clone, ValueEnum, Debug)]
enum InterfaceArg {
    Tun,
    Tap,
    Pty,
    Pipe,
}

impl From<InterfaceArg> for InterfaceKind {
    fn from(value: InterfaceArg) -> Self {
        match value {
            InterfaceArg::Tun => InterfaceKind::Tun,
            InterfaceArg::Tap => InterfaceKind::Ether,
            InterfaceArg::Pty => InterfaceKind::Pty,
            InterfaceArg::Pipe => InterfaceKind::Pipe,
        }
    }
}

/// Transport variant, mirrored from [`meshtun::config::Transport`] for
/// the same reason as [`InterfaceArg`].
#[derive(Copy, Clone, ValueEnum, Debug)]
enum TransportArg {
    Stream,
    Datagram,
}

impl From<TransportArg> for Transport {
    fn from(value: TransportArg) -> Self {
        match value {
            TransportArg::Stream => Transport::Stream,
            TransportArg::Datagram => Transport::Datagram,
        }
    }
}

/// `meshtund` — a point-to-point virtual tunnel between two hosts.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server or client role.
    #[arg(long, value_enum)]
    mode: Mode,

    /// Configuration file path. Accepted for CLI-surface parity with the
    /// original; config-file parsing itself is out of scope (§1), so
    /// this flag is currently inert.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind (server) or connect to (client), `host:port`.
    #[arg(long)]
    addr: SocketAddr,

    /// Named host profile this session authenticates as (client) or
    /// accepts (server; repeat for more than one host).
    #[arg(long = "host")]
    hosts: Vec<String>,

    /// Name of the environment variable holding the pre-shared
    /// passphrase for each `--host` (matched positionally).
    #[arg(long = "passphrase-env")]
    passphrase_envs: Vec<String>,

    /// Transport variant requested (client only; the server adopts
    /// whatever role was negotiated per connection).
    #[arg(long, value_enum, default_value = "stream")]
    transport: TransportArg,

    /// Local interface kind requested.
    #[arg(long, value_enum, default_value = "tun")]
    interface: InterfaceArg,

    /// Requested deflate-family compression level (mutually exclusive
    /// with `--lzo-level`).
    #[arg(long)]
    compress_level: Option<u32>,

    /// Requested LZO-family compression level.
    #[arg(long)]
    lzo_level: Option<u32>,

    /// Requested inbound shaping rate, kbit/s.
    #[arg(long)]
    shape_rate: Option<u32>,

    /// Enable the keep-alive probe.
    #[arg(long)]
    keepalive: bool,

    /// AEAD cipher identifier; only `1` (AES-256-GCM) is implemented.
    #[arg(long, default_value_t = 1)]
    cipher: u32,

    /// Force reconnection after a non-fatal disconnect (client only).
    #[arg(long)]
    persist: bool,

    /// Connect timeout, in seconds (client only).
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Enable NAT-traversal late-connect (datagram transport only).
    #[arg(long)]
    nat_hack: bool,

    /// Suppress per-session informational logging; only warnings and
    /// errors are shown.
    #[arg(long)]
    quiet: bool,

    /// Directory to append per-host statistics files to.
    #[arg(long)]
    stats_dir: Option<PathBuf>,
}

fn init_logging(quiet: bool) {
    let default_filter = if quiet { "meshtun=warn,meshtund=warn" } else { "meshtun=info,meshtund=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
}

fn build_host(args: &Args, index: usize) -> Result<HostProfile, i32> {
    let name = args.hosts.get(index).cloned().unwrap_or_else(|| "default".to_string());
    let env_var = args.passphrase_envs.get(index).cloned().unwrap_or_else(|| format!("MESHTUN_PSK_{}", index));
    let passphrase = std::env::var(&env_var).map_err(|_| {
        eprintln!("error: environment variable {env_var} (passphrase for host {name:?}) is not set");
        1
    })?;

    let compression = match (args.compress_level, args.lzo_level) {
        (Some(level), None) => Some(Compression::Deflate(level)),
        (None, Some(level)) => Some(Compression::Lzo(level)),
        (None, None) => None,
        (Some(_), Some(_)) => {
            eprintln!("error: --compress-level and --lzo-level are mutually exclusive");
            return Err(1);
        }
    };

    let mut builder = HostProfile::builder(name)
        .passphrase(passphrase)
        .transport(args.transport.into())
        .interface(args.interface.into())
        .cipher(args.cipher)
        .keepalive(args.keepalive)
        .persist(args.persist)
        .nat_hack(args.nat_hack)
        .connect_timeout(Duration::from_secs(args.connect_timeout));
    if let Some(compression) = compression {
        builder = builder.compression(compression);
    }
    if let Some(rate) = args.shape_rate {
        builder = builder.shape_rate(rate);
    }

    builder.build().map_err(|err| {
        eprintln!("error: invalid host profile: {err}");
        1
    })
}

struct StaticLookup(Vec<HostProfile>);
impl HostLookup for StaticLookup {
    fn find(&self, name: &str) -> Option<HostProfile> {
        self.0.iter().find(|host| host.name == name).cloned()
    }
}

async fn run_client_mode(args: Args) -> Result<(), i32> {
    let host = build_host(&args, 0)?;
    let stats = StatsCounters::new();
    let stats_file = args.stats_dir.as_ref().map(|dir| dir.join(format!("{}.stats", host.name)));
    let (_shutdown_tx, shutdown_rx) = oneshot::channel();

    let result = run_client_session(
        host,
        args.addr,
        stats,
        stats_file,
        || async { Ok(tokio::io::join(tokio::io::stdin(), tokio::io::stdout())) },
        shutdown_rx,
    )
    .await;

    result.map_err(|err| {
        tracing::error!(error = %err, "client session failed");
        2
    })
}

async fn run_server_mode(args: Args) -> Result<(), i32> {
    if args.hosts.is_empty() {
        eprintln!("error: server mode requires at least one --host");
        return Err(1);
    }
    let mut hosts = Vec::with_capacity(args.hosts.len());
    for index in 0..args.hosts.len() {
        hosts.push(build_host(&args, index)?);
    }

    let listener = tokio::net::TcpListener::bind(args.addr).await.map_err(|err| {
        eprintln!("error: can't bind {}: {err}", args.addr);
        2
    })?;

    let lookup: Arc<dyn HostLookup> = Arc::new(StaticLookup(hosts));
    let locks = HostLockTable::new();
    let (_shutdown_tx, shutdown_rx) = oneshot::channel();

    tracing::info!(addr = %args.addr, "meshtund server listening");
    run_server_loop(
        listener,
        env!("CARGO_PKG_VERSION").to_string(),
        lookup,
        locks,
        args.stats_dir.clone(),
        |_host: &HostProfile| async { Ok(tokio::io::join(tokio::io::stdin(), tokio::io::stdout())) },
        shutdown_rx,
    )
    .await
    .map_err(|err| {
        tracing::error!(error = %err, "server loop failed");
        2
    })
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.quiet);

    if args.config.is_some() {
        tracing::warn!("--config is accepted but not read; host profiles come from --host/--passphrase-env flags");
    }

    let exit_code = match args.mode {
        Mode::Client => run_client_mode(args).await,
        Mode::Server => run_server_mode(args).await,
    };

    if let Err(code) = exit_code {
        std::process::exit(code);
    }
}
