//! The session supervisor (§4.6): binds handshake output to engine
//! configuration on both roles, manages the client's reconnection
//! policy, and owns the per-host single-connection lock.

pub mod client;
pub mod lock;
pub mod server;

pub use client::{run_client_session, ClientError};
pub use lock::{HostLockGuard, HostLockTable};
pub use server::{run_server_loop, ServerSessionError};
