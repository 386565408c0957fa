//! The link engine (§4.5): the event loop that drives one session's data
//! path once the handshake has completed and the transform stack is
//! installed.

pub mod engine;
pub mod stats;
pub mod timer;

pub use engine::{LinkEngine, RemoteChannel, Termination};
pub use stats::StatsCounters;
pub use timer::HousekeepingTimer;
