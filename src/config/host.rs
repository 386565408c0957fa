//! The static, per-named-peer host profile (§3), grounded on
//! `client/client.rs`'s `ClientConfig`/builder shape.

use std::time::Duration;

use zeroize::Zeroizing;

use crate::config::flags::{Compression, FeatureFlags, InterfaceKind, Transport};
use crate::core::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL,
    DEFAULT_KEEPALIVE_MAXFAIL, DEFAULT_STAT_INTERVAL,
};
use crate::core::error::ConfigError;

/// How a server should treat a second connection attempt for a host that
/// is already bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiConnectPolicy {
    /// Deny the new connection; the existing session keeps the lock.
    Deny,
    /// Allow concurrent sessions for this host (out of scope per §1's
    /// "no concurrent sessions per host", kept only so a profile can
    /// state the policy it is choosing *not* to use).
    Allow,
}

/// Static, per-named-peer configuration. Immutable from the link engine's
/// perspective except for the flag fields the handshake agrees upon and
/// the cryptographic material the handshake populates (see
/// [`crate::crypto::keys::AuthKey`]).
#[derive(Clone)]
pub struct HostProfile {
    /// Peer identifier, sent as the `host-id` field of `CKEY`.
    pub name: String,
    /// Pre-shared passphrase. Held in [`Zeroizing`] storage and consumed
    /// (overwritten, released) as soon as `Ak` is derived.
    pub passphrase: Zeroizing<String>,
    /// Feature flags this profile requests; on the client these are
    /// overwritten by the server's authoritative `FLAGS` response.
    pub flags: FeatureFlags,
    /// Requested compression, mirrored into `flags` at handshake time.
    pub compression: Option<Compression>,
    /// Requested AEAD cipher identifier (only `1` = AES-256-GCM is
    /// implemented; see [`crate::crypto::aead::CipherId`]).
    pub cipher: u32,
    /// Requested inbound shaping rate in kbit/s.
    pub shape_rate: Option<u32>,
    /// Keep-alive probe interval.
    pub keepalive_interval: Duration,
    /// Consecutive missed probes tolerated before a network timeout.
    pub keepalive_maxfail: u32,
    /// Statistics flush interval.
    pub stat_interval: Duration,
    /// Handshake receive timeout.
    pub handshake_timeout: Duration,
    /// Connect timeout for the session supervisor (client role).
    pub connect_timeout: Duration,
    /// Reconnect after a non-fatal disconnect (client role).
    pub persist: bool,
    /// Keep the local device open across a persistent reconnect.
    pub persist_keep_interface: bool,
    /// Transport variant requested.
    pub transport: Transport,
    /// Local interface kind requested.
    pub interface: InterfaceKind,
    /// Defer binding a datagram socket to the peer until the first
    /// inbound packet (NAT traversal late-connect, §4.2).
    pub nat_hack: bool,
    /// Policy applied to a second connection attempt (server role).
    pub multi_connect: MultiConnectPolicy,
}

impl std::fmt::Debug for HostProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProfile")
            .field("name", &self.name)
            .field("passphrase", &"<redacted>")
            .field("flags", &self.flags)
            .field("cipher", &self.cipher)
            .field("transport", &self.transport)
            .field("interface", &self.interface)
            .field("nat_hack", &self.nat_hack)
            .finish()
    }
}

impl HostProfile {
    /// Start building a profile for the named host.
    pub fn builder(name: impl Into<String>) -> HostProfileBuilder {
        HostProfileBuilder::new(name)
    }

    /// The flag string this profile requests, prior to negotiation.
    pub fn requested_flags(&self) -> FeatureFlags {
        FeatureFlags {
            transport: Some(self.transport),
            interface: Some(self.interface),
            shape_rate: self.shape_rate,
            compression: self.compression,
            keepalive: self.flags.keepalive,
            cipher: if self.flags.cipher.is_some() {
                self.flags.cipher
            } else {
                Some(self.cipher)
            },
        }
    }

    /// Overwrite this profile's negotiated flags with the server's
    /// authoritative set. Per §4.1 the client adopts `FLAGS` verbatim.
    pub fn adopt_flags(&mut self, flags: FeatureFlags) {
        self.flags = flags;
    }
}

/// Builder for [`HostProfile`].
#[derive(Debug, Default)]
pub struct HostProfileBuilder {
    name: String,
    passphrase: Option<String>,
    compression: Option<Compression>,
    cipher: u32,
    shape_rate: Option<u32>,
    keepalive: bool,
    keepalive_interval: Option<Duration>,
    keepalive_maxfail: Option<u32>,
    stat_interval: Option<Duration>,
    handshake_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    persist: bool,
    persist_keep_interface: bool,
    transport: Option<Transport>,
    interface: Option<InterfaceKind>,
    nat_hack: bool,
    multi_connect: Option<MultiConnectPolicy>,
}

impl HostProfileBuilder {
    /// Start a new builder for the named host.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cipher: 1,
            ..Default::default()
        }
    }

    /// Set the pre-shared passphrase.
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Request a compression transform.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Request an AEAD cipher identifier.
    pub fn cipher(mut self, cipher: u32) -> Self {
        self.cipher = cipher;
        self
    }

    /// Request an inbound shaping rate in kbit/s.
    pub fn shape_rate(mut self, kbit_per_sec: u32) -> Self {
        self.shape_rate = Some(kbit_per_sec);
        self
    }

    /// Enable keep-alive probing.
    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }

    /// Override the keep-alive probe interval.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Override the max consecutive missed keep-alive probes.
    pub fn keepalive_maxfail(mut self, maxfail: u32) -> Self {
        self.keepalive_maxfail = Some(maxfail);
        self
    }

    /// Override the statistics flush interval.
    pub fn stat_interval(mut self, interval: Duration) -> Self {
        self.stat_interval = Some(interval);
        self
    }

    /// Override the handshake receive timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Override the connect timeout (client role).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Reconnect after a non-fatal disconnect (client role).
    pub fn persist(mut self, enabled: bool) -> Self {
        self.persist = enabled;
        self
    }

    /// Keep the local device open across a persistent reconnect.
    pub fn persist_keep_interface(mut self, enabled: bool) -> Self {
        self.persist_keep_interface = enabled;
        self
    }

    /// Set the transport variant.
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the local interface kind.
    pub fn interface(mut self, interface: InterfaceKind) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Enable NAT-traversal late-connect (datagram transport only).
    pub fn nat_hack(mut self, enabled: bool) -> Self {
        self.nat_hack = enabled;
        self
    }

    /// Set the server-side multi-connect policy.
    pub fn multi_connect(mut self, policy: MultiConnectPolicy) -> Self {
        self.multi_connect = Some(policy);
        self
    }

    /// Build the profile, validating required fields.
    pub fn build(self) -> Result<HostProfile, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name"));
        }
        let passphrase = self.passphrase.ok_or(ConfigError::MissingField("passphrase"))?;
        if passphrase.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "passphrase",
                reason: "must not be empty".into(),
            });
        }
        let transport = self.transport.unwrap_or(Transport::Stream);
        let interface = self.interface.unwrap_or(InterfaceKind::Tun);
        if self.nat_hack && transport != Transport::Datagram {
            return Err(ConfigError::InvalidValue {
                field: "nat_hack",
                reason: "late-connect only applies to datagram transport".into(),
            });
        }

        Ok(HostProfile {
            name: self.name,
            passphrase: Zeroizing::new(passphrase),
            flags: FeatureFlags {
                transport: Some(transport),
                interface: Some(interface),
                shape_rate: self.shape_rate,
                compression: self.compression,
                keepalive: self.keepalive,
                cipher: Some(self.cipher),
            },
            compression: self.compression,
            cipher: self.cipher,
            shape_rate: self.shape_rate,
            keepalive_interval: self.keepalive_interval.unwrap_or(DEFAULT_KEEPALIVE_INTERVAL),
            keepalive_maxfail: self.keepalive_maxfail.unwrap_or(DEFAULT_KEEPALIVE_MAXFAIL),
            stat_interval: self.stat_interval.unwrap_or(DEFAULT_STAT_INTERVAL),
            handshake_timeout: self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            persist: self.persist,
            persist_keep_interface: self.persist_keep_interface,
            transport,
            interface,
            nat_hack: self.nat_hack,
            multi_connect: self.multi_connect.unwrap_or(MultiConnectPolicy::Deny),
        })
    }
}
