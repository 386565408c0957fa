//! Flag string grammar (§6), grounded on `original_source/auth.c`'s
//! `bf2cf`/`cf2bf`.
//!
//! ```text
//! '<' (prot type (speedclause)? (compclause)? 'K'? (encclause)? )* '>'
//! ```

use std::fmt;
use thiserror::Error;

use crate::core::constants::FLAG_STRING_MAX;

/// Transport variant negotiated for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `T` - length-prefixed stream framing over a connected byte stream.
    Stream,
    /// `U` - length-prefixed datagram framing.
    Datagram,
}

/// Local virtual interface kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    /// `t` - pseudo-terminal.
    Pty,
    /// `p` - anonymous pipe.
    Pipe,
    /// `e` - ethernet bridge (tap-like).
    Ether,
    /// `u` - point-to-point (tun-like).
    Tun,
}

/// Compression family requested, with its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// `C<n>` - deflate family.
    Deflate(u32),
    /// `L<n>` - LZO family.
    Lzo(u32),
}

/// The negotiated feature set for a session: the result of parsing or
/// rendering a flag string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Transport variant, if stated; `cf2bf` only sets this when a `T`/`U`
    /// token is present, so hosts configured without one keep whatever
    /// their profile already had.
    pub transport: Option<Transport>,
    /// Interface kind, if stated.
    pub interface: Option<InterfaceKind>,
    /// `S<n>` inbound shaping rate in kbit/s.
    pub shape_rate: Option<u32>,
    /// `C<n>`/`L<n>` compression.
    pub compression: Option<Compression>,
    /// `K` keep-alive.
    pub keepalive: bool,
    /// `E<n>` AEAD cipher identifier.
    pub cipher: Option<u32>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            transport: None,
            interface: None,
            shape_rate: None,
            compression: None,
            keepalive: false,
            cipher: None,
        }
    }
}

/// Errors parsing a flag string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlagParseError {
    /// The string (including `<`/`>`) reached or exceeded
    /// [`FLAG_STRING_MAX`].
    #[error("flag string too long (max {FLAG_STRING_MAX})")]
    TooLong,
    /// No opening `<` was found.
    #[error("missing opening '<'")]
    MissingOpen,
    /// The string ended, or other characters followed, before a closing
    /// `>` was reached. Per SPEC_FULL.md this tightens the original's
    /// behavior, which accepted trailing garbage once `>` had been seen.
    #[error("missing closing '>'")]
    MissingClose,
    /// An unrecognized character was encountered.
    #[error("unknown flag character {0:?}")]
    UnknownChar(char),
    /// A numeric clause (`S`, `C`, `L`, `E`) had a malformed or missing
    /// integer.
    #[error("malformed integer after {0:?}")]
    BadInteger(char),
}

impl FeatureFlags {
    /// Render this flag set in the canonical order `bf2cf` uses:
    /// transport, interface, `S<n>`, `C<n>`/`L<n>`, `K`, `E<n>`.
    pub fn render(&self) -> String {
        let mut s = String::with_capacity(FLAG_STRING_MAX);
        s.push('<');
        match self.transport {
            Some(Transport::Stream) => s.push('T'),
            Some(Transport::Datagram) => s.push('U'),
            None => {}
        }
        match self.interface {
            Some(InterfaceKind::Pty) => s.push('t'),
            Some(InterfaceKind::Pipe) => s.push('p'),
            Some(InterfaceKind::Ether) => s.push('e'),
            Some(InterfaceKind::Tun) => s.push('u'),
            None => {}
        }
        if let Some(rate) = self.shape_rate {
            s.push_str(&format!("S{rate}"));
        }
        match self.compression {
            Some(Compression::Deflate(level)) => s.push_str(&format!("C{level}")),
            Some(Compression::Lzo(level)) => s.push_str(&format!("L{level}")),
            None => {}
        }
        if self.keepalive {
            s.push('K');
        }
        if let Some(cipher) = self.cipher {
            s.push_str(&format!("E{cipher}"));
        }
        s.push('>');
        s
    }

    /// Parse a flag string of the form `<TuE1K>`.
    ///
    /// Unlike the original `cf2bf`, which accepts anything once it has
    /// seen a valid `>`, this requires the *entire* input to be consumed
    /// exactly through the closing `>` with nothing admissible after it
    /// (REDESIGN FLAGS: tighten parsing).
    pub fn parse(input: &str) -> Result<Self, FlagParseError> {
        if input.len() >= FLAG_STRING_MAX {
            return Err(FlagParseError::TooLong);
        }
        let mut chars = input.chars().peekable();
        match chars.next() {
            Some('<') => {}
            _ => return Err(FlagParseError::MissingOpen),
        }

        let mut flags = FeatureFlags::default();
        loop {
            match chars.next() {
                Some('>') => {
                    if chars.next().is_some() {
                        return Err(FlagParseError::MissingClose);
                    }
                    return Ok(flags);
                }
                Some('t') => flags.interface = Some(InterfaceKind::Pty),
                Some('p') => flags.interface = Some(InterfaceKind::Pipe),
                Some('e') => flags.interface = Some(InterfaceKind::Ether),
                Some('u') => flags.interface = Some(InterfaceKind::Tun),
                Some('T') => flags.transport = Some(Transport::Stream),
                Some('U') => flags.transport = Some(Transport::Datagram),
                Some('K') => flags.keepalive = true,
                Some('F') => { /* reserved; accept and ignore */ }
                Some(c @ ('S' | 'C' | 'L' | 'E')) => {
                    let n = take_integer(&mut chars).ok_or(FlagParseError::BadInteger(c))?;
                    match c {
                        'S' => flags.shape_rate = Some(n),
                        'C' => flags.compression = Some(Compression::Deflate(n)),
                        'L' => flags.compression = Some(Compression::Lzo(n)),
                        'E' => flags.cipher = Some(n),
                        _ => unreachable!(),
                    }
                }
                Some(c) => return Err(FlagParseError::UnknownChar(c)),
                None => return Err(FlagParseError::MissingClose),
            }
        }
    }
}

fn take_integer(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<u32> {
    let mut digits = String::new();
    while let Some(d) = chars.peek() {
        if d.is_ascii_digit() {
            digits.push(*d);
            chars.next();
        } else {
            break;
        }
    }
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_6_string() {
        let flags = FeatureFlags::parse("<TuE1K>").unwrap();
        assert_eq!(flags.transport, Some(Transport::Stream));
        assert_eq!(flags.interface, Some(InterfaceKind::Tun));
        assert_eq!(flags.cipher, Some(1));
        assert!(flags.keepalive);
        // render()'s canonical order is K before E<n> (bf2cf / §6's
        // grammar), which differs from this input's own ordering; the
        // parsed *meaning* round-trips even though the rendered string
        // doesn't echo the input byte-for-byte.
        assert_eq!(flags.render(), "<TuKE1>");
    }

    #[test]
    fn round_trip_for_any_legal_set() {
        let flags = FeatureFlags {
            transport: Some(Transport::Datagram),
            interface: Some(InterfaceKind::Ether),
            shape_rate: Some(2048),
            compression: Some(Compression::Lzo(3)),
            keepalive: true,
            cipher: Some(2),
        };
        let rendered = flags.render();
        assert_eq!(FeatureFlags::parse(&rendered).unwrap(), flags);
    }

    #[test]
    fn rejects_missing_close_bracket() {
        assert_eq!(FeatureFlags::parse("<Tu"), Err(FlagParseError::MissingClose));
    }

    #[test]
    fn rejects_trailing_garbage_after_close() {
        assert_eq!(FeatureFlags::parse("<Tu>garbage"), Err(FlagParseError::MissingClose));
    }

    #[test]
    fn rejects_unknown_character() {
        assert_eq!(FeatureFlags::parse("<TuZ>"), Err(FlagParseError::UnknownChar('Z')));
    }

    #[test]
    fn rejects_malformed_integer() {
        assert_eq!(FeatureFlags::parse("<TuSx>"), Err(FlagParseError::BadInteger('S')));
    }

    #[test]
    fn rejects_overlong_string() {
        let long = format!("<Tu{}>", "C1".repeat(20));
        assert_eq!(FeatureFlags::parse(&long), Err(FlagParseError::TooLong));
    }

    #[test]
    fn reserved_f_token_is_ignored() {
        let flags = FeatureFlags::parse("<TuFK>").unwrap();
        assert!(flags.keepalive);
    }
}
