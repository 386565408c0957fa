//! Datagram-transport frame codec (§4.2 "Datagram codec"), grounded on
//! `original_source/generic/udp_proto.c`'s `udp_write`/`udp_read` for the
//! single-syscall I/O and NAT-traversal late-connect sequencing, and on
//! the teacher's `transport/socket.rs`'s `NomadSocket` for the
//! owned-`UdpSocket` wrapper shape.
//!
//! Unlike the stream codec, a datagram carries its header and body in one
//! `send`/`recv` syscall: there is no separate header read, so a
//! truncated or oversize datagram is detected after the fact by
//! comparing the declared length against what actually arrived.

use std::io;

use tokio::net::UdpSocket;

use crate::core::error::FramingError;
use crate::framing::header::{ControlFrame, FrameHeader};
use crate::framing::ReadFrame;

/// Linux `ENOBUFS`, returned by `send`/`sendto` when the kernel transmit
/// buffer is momentarily full. `udp_write` treats this as "wrote zero
/// bytes, try again later" rather than a fatal error; reproduced here
/// without a `libc` dependency since it is the one errno the original
/// singles out.
const ENOBUFS: i32 = 105;

/// Bytes peeked off an unconnected datagram socket to decide whether the
/// remote has become reachable (`udp_read`'s `MSG_PEEK` probe reads only
/// the 2-byte header).
const PEEK_LEN: usize = 2;

/// Frame codec over a connectionless datagram socket.
///
/// Bridges two asymmetries the stream codec doesn't have: a socket that
/// starts out unconnected (NAT-traversal "late-connect", §4.2) until the
/// first inbound datagram reveals the peer's address, and writes that
/// must be suppressed entirely (not just buffered) while that peer is
/// still unknown.
pub struct DatagramCodec {
    socket: UdpSocket,
    remote_connected: bool,
    recv_buf: Vec<u8>,
}

impl DatagramCodec {
    /// Wrap a socket. `already_connected` should be `true` for an
    /// outbound (client) session that called `connect()` up front, and
    /// `false` for an inbound (server, NAT-traversal) session that must
    /// wait for the peer's first datagram.
    pub fn new(socket: UdpSocket, already_connected: bool) -> Self {
        Self {
            socket,
            remote_connected: already_connected,
            recv_buf: vec![0u8; crate::core::constants::MAX_FRAME + crate::core::constants::MAX_OVERHEAD + 2],
        }
    }

    /// Whether the remote address is currently known.
    pub fn is_remote_connected(&self) -> bool {
        self.remote_connected
    }

    /// Write one data frame as a single datagram: header word immediately
    /// followed by the payload, in one `send`.
    ///
    /// Matches `udp_write`: a write attempted before the remote is known
    /// is silently dropped (`Ok(0)`, not an error — there is nothing
    /// meaningful to send to); `ENOBUFS` is likewise swallowed as "sent
    /// zero bytes, the caller will retry on the next frame".
    pub async fn write_frame(&self, payload: &[u8]) -> Result<usize, FramingError> {
        let header = FrameHeader::Payload(payload.len()).to_word();
        self.write_header_and(header, payload).await
    }

    /// Write a bare control frame (no payload).
    pub async fn write_control(&self, control: ControlFrame) -> Result<usize, FramingError> {
        let header = FrameHeader::Control(control).to_word();
        self.write_header_and(header, &[]).await
    }

    async fn write_header_and(&self, header: u16, payload: &[u8]) -> Result<usize, FramingError> {
        if !self.remote_connected {
            return Ok(0);
        }
        let mut datagram = Vec::with_capacity(2 + payload.len());
        datagram.extend_from_slice(&header.to_be_bytes());
        datagram.extend_from_slice(payload);

        loop {
            match self.socket.send(&datagram).await {
                Ok(n) => return Ok(n),
                Err(err) if err.raw_os_error() == Some(ENOBUFS) => return Ok(0),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(FramingError::Io(err)),
            }
        }
    }

    /// Read one datagram. If the remote address isn't known yet, peeks
    /// the first [`PEEK_LEN`] bytes to learn the sender's address without
    /// consuming the datagram, `connect()`s to it, and only then
    /// performs the real read — matching `udp_read`'s peek-then-connect
    /// late-connect sequence (§4.2's NAT-traversal scenario).
    ///
    /// A declared length that doesn't match what was actually received
    /// is reported as [`ReadFrame::Control(ControlFrame::BadFrame)`],
    /// never as a fatal error.
    pub async fn read_frame(&mut self) -> Result<ReadFrame, FramingError> {
        if !self.remote_connected {
            let mut peek_buf = [0u8; PEEK_LEN];
            let (_, sender) = self.socket.peek_from(&mut peek_buf).await?;
            self.socket.connect(sender).await?;
            self.remote_connected = true;
        }

        let n = self.socket.recv(&mut self.recv_buf).await?;
        if n < 2 {
            return Ok(ReadFrame::Control(ControlFrame::BadFrame));
        }

        let word = u16::from_be_bytes([self.recv_buf[0], self.recv_buf[1]]);
        match FrameHeader::from_word(word) {
            FrameHeader::Control(control) => Ok(ReadFrame::Control(control)),
            FrameHeader::Payload(len) => {
                let actual = n - 2;
                if len != actual {
                    return Ok(ReadFrame::Control(ControlFrame::BadFrame));
                }
                Ok(ReadFrame::Data(self.recv_buf[2..n].to_vec()))
            }
        }
    }
}
