//! Frame-level WebSocket connection over a blocking or non-blocking transport.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::close::{CloseCode, CloseFrame};
use crate::config::{Config, Timeouts};
use crate::connection::{ConnectionState, Progress, Role};
use crate::error::{Error, Result};
use crate::protocol::{
    FrameFlags, FrameHeader, FrameValidator, OpCode, apply_mask_fast, encode_frame,
};
use crate::transport::Transport;

/// A frame whose bytes are partially written.
struct PendingSend {
    flags: FrameFlags,
    payload_len: usize,
    frame: BytesMut,
}

/// A frame whose header has been decoded and validated but whose payload has not
/// fully arrived.
#[derive(Clone, Copy)]
struct PendingReceive {
    header: FrameHeader,
    header_len: usize,
    total_len: usize,
}

enum Fill {
    Data,
    Eof,
    WouldBlock,
}

/// An established WebSocket connection.
///
/// Created by [`accept`](crate::connection::accept) or
/// [`connect`](crate::connection::connect), or with [`WebSocket::from_raw`] over a
/// transport that has already been upgraded.
///
/// In blocking mode every call runs to completion or fails with
/// [`Error::Timeout`]. In non-blocking mode `send_frame`, `receive_frame` and
/// `shutdown` return [`Progress::WouldBlock`] when the transport stalls and keep the
/// bytes already transferred; repeating the call with the same arguments resumes the
/// same frame. A repeated call that does not match the interrupted one fails with
/// [`Error::RetryMismatch`].
pub struct WebSocket<T> {
    io: T,
    role: Role,
    state: ConnectionState,
    blocking: bool,
    validator: FrameValidator,
    timeouts: Timeouts,
    read_chunk_size: usize,
    read_buf: BytesMut,
    pending_send: Option<PendingSend>,
    pending_receive: Option<PendingReceive>,
    close_sent: bool,
    close_received: bool,
    protocol: Option<String>,
}

impl<T: Transport> WebSocket<T> {
    /// Wrap a transport on which the upgrade handshake already completed.
    ///
    /// The connection starts `Open` and in blocking mode; the transport's own mode
    /// is left untouched until [`set_blocking`](Self::set_blocking) is called.
    pub fn from_raw(io: T, role: Role, config: &Config) -> Self {
        Self::from_parts(io, role, config, BytesMut::new(), None)
    }

    pub(crate) fn from_parts(
        io: T,
        role: Role,
        config: &Config,
        leftover: BytesMut,
        protocol: Option<String>,
    ) -> Self {
        let validator = FrameValidator::new(role, config.limits.clone())
            .with_accept_unmasked(config.accept_unmasked_frames);
        Self {
            io,
            role,
            state: ConnectionState::Open,
            blocking: true,
            validator,
            timeouts: config.timeouts.clone(),
            read_chunk_size: config.read_chunk_size.max(1),
            read_buf: leftover,
            pending_send: None,
            pending_receive: None,
            close_sent: false,
            close_received: false,
            protocol,
        }
    }

    /// Send one frame.
    ///
    /// `flags` supplies FIN, RSV and the opcode. Client frames are masked with a
    /// fresh key. Returns the payload length once the whole frame is on the wire.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet`, `Error::ReservedOpcode`, `Error::FragmentedControlFrame`,
    ///   `Error::ControlFrameTooLarge` before anything is written
    /// - `Error::RetryMismatch` if a frame is pending and `payload`/`flags` differ
    /// - `Error::ConnectionClosed` when closed or after a close frame was sent
    /// - `Error::Timeout` when a blocking write times out (progress is kept)
    /// - `Error::Io` for transport failures
    pub fn send_frame(&mut self, payload: &[u8], flags: FrameFlags) -> Result<Progress<usize>> {
        if !self.state.can_send() {
            return Err(Error::ConnectionClosed);
        }
        match &self.pending_send {
            Some(pending) => {
                if pending.flags != flags || pending.payload_len != payload.len() {
                    return Err(Error::RetryMismatch(format!(
                        "pending frame {:?} with {} bytes, retried with {:?} and {} bytes",
                        pending.flags,
                        pending.payload_len,
                        flags,
                        payload.len()
                    )));
                }
            }
            None => {
                if self.close_sent {
                    return Err(Error::ConnectionClosed);
                }
                let mut frame = BytesMut::new();
                encode_frame(flags, payload, self.role.next_mask()?, &mut frame)?;
                self.pending_send = Some(PendingSend {
                    flags,
                    payload_len: payload.len(),
                    frame,
                });
            }
        }

        if self.flush_pending()?.is_would_block() {
            return Ok(Progress::WouldBlock);
        }

        if flags.opcode()? == OpCode::Close {
            self.close_sent = true;
            self.state = self.state.after_close(self.close_received);
            debug!(role = %self.role, state = %self.state, "close frame sent");
        }
        Ok(Progress::Complete(payload.len()))
    }

    fn flush_pending(&mut self) -> Result<Progress<()>> {
        let Some(pending) = self.pending_send.as_mut() else {
            return Ok(Progress::Complete(()));
        };

        while pending.frame.has_remaining() {
            match self.io.write(&pending.frame) {
                Ok(0) => {
                    return Err(self.fail(Error::Io(
                        ErrorKind::WriteZero,
                        "transport accepted no bytes".into(),
                    )));
                }
                Ok(n) => {
                    pending.frame.advance(n);
                    trace!(written = n, remaining = pending.frame.len(), "frame bytes written");
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return self.stalled(e),
            }
        }

        self.pending_send = None;
        Ok(Progress::Complete(()))
    }

    /// Receive one frame into `buf`.
    ///
    /// Returns the payload length and the frame's flags. `(0, FrameFlags::NONE)`
    /// means the peer shut the transport down at a frame boundary; an empty frame
    /// (for example an empty ping) returns `(0, flags)`. `buf` is written only once
    /// the complete frame has arrived.
    ///
    /// # Errors
    ///
    /// - `Error::PayloadTooBig` if the payload exceeds the maximum payload size or
    ///   `buf.len()`, detected before any payload is copied
    /// - framing violations (`Error::ReservedBitsSet`, `Error::ReservedOpcode`,
    ///   masking errors, control frame rules); the connection is closed
    /// - `Error::IncompleteFrame` if the peer closes mid-frame
    /// - `Error::RetryMismatch` if a frame is pending and `buf` is too small for it
    /// - `Error::Timeout` when a blocking read times out (progress is kept)
    pub fn receive_frame(&mut self, buf: &mut [u8]) -> Result<Progress<(usize, FrameFlags)>> {
        let capacity = buf.len();
        self.receive_with(Some(capacity), |payload| {
            buf[..payload.len()].copy_from_slice(payload);
        })
    }

    /// Receive one frame and append its payload to `buf`.
    ///
    /// Same semantics as [`receive_frame`](Self::receive_frame), bounded only by the
    /// maximum payload size.
    ///
    /// # Errors
    ///
    /// See [`receive_frame`](Self::receive_frame).
    pub fn receive_frame_into(
        &mut self,
        buf: &mut Vec<u8>,
    ) -> Result<Progress<(usize, FrameFlags)>> {
        self.receive_with(None, |payload| buf.extend_from_slice(payload))
    }

    fn receive_with(
        &mut self,
        capacity: Option<usize>,
        deliver: impl FnOnce(&[u8]),
    ) -> Result<Progress<(usize, FrameFlags)>> {
        if !self.state.can_receive() {
            return Err(Error::ConnectionClosed);
        }

        let pending = match self.pending_receive {
            Some(pending) => {
                if let Some(capacity) = capacity {
                    if pending.header.payload_len > capacity as u64 {
                        return Err(Error::RetryMismatch(format!(
                            "pending frame needs {} bytes, retried with a {capacity}-byte buffer",
                            pending.header.payload_len
                        )));
                    }
                }
                pending
            }
            None => match self.read_header(capacity)? {
                Progress::Complete(Some(pending)) => pending,
                Progress::Complete(None) => {
                    debug!(role = %self.role, "peer closed the connection");
                    self.state = ConnectionState::Closed;
                    return Ok(Progress::Complete((0, FrameFlags::NONE)));
                }
                Progress::WouldBlock => return Ok(Progress::WouldBlock),
            },
        };

        while self.read_buf.len() < pending.total_len {
            match self.fill()? {
                Fill::Data => {}
                Fill::WouldBlock => return Ok(Progress::WouldBlock),
                Fill::Eof => {
                    return Err(self.fail(Error::IncompleteFrame {
                        received: self.read_buf.len(),
                        expected: pending.total_len,
                    }));
                }
            }
        }

        self.pending_receive = None;
        let mut frame = self.read_buf.split_to(pending.total_len);
        if let Some(key) = pending.header.mask {
            apply_mask_fast(&mut frame[pending.header_len..], key);
        }
        let payload = &frame[pending.header_len..];
        deliver(payload);

        let flags = pending.header.flags;
        if flags.opcode()? == OpCode::Close {
            self.close_received = true;
            self.state = self.state.after_close(self.close_sent);
            debug!(
                role = %self.role,
                state = %self.state,
                close = ?CloseFrame::decode(payload),
                "close frame received"
            );
        }
        Ok(Progress::Complete((payload.len(), flags)))
    }

    /// Read until a header is decoded and validated. `Complete(None)` is end of
    /// stream at a frame boundary.
    fn read_header(
        &mut self,
        capacity: Option<usize>,
    ) -> Result<Progress<Option<PendingReceive>>> {
        loop {
            match FrameHeader::decode(&self.read_buf) {
                Ok(Some((header, header_len))) => {
                    if let Err(e) = self.validator.validate_incoming(&header, capacity) {
                        return Err(self.fail(e));
                    }
                    let total_len = usize::try_from(header.payload_len)
                        .ok()
                        .and_then(|len| len.checked_add(header_len))
                        .ok_or(Error::PayloadTooBig {
                            size: header.payload_len,
                            max: usize::MAX as u64,
                        })
                        .map_err(|e| self.fail(e))?;

                    let pending = PendingReceive {
                        header,
                        header_len,
                        total_len,
                    };
                    self.pending_receive = Some(pending);
                    trace!(flags = ?header.flags, len = header.payload_len, "frame header received");
                    return Ok(Progress::Complete(Some(pending)));
                }
                Ok(None) => {}
                Err(e) => return Err(self.fail(e)),
            }

            match self.fill()? {
                Fill::Data => {}
                Fill::WouldBlock => return Ok(Progress::WouldBlock),
                Fill::Eof if self.read_buf.is_empty() => return Ok(Progress::Complete(None)),
                Fill::Eof => {
                    let received = self.read_buf.len();
                    return Err(self.fail(Error::IncompleteFrame {
                        received,
                        expected: received + 1,
                    }));
                }
            }
        }
    }

    /// Read one chunk from the transport into the read buffer.
    fn fill(&mut self) -> Result<Fill> {
        let start = self.read_buf.len();
        self.read_buf.resize(start + self.read_chunk_size, 0);
        loop {
            match self.io.read(&mut self.read_buf[start..]) {
                Ok(0) => {
                    self.read_buf.truncate(start);
                    return Ok(Fill::Eof);
                }
                Ok(n) => {
                    self.read_buf.truncate(start + n);
                    return Ok(Fill::Data);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.read_buf.truncate(start);
                    return self.stalled(e).map(|progress| match progress {
                        Progress::WouldBlock => Fill::WouldBlock,
                        Progress::Complete(()) => Fill::Data,
                    });
                }
            }
        }
    }

    /// Classify a transport error: would-block in non-blocking mode is progress,
    /// anything else is an error.
    fn stalled(&self, e: io::Error) -> Result<Progress<()>> {
        match e.kind() {
            ErrorKind::WouldBlock if !self.blocking => Ok(Progress::WouldBlock),
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Err(Error::Timeout),
            _ => Err(e.into()),
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        debug!(role = %self.role, %error, "closing connection after error");
        self.state = ConnectionState::Closed;
        self.pending_receive = None;
        self.pending_send = None;
        error
    }

    /// Send a close frame with `code` and `reason`.
    ///
    /// Blocking and retry semantics are those of [`send_frame`](Self::send_frame).
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for reserved codes
    /// - `Error::ControlFrameTooLarge` if the reason exceeds 123 bytes
    /// - the [`send_frame`](Self::send_frame) errors
    pub fn shutdown(
        &mut self,
        code: impl Into<CloseCode>,
        reason: &str,
    ) -> Result<Progress<usize>> {
        let payload = CloseFrame::new(code.into(), reason).encode()?;
        self.send_frame(&payload, FrameFlags::CLOSE)
    }

    /// Send a normal (1000) close frame with no reason.
    ///
    /// # Errors
    ///
    /// See [`shutdown`](Self::shutdown).
    pub fn shutdown_default(&mut self) -> Result<Progress<usize>> {
        self.shutdown(CloseCode::Normal, "")
    }

    /// Switch the transport between blocking and non-blocking mode.
    ///
    /// In blocking mode the configured receive and send timeouts are applied.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the transport rejects the change.
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        self.io.set_nonblocking(!blocking)?;
        if blocking {
            self.io.set_read_timeout(self.timeouts.receive)?;
            self.io.set_write_timeout(self.timeouts.send)?;
        }
        self.blocking = blocking;
        Ok(())
    }

    /// Change the receive timeout used in blocking mode.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the transport rejects the timeout.
    pub fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.blocking {
            self.io.set_read_timeout(timeout)?;
        }
        self.timeouts.receive = timeout;
        Ok(())
    }

    /// Change the send timeout used in blocking mode.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the transport rejects the timeout.
    pub fn set_send_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.blocking {
            self.io.set_write_timeout(timeout)?;
        }
        self.timeouts.send = timeout;
        Ok(())
    }
}

impl<T> WebSocket<T> {
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Alias of [`role`](Self::role).
    #[must_use]
    pub fn mode(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Largest payload `receive_frame` accepts.
    #[must_use]
    pub fn max_payload_size(&self) -> usize {
        self.validator.max_payload_size()
    }

    pub fn set_max_payload_size(&mut self, size: usize) {
        self.validator.set_max_payload_size(size);
    }

    /// Subprotocol agreed during the handshake.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Whether a non-blocking send is waiting to be resumed.
    #[must_use]
    pub fn has_pending_send(&self) -> bool {
        self.pending_send.is_some()
    }

    /// Whether a non-blocking receive is waiting to be resumed.
    #[must_use]
    pub fn has_pending_receive(&self) -> bool {
        self.pending_receive.is_some()
    }

    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }

    /// Unwrap the transport. Buffered but unconsumed bytes are dropped.
    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T> fmt::Debug for WebSocket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("blocking", &self.blocking)
            .field("buffered", &self.read_buf.len())
            .field("pending_send", &self.pending_send.is_some())
            .field("pending_receive", &self.pending_receive.is_some())
            .finish()
    }
}
