//! Drive the upgrade handshake over a transport.
//!
//! Both drivers run in blocking mode and leave the transport blocking. On failure
//! the transport is handed back in [`HandshakeFailure`] with no framing state
//! applied, so the caller can answer (see [`reject`]) or close it.

use std::fmt;
use std::io::{ErrorKind, Read, Write};

use bytes::BytesMut;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, Limits};
use crate::connection::{Role, WebSocket};
use crate::error::{Error, Result};
use crate::protocol::handshake::{
    ClientRequest, HandshakeRequest, HandshakeResponse, WEBSOCKET_VERSION, find_head_end,
};
use crate::protocol::Authenticator;
use crate::transport::Transport;

const READ_CHUNK: usize = 1024;

/// A failed handshake, carrying the untouched transport.
#[derive(Error)]
#[error("WebSocket handshake failed: {error}")]
pub struct HandshakeFailure<T> {
    /// Why the handshake failed.
    #[source]
    pub error: Error,
    /// The transport, for the caller to reject or close.
    pub io: T,
}

impl<T> fmt::Debug for HandshakeFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Server side: read the upgrade request from `io`, validate it, authenticate it if
/// `config.credentials` is set, and answer `101 Switching Protocols`.
///
/// A request without an `Authorization` header is answered with a `401` challenge
/// and one retried request is read from the same connection.
///
/// # Errors
///
/// `NoHandshake`, `NoVersion`, `UnsupportedVersion`, `NoKey`, `Unauthorized`,
/// `HandshakeTooLarge`, `InvalidHandshake` or a transport error, together with the
/// transport.
pub fn accept<T: Transport>(
    mut io: T,
    config: &Config,
) -> std::result::Result<WebSocket<T>, HandshakeFailure<T>> {
    match server_handshake(&mut io, config) {
        Ok((leftover, protocol)) => {
            debug!(protocol = ?protocol, "server handshake complete");
            Ok(WebSocket::from_parts(io, Role::Server, config, leftover, protocol))
        }
        Err(error) => {
            debug!(%error, "server handshake failed");
            Err(HandshakeFailure { error, io })
        }
    }
}

/// Client side: send `request` over `io` and validate the server's answer.
///
/// On a `401` with `config.credentials` set, the request is retried once with an
/// `Authorization` header answering the challenge and a new key.
///
/// # Errors
///
/// `NoHandshake` for a non-101 answer or missing upgrade tokens, `AcceptMismatch`,
/// `Unauthorized`, `HandshakeTooLarge`, `InvalidHandshake` or a transport error,
/// together with the transport.
pub fn connect<T: Transport>(
    mut io: T,
    request: ClientRequest,
    config: &Config,
) -> std::result::Result<WebSocket<T>, HandshakeFailure<T>> {
    match client_handshake(&mut io, request, config) {
        Ok((leftover, protocol)) => {
            debug!(protocol = ?protocol, "client handshake complete");
            Ok(WebSocket::from_parts(io, Role::Client, config, leftover, protocol))
        }
        Err(error) => {
            debug!(%error, "client handshake failed");
            Err(HandshakeFailure { error, io })
        }
    }
}

/// Write a minimal error response with `status` and `reason`.
///
/// # Errors
///
/// Returns a transport error if the write fails.
pub fn reject<T: Write>(io: &mut T, status: u16, reason: &str) -> Result<()> {
    let mut response = HandshakeResponse::error(status, reason);
    if status == 426 {
        response = response.with_header("Sec-WebSocket-Version", WEBSOCKET_VERSION);
    }
    write_response(io, &response)
}

/// Answer a failed server handshake with the status matching `error`.
///
/// `Unauthorized` was already answered during the handshake and is not answered
/// again.
///
/// # Errors
///
/// Returns a transport error if the write fails.
pub fn reject_error<T: Write>(io: &mut T, error: &Error) -> Result<()> {
    match error {
        Error::Unauthorized => Ok(()),
        Error::UnsupportedVersion(_) => reject(io, 426, "Upgrade Required"),
        Error::HandshakeTooLarge { .. } => reject(io, 431, "Request Header Fields Too Large"),
        _ => reject(io, 400, "Bad Request"),
    }
}

fn server_handshake<T: Transport>(
    io: &mut T,
    config: &Config,
) -> Result<(BytesMut, Option<String>)> {
    begin(io, config)?;
    let limits = &config.limits;
    let mut buf = BytesMut::new();

    let mut request = read_request(io, &mut buf, limits)?;
    request.validate()?;

    if let Some(credentials) = &config.credentials {
        let auth = Authenticator::new(credentials.clone())?;
        let mut challenged = false;
        loop {
            match request.authorization() {
                Some(header) if auth.verify(header, &request.method, &request.path) => break,
                None if !challenged => {
                    debug!(path = %request.path, "challenging unauthenticated upgrade");
                    write_response(io, &HandshakeResponse::unauthorized(auth.challenge()))?;
                    challenged = true;
                    request = read_request(io, &mut buf, limits)?;
                    request.validate()?;
                }
                _ => {
                    warn!(path = %request.path, "upgrade rejected: invalid credentials");
                    write_response(io, &HandshakeResponse::unauthorized(auth.challenge()))?;
                    return Err(Error::Unauthorized);
                }
            }
        }
    }

    let response = HandshakeResponse::from_request(&request)?;
    let protocol = response.protocol().map(str::to_string);
    write_response(io, &response)?;
    finish(io, config)?;
    Ok((buf, protocol))
}

fn client_handshake<T: Transport>(
    io: &mut T,
    mut request: ClientRequest,
    config: &Config,
) -> Result<(BytesMut, Option<String>)> {
    begin(io, config)?;
    let limits = &config.limits;
    let mut buf = BytesMut::new();
    let mut authorization: Option<String> = None;

    loop {
        let mut head = Vec::new();
        request.write(&mut head, authorization.as_deref())?;
        io.write_all(&head)?;

        let response = read_response(io, &mut buf, limits)?;
        if response.status == 401 {
            let (Some(credentials), None) = (&config.credentials, &authorization) else {
                return Err(Error::Unauthorized);
            };
            let challenge = response
                .headers
                .get("www-authenticate")
                .ok_or(Error::Unauthorized)?;
            authorization = Some(credentials.authorization(challenge, "GET", &request.path)?);
            skip_body(io, &mut buf, response.content_length())?;
            request.regenerate_key()?;
            debug!("retrying upgrade with credentials");
            continue;
        }

        response.verify_upgrade(&request.key)?;
        finish(io, config)?;
        return Ok((buf, response.protocol().map(str::to_string)));
    }
}

fn begin<T: Transport>(io: &mut T, config: &Config) -> Result<()> {
    io.set_nonblocking(false)?;
    io.set_read_timeout(config.timeouts.handshake)?;
    io.set_write_timeout(config.timeouts.handshake)?;
    Ok(())
}

fn finish<T: Transport>(io: &mut T, config: &Config) -> Result<()> {
    io.set_read_timeout(config.timeouts.receive)?;
    io.set_write_timeout(config.timeouts.send)?;
    Ok(())
}

fn write_response<T: Write>(io: &mut T, response: &HandshakeResponse) -> Result<()> {
    let mut head = Vec::new();
    response.write(&mut head)?;
    io.write_all(&head)?;
    io.flush()?;
    Ok(())
}

fn read_request<T: Read>(
    io: &mut T,
    buf: &mut BytesMut,
    limits: &Limits,
) -> Result<HandshakeRequest> {
    let end = read_head(io, buf, limits)?;
    let head = buf.split_to(end);
    HandshakeRequest::parse(&head)
}

fn read_response<T: Read>(
    io: &mut T,
    buf: &mut BytesMut,
    limits: &Limits,
) -> Result<HandshakeResponse> {
    let end = read_head(io, buf, limits)?;
    let head = buf.split_to(end);
    HandshakeResponse::parse(&head)
}

/// Read until `buf` holds a complete HTTP head; returns its length. Bytes after the
/// head stay in `buf`.
fn read_head<T: Read>(io: &mut T, buf: &mut BytesMut, limits: &Limits) -> Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(end) = find_head_end(buf) {
            limits.check_handshake_size(end)?;
            return Ok(end);
        }
        limits.check_handshake_size(buf.len())?;
        match io.read(&mut chunk) {
            Ok(0) => return Err(closed_during_handshake()),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(read_error(e)),
        }
    }
}

fn skip_body<T: Read>(io: &mut T, buf: &mut BytesMut, len: usize) -> Result<()> {
    let buffered = len.min(buf.len());
    let _ = buf.split_to(buffered);
    let mut remaining = len - buffered;
    let mut chunk = [0u8; READ_CHUNK];
    while remaining > 0 {
        let want = remaining.min(READ_CHUNK);
        match io.read(&mut chunk[..want]) {
            Ok(0) => return Err(closed_during_handshake()),
            Ok(n) => remaining -= n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(read_error(e)),
        }
    }
    Ok(())
}

fn closed_during_handshake() -> Error {
    Error::InvalidHandshake("connection closed during handshake".into())
}

/// The transport is blocking here, so `WouldBlock` means the read timeout expired.
fn read_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::WouldBlock => Error::Timeout,
        _ => e.into(),
    }
}
