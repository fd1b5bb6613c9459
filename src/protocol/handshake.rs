//! WebSocket handshake messages (RFC 6455 Section 4).
//!
//! Parsing and serialization of the HTTP heads exchanged during the upgrade. Driving
//! the exchange over a transport lives in [`crate::connection::upgrade`].

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this crate speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// Headers that must not appear twice in a request.
const SECURITY_HEADERS: [&str; 5] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// First value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the comma-separated header `name` contains `token` (case-insensitive).
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.0
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Append a header.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        for (name, value) in &self.0 {
            validate_header_value(name, value)?;
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        Ok(())
    }
}

/// Parse header lines until the empty line that ends the head.
///
/// # Errors
///
/// Returns `Error::InvalidHandshake` for a line without a colon, or a duplicated
/// header listed in `security_headers`.
fn parse_headers<'a, I>(lines: I, security_headers: &[&str]) -> Result<Headers>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = Headers::default();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHandshake(format!("Malformed header line: {line}")))?;
        let name = name.trim();

        if security_headers.iter().any(|h| h.eq_ignore_ascii_case(name))
            && headers.get(name).is_some()
        {
            return Err(Error::InvalidHandshake(format!("Duplicate header: {name}")));
        }

        headers.push(name, value.trim());
    }

    Ok(headers)
}

fn validate_header_value(name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) || name.contains(['\r', '\n', ':']) {
        return Err(Error::InvalidHandshake(format!(
            "Header {name} contains CR or LF characters"
        )));
    }
    Ok(())
}

fn head_text(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))
}

/// Length of the HTTP head at the start of `buf`, including the terminating blank
/// line, or `None` if it is not complete yet.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsmux::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a fresh Sec-WebSocket-Key: base64 of 16 random bytes.
///
/// # Errors
///
/// Returns a transport error if the system random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(std::io::Error::from)?;
    Ok(BASE64.encode(nonce))
}

/// Parsed HTTP request head received by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request method.
    pub method: String,
    /// Request target (e.g. "/chat").
    pub path: String,
    /// All request headers, in order.
    pub headers: Headers,
}

impl HandshakeRequest {
    /// Parse a request head.
    ///
    /// Only the request line and header syntax are checked here; WebSocket
    /// semantics are checked by [`validate`](Self::validate).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the head is not UTF-8, the request
    /// line is malformed, the version is not HTTP/1.1, or a security-critical header
    /// is duplicated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut lines = head_text(data)?.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, path, version] = parts[..] else {
            return Err(Error::InvalidHandshake(format!(
                "Invalid request line: {request_line}"
            )));
        };
        if version != "HTTP/1.1" {
            return Err(Error::InvalidHandshake(format!(
                "Expected HTTP/1.1, got {version}"
            )));
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: parse_headers(lines, &SECURITY_HEADERS)?,
        })
    }

    /// Check the request is a valid version 13 upgrade and return its key.
    ///
    /// Checks run in a fixed order: upgrade tokens, then version, then key.
    ///
    /// # Errors
    ///
    /// - `Error::NoHandshake` without `Upgrade: websocket` and `Connection: upgrade`
    /// - `Error::NoVersion` / `Error::UnsupportedVersion`
    /// - `Error::NoKey` if the key is missing or does not decode to 16 bytes
    pub fn validate(&self) -> Result<&str> {
        if !self.headers.has_token("upgrade", "websocket") {
            return Err(Error::NoHandshake("missing Upgrade: websocket".into()));
        }
        if !self.headers.has_token("connection", "upgrade") {
            return Err(Error::NoHandshake("missing Connection: Upgrade".into()));
        }
        if !self.method.eq_ignore_ascii_case("GET") {
            return Err(Error::NoHandshake(format!("method {} is not GET", self.method)));
        }

        let version = self
            .headers
            .get("sec-websocket-version")
            .ok_or(Error::NoVersion)?;
        if version != WEBSOCKET_VERSION {
            return Err(Error::UnsupportedVersion(version.to_string()));
        }

        let key = self
            .headers
            .get("sec-websocket-key")
            .ok_or_else(|| Error::NoKey("missing".into()))?;
        match BASE64.decode(key) {
            Ok(decoded) if decoded.len() == 16 => Ok(key),
            Ok(decoded) => Err(Error::NoKey(format!(
                "decodes to {} bytes, expected 16",
                decoded.len()
            ))),
            Err(_) => Err(Error::NoKey("not valid base64".into())),
        }
    }

    /// Offered subprotocols, in preference order.
    #[must_use]
    pub fn protocols(&self) -> Vec<&str> {
        self.headers
            .get("sec-websocket-protocol")
            .map(|p| p.split(',').map(str::trim).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.headers.get("origin")
    }

    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.headers.get("authorization")
    }
}

/// Upgrade request written by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Request target.
    pub path: String,
    /// Host header value.
    pub host: String,
    /// Sec-WebSocket-Key; fresh for every request.
    pub key: String,
    /// Extra headers (Origin, Sec-WebSocket-Protocol, ...).
    pub headers: Headers,
}

impl ClientRequest {
    /// Create a request for `path` on `host` with a freshly generated key.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the system random source is unavailable.
    pub fn new(path: impl Into<String>, host: impl Into<String>) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            host: host.into(),
            key: generate_key()?,
            headers: Headers::default(),
        })
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Offer subprotocols.
    #[must_use]
    pub fn with_protocols(self, protocols: &[&str]) -> Self {
        self.with_header("Sec-WebSocket-Protocol", protocols.join(", "))
    }

    /// Replace the key with a fresh one, for a retried request.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the system random source is unavailable.
    pub fn regenerate_key(&mut self) -> Result<()> {
        self.key = generate_key()?;
        Ok(())
    }

    /// Serialize the request head, with an optional `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` if a header contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>, authorization: Option<&str>) -> Result<()> {
        validate_header_value("Host", &self.host)?;
        if self.path.contains(char::is_whitespace) {
            return Err(Error::InvalidHandshake(format!("Invalid path: {}", self.path)));
        }
        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(
            format!("Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n").as_bytes(),
        );
        if let Some(authorization) = authorization {
            validate_header_value("Authorization", authorization)?;
            buf.extend_from_slice(format!("Authorization: {authorization}\r\n").as_bytes());
        }
        self.headers.write(buf)?;
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// HTTP response head: the server's 101/401/4xx answer, or what a client received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Response headers, in order.
    pub headers: Headers,
}

impl HandshakeResponse {
    /// Create a response with no headers.
    #[must_use]
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Headers::default(),
        }
    }

    /// `101 Switching Protocols` accepting `key`, optionally selecting `protocol`.
    #[must_use]
    pub fn switching_protocols(key: &str, protocol: Option<&str>) -> Self {
        let mut response = Self::new(101, "Switching Protocols")
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Accept", compute_accept_key(key));
        if let Some(protocol) = protocol {
            response.headers.push("Sec-WebSocket-Protocol", protocol);
        }
        response
    }

    /// Build the 101 response for a validated request, echoing its first subprotocol.
    ///
    /// # Errors
    ///
    /// Returns the [`HandshakeRequest::validate`] errors.
    pub fn from_request(req: &HandshakeRequest) -> Result<Self> {
        let key = req.validate()?;
        Ok(Self::switching_protocols(key, req.protocols().first().copied()))
    }

    /// `401 Unauthorized` carrying `challenge` in `WWW-Authenticate`.
    #[must_use]
    pub fn unauthorized(challenge: impl Into<String>) -> Self {
        Self::new(401, "Unauthorized")
            .with_header("WWW-Authenticate", challenge)
            .with_header("Content-Length", "0")
    }

    /// Minimal error response that closes the connection.
    #[must_use]
    pub fn error(status: u16, reason: impl Into<String>) -> Self {
        Self::new(status, reason)
            .with_header("Connection", "close")
            .with_header("Content-Length", "0")
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Serialize the response head.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` if a header contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        validate_header_value("status", &self.reason)?;
        buf.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes());
        self.headers.write(buf)?;
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Parse a response head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the data is not UTF-8 or the status line
    /// is malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut lines = head_text(data)?.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        let mut parts = status_line.splitn(3, ' ');
        let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
            return Err(Error::InvalidHandshake(format!(
                "Invalid status line: {status_line}"
            )));
        };
        if !version.starts_with("HTTP/1.") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid status line: {status_line}"
            )));
        }
        let status = code
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid status code: {code}")))?;

        Ok(Self {
            status,
            reason: parts.next().unwrap_or_default().to_string(),
            headers: parse_headers(lines, &[])?,
        })
    }

    /// Declared body length, zero when absent or malformed.
    #[must_use]
    pub fn content_length(&self) -> usize {
        self.headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Check this response completes an upgrade requested with `key`.
    ///
    /// # Errors
    ///
    /// - `Error::NoHandshake` for a non-101 status or missing upgrade tokens
    /// - `Error::AcceptMismatch` if `Sec-WebSocket-Accept` is missing or wrong
    pub fn verify_upgrade(&self, key: &str) -> Result<()> {
        if self.status != 101 {
            return Err(Error::NoHandshake(format!(
                "server responded {} {}",
                self.status, self.reason
            )));
        }
        if !self.headers.has_token("upgrade", "websocket")
            || !self.headers.has_token("connection", "upgrade")
        {
            return Err(Error::NoHandshake(
                "response lacks Upgrade/Connection tokens".into(),
            ));
        }
        match self.headers.get("sec-websocket-accept") {
            Some(accept) if accept == compute_accept_key(key) => Ok(()),
            _ => Err(Error::AcceptMismatch),
        }
    }

    /// Subprotocol selected by the server.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.headers.get("sec-websocket-protocol")
    }
}
