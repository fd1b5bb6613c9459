//! Close status codes and close frame payloads as defined in RFC 6455.

use crate::error::{Error, Result};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away, e.g. server shutdown.
    GoingAway,
    /// Protocol error (1002). Endpoint received a malformed frame.
    ProtocolError,
    /// Unacceptable payload (1003). Endpoint received a data type it cannot handle.
    UnsupportedData,
    /// Malformed payload (1007), e.g. non-UTF-8 data in a text frame.
    InvalidPayload,
    /// Policy violation (1008).
    PolicyViolation,
    /// Payload too big (1009).
    MessageTooBig,
    /// Extension required (1010). Client expected the server to negotiate an extension.
    MandatoryExtension,
    /// Unexpected condition (1011).
    InternalError,
    /// Any other code (3000-4999 for applications, 1012-1014 registered, or reserved).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this close code is reserved and MUST NOT be sent in a Close frame.
    ///
    /// Reserved codes per RFC 6455 Section 7.4.1: 1004, 1005 (no status received),
    /// 1006 (abnormal closure) and 1015 (TLS handshake failure).
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self.as_u16(), 1004..=1006 | 1015)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode::from_u16(code)
    }
}

/// Decoded payload of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason for closing (UTF-8, max 123 bytes).
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame with the given code and reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Build the wire payload: 2-byte big-endian status code followed by the reason.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for reserved codes
    /// - `Error::ControlFrameTooLarge` if the reason does not fit in a control frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.code.is_reserved() {
            return Err(Error::InvalidCloseCode(self.code.as_u16()));
        }
        let len = 2 + self.reason.len();
        if len > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(len as u64));
        }
        let mut payload = Vec::with_capacity(len);
        payload.extend_from_slice(&self.code.as_u16().to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        Ok(payload)
    }

    /// Parse a received close payload.
    ///
    /// Returns `None` for an empty payload (no status code). A one-byte payload or a
    /// reason that is not UTF-8 is reported as a protocol error close.
    #[must_use]
    pub fn decode(payload: &[u8]) -> Option<Self> {
        match payload.len() {
            0 => None,
            1 => Some(CloseFrame::new(CloseCode::ProtocolError, "Invalid close frame")),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                match std::str::from_utf8(&payload[2..]) {
                    Ok(reason) => Some(CloseFrame::new(CloseCode::from_u16(code), reason)),
                    Err(_) => Some(CloseFrame::new(CloseCode::InvalidPayload, "")),
                }
            }
        }
    }
}
