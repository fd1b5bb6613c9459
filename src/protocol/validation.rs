//! Per-connection checks on incoming frame headers.
//!
//! [`FrameHeader::decode`](crate::protocol::FrameHeader::decode) enforces the rules
//! every frame must satisfy. This module adds the ones that depend on who is
//! receiving: masking direction (RFC 6455 Section 5.1) and payload limits.

use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::FrameHeader;

/// Frame validator for incoming WebSocket frames.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
    accept_unmasked_frames: bool,
}

impl FrameValidator {
    /// Create a new frame validator for the receiving side `role`.
    #[must_use]
    pub fn new(role: Role, limits: Limits) -> Self {
        Self {
            role,
            limits,
            accept_unmasked_frames: false,
        }
    }

    /// Accept unmasked frames on the server side (not RFC compliant).
    #[must_use]
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Current maximum payload size.
    #[must_use]
    pub fn max_payload_size(&self) -> usize {
        self.limits.max_payload_size
    }

    /// Change the maximum payload size.
    pub fn set_max_payload_size(&mut self, size: usize) {
        self.limits.max_payload_size = size;
    }

    /// Validate an incoming header before any payload byte is read.
    ///
    /// `capacity` is the room left in the caller's buffer, or `None` when the
    /// destination grows on demand.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` - Server received unmasked frame from client
    /// - `Error::MaskedServerFrame` - Client received masked frame from server
    /// - `Error::PayloadTooBig` - Payload exceeds the limit or the buffer capacity
    pub fn validate_incoming(&self, header: &FrameHeader, capacity: Option<usize>) -> Result<()> {
        self.validate_masking(header.mask.is_some())?;
        self.limits.check_payload_size(header.payload_len)?;
        if let Some(capacity) = capacity {
            if header.payload_len > capacity as u64 {
                return Err(Error::PayloadTooBig {
                    size: header.payload_len,
                    max: capacity as u64,
                });
            }
        }
        Ok(())
    }

    fn validate_masking(&self, masked: bool) -> Result<()> {
        match self.role {
            Role::Server if !masked && !self.accept_unmasked_frames => {
                Err(Error::UnmaskedClientFrame)
            }
            Role::Client if masked => Err(Error::MaskedServerFrame),
            _ => Ok(()),
        }
    }
}
