//! The byte-0 view of a frame: FIN, RSV1-3 and the opcode nibble.

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::OpCode;

/// FIN, reserved bits and opcode of a frame, exactly as they appear in byte 0.
///
/// Passed to `send_frame` and returned by `receive_frame`. `FrameFlags::NONE` (all
/// zero) is what `receive_frame` reports when the peer shut the connection down.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Final fragment bit.
    pub const FIN: u8 = 0x80;
    /// Reserved bit 1.
    pub const RSV1: u8 = 0x40;
    /// Reserved bit 2.
    pub const RSV2: u8 = 0x20;
    /// Reserved bit 3.
    pub const RSV3: u8 = 0x10;
    /// All three reserved bits.
    pub const RSV_MASK: u8 = 0x70;
    /// Opcode nibble.
    pub const OPCODE_MASK: u8 = 0x0F;

    /// No flags; reported on orderly peer shutdown.
    pub const NONE: FrameFlags = FrameFlags(0);
    /// Complete text message.
    pub const TEXT: FrameFlags = FrameFlags(Self::FIN | OpCode::Text.as_u8());
    /// Complete binary message.
    pub const BINARY: FrameFlags = FrameFlags(Self::FIN | OpCode::Binary.as_u8());
    /// Close control frame.
    pub const CLOSE: FrameFlags = FrameFlags(Self::FIN | OpCode::Close.as_u8());
    /// Ping control frame.
    pub const PING: FrameFlags = FrameFlags(Self::FIN | OpCode::Ping.as_u8());
    /// Pong control frame.
    pub const PONG: FrameFlags = FrameFlags(Self::FIN | OpCode::Pong.as_u8());

    /// Flags for an opcode with the given FIN bit and no reserved bits.
    #[must_use]
    pub const fn new(fin: bool, opcode: OpCode) -> Self {
        let fin = if fin { Self::FIN } else { 0 };
        FrameFlags(fin | opcode.as_u8())
    }

    /// Wrap a raw byte 0. No validation happens here.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        FrameFlags(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_fin(self) -> bool {
        self.0 & Self::FIN != 0
    }

    /// The three reserved bits, still in their byte-0 positions.
    #[inline]
    #[must_use]
    pub const fn rsv(self) -> u8 {
        self.0 & Self::RSV_MASK
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Decode the opcode nibble.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedOpcode`] for reserved values.
    pub const fn opcode(self) -> Result<OpCode> {
        OpCode::from_u8(self.0 & Self::OPCODE_MASK)
    }

    /// Check the rules every frame must satisfy before it is put on the wire or
    /// handed to the caller: no reserved bits, a defined opcode, and for control
    /// opcodes FIN set and at most 125 bytes of payload.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet`
    /// - `Error::ReservedOpcode`
    /// - `Error::FragmentedControlFrame`
    /// - `Error::ControlFrameTooLarge`
    pub fn validate(self, payload_len: u64) -> Result<OpCode> {
        if self.rsv() != 0 {
            return Err(Error::ReservedBitsSet);
        }
        let opcode = self.opcode()?;
        if opcode.is_control() {
            if payload_len > crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD as u64 {
                return Err(Error::ControlFrameTooLarge(payload_len));
            }
            if !self.is_fin() {
                return Err(Error::FragmentedControlFrame);
            }
        }
        Ok(opcode)
    }
}

impl From<u8> for FrameFlags {
    fn from(bits: u8) -> Self {
        FrameFlags(bits)
    }
}

impl From<FrameFlags> for u8 {
    fn from(flags: FrameFlags) -> Self {
        flags.0
    }
}

impl fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Ok(opcode) => write!(
                f,
                "FrameFlags({:#04x}, fin={}, rsv={:#x}, {})",
                self.0,
                self.is_fin(),
                self.rsv() >> 4,
                opcode
            ),
            Err(_) => write!(f, "FrameFlags({:#04x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_flags() {
        assert_eq!(FrameFlags::TEXT.bits(), 0x81);
        assert_eq!(FrameFlags::BINARY.bits(), 0x82);
        assert_eq!(FrameFlags::PING.bits(), 0x89);
        assert_eq!(FrameFlags::new(false, OpCode::Continuation).bits(), 0x00);
        assert!(FrameFlags::NONE.is_empty());
    }

    #[test]
    fn test_accessors() {
        let flags = FrameFlags::from_bits(0xC2);
        assert!(flags.is_fin());
        assert_eq!(flags.rsv(), FrameFlags::RSV1);
        assert_eq!(flags.opcode().unwrap(), OpCode::Binary);
    }

    #[test]
    fn test_validate_rejects_rsv_for_every_opcode() {
        for opcode in [0x0, 0x1, 0x2, 0x8, 0x9, 0xA] {
            for rsv in [FrameFlags::RSV1, FrameFlags::RSV2, FrameFlags::RSV3] {
                let flags = FrameFlags::from_bits(FrameFlags::FIN | rsv | opcode);
                assert_eq!(flags.validate(0), Err(Error::ReservedBitsSet));
            }
        }
    }

    #[test]
    fn test_validate_control_rules() {
        assert_eq!(FrameFlags::PING.validate(125).unwrap(), OpCode::Ping);
        assert_eq!(
            FrameFlags::PING.validate(126),
            Err(Error::ControlFrameTooLarge(126))
        );
        assert_eq!(
            FrameFlags::new(false, OpCode::Close).validate(2),
            Err(Error::FragmentedControlFrame)
        );
        assert_eq!(
            FrameFlags::new(false, OpCode::Pong).validate(126),
            Err(Error::ControlFrameTooLarge(126))
        );
    }

    #[test]
    fn test_validate_reserved_opcode() {
        assert_eq!(
            FrameFlags::from_bits(0x83).validate(0),
            Err(Error::ReservedOpcode(0x3))
        );
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(
            format!("{:?}", FrameFlags::TEXT),
            "FrameFlags(0x81, fin=true, rsv=0x0, Text)"
        );
    }
}
