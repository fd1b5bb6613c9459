//! Frame header encoding and decoding (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                   Masking key (if MASK set)                   |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! Everything here is pure: no I/O, no blocking mode. The connection layer feeds
//! bytes in and drains encoded bytes out.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::FrameFlags;
use crate::protocol::mask::apply_mask_fast;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest possible header: 2 + 8 (64-bit length) + 4 (masking key).
pub const MAX_HEADER_LEN: usize = 14;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// FIN, RSV1-3 and opcode.
    pub flags: FrameFlags,
    /// Masking key, present iff the MASK bit is set.
    pub mask: Option<[u8; 4]>,
    /// Payload length in bytes (at most 2^63 - 1).
    pub payload_len: u64,
}

impl FrameHeader {
    /// Create a header for a payload of `payload_len` bytes.
    #[must_use]
    pub const fn new(flags: FrameFlags, mask: Option<[u8; 4]>, payload_len: u64) -> Self {
        Self {
            flags,
            mask,
            payload_len,
        }
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold the complete header, otherwise the
    /// header and the number of bytes it occupies. Reserved bits are checked before the
    /// opcode, and control-frame rules are enforced as soon as the length is known.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` if any RSV bit is set
    /// - `Error::ReservedOpcode` for an undefined opcode
    /// - `Error::InvalidPayloadLength` if the 64-bit length has its MSB set
    /// - `Error::ControlFrameTooLarge` / `Error::FragmentedControlFrame` for control frames
    pub fn decode(buf: &[u8]) -> Result<Option<(FrameHeader, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let flags = FrameFlags::from_bits(buf[0]);
        let masked = buf[1] & 0x80 != 0;
        let len7 = buf[1] & 0x7F;

        let (payload_len, mut offset) = match len7 {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(bytes);
                if len & (1 << 63) != 0 {
                    return Err(Error::InvalidPayloadLength(len));
                }
                (len, 10)
            }
            small => (u64::from(small), 2),
        };

        flags.validate(payload_len)?;

        let mask = if masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some((
            FrameHeader {
                flags,
                mask,
                payload_len,
            },
            offset,
        )))
    }

    /// Number of bytes [`encode`](Self::encode) writes.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        header_len(self.payload_len, self.mask.is_some())
    }

    /// Append the encoded header to `dst`, using the shortest length form.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.flags.bits());

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        if self.payload_len <= MAX_CONTROL_FRAME_PAYLOAD as u64 {
            dst.put_u8(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= u64::from(u16::MAX) {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(self.payload_len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(self.payload_len);
        }

        if let Some(key) = self.mask {
            dst.put_slice(&key);
        }
    }
}

/// Header length for a payload of `payload_len` bytes.
#[must_use]
pub const fn header_len(payload_len: u64, masked: bool) -> usize {
    let base = if payload_len <= MAX_CONTROL_FRAME_PAYLOAD as u64 {
        2
    } else if payload_len <= u16::MAX as u64 {
        4
    } else {
        10
    };
    if masked { base + 4 } else { base }
}

/// Encode a complete frame (header and payload, masked when `mask` is set) into `dst`.
///
/// # Errors
///
/// Returns the [`FrameFlags::validate`] errors; nothing is written in that case.
pub fn encode_frame(
    flags: FrameFlags,
    payload: &[u8],
    mask: Option<[u8; 4]>,
    dst: &mut BytesMut,
) -> Result<()> {
    flags.validate(payload.len() as u64)?;

    let header = FrameHeader::new(flags, mask, payload.len() as u64);
    dst.reserve(header.encoded_len() + payload.len());
    header.encode(dst);

    let start = dst.len();
    dst.put_slice(payload);
    if let Some(key) = mask {
        apply_mask_fast(&mut dst[start..], key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn decode_all(buf: &[u8]) -> (FrameHeader, usize) {
        FrameHeader::decode(buf).unwrap().expect("complete header")
    }

    // --------------------------------------------------------------------------
    // Test 1: Unmasked text frame
    // --------------------------------------------------------------------------
    #[test]
    fn test_decode_unmasked_text_header() {
        let data = &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let (header, len) = decode_all(data);
        assert_eq!(len, 2);
        assert!(header.flags.is_fin());
        assert_eq!(header.flags.opcode().unwrap(), OpCode::Text);
        assert_eq!(header.mask, None);
        assert_eq!(header.payload_len, 5);
    }

    // --------------------------------------------------------------------------
    // Test 2: Masked text frame (RFC 6455 Section 5.7)
    // --------------------------------------------------------------------------
    #[test]
    fn test_decode_masked_header() {
        let data = &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (header, len) = decode_all(data);
        assert_eq!(len, 6);
        assert_eq!(header.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(header.payload_len, 5);
    }

    // --------------------------------------------------------------------------
    // Test 3: Extended lengths
    // --------------------------------------------------------------------------
    #[test]
    fn test_decode_16bit_length() {
        let data = &[0x82, 0x7E, 0x01, 0x00];
        let (header, len) = decode_all(data);
        assert_eq!(len, 4);
        assert_eq!(header.payload_len, 256);
    }

    #[test]
    fn test_decode_64bit_length() {
        let data = &[0x82, 0x7F, 0, 0, 0, 0, 0, 1, 0, 0];
        let (header, len) = decode_all(data);
        assert_eq!(len, 10);
        assert_eq!(header.payload_len, 65536);
    }

    #[test]
    fn test_decode_64bit_length_msb_set() {
        let data = &[0x82, 0x7F, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            FrameHeader::decode(data),
            Err(Error::InvalidPayloadLength(_))
        ));
    }

    // --------------------------------------------------------------------------
    // Test 4: Incomplete headers
    // --------------------------------------------------------------------------
    #[test]
    fn test_decode_incomplete() {
        assert_eq!(FrameHeader::decode(&[]).unwrap(), None);
        assert_eq!(FrameHeader::decode(&[0x81]).unwrap(), None);
        assert_eq!(FrameHeader::decode(&[0x82, 0x7E, 0x01]).unwrap(), None);
        assert_eq!(FrameHeader::decode(&[0x82, 0x7F, 0, 0, 0]).unwrap(), None);
        assert_eq!(FrameHeader::decode(&[0x81, 0x85, 0x37, 0xfa]).unwrap(), None);
    }

    // --------------------------------------------------------------------------
    // Test 5: Protocol violations
    // --------------------------------------------------------------------------
    #[test]
    fn test_decode_reserved_bits() {
        assert_eq!(FrameHeader::decode(&[0xC1, 0x00]), Err(Error::ReservedBitsSet));
        // RSV is reported even when the opcode is also reserved.
        assert_eq!(FrameHeader::decode(&[0x93, 0x00]), Err(Error::ReservedBitsSet));
    }

    #[test]
    fn test_decode_reserved_opcode() {
        assert_eq!(FrameHeader::decode(&[0x8B, 0x00]), Err(Error::ReservedOpcode(0xB)));
    }

    #[test]
    fn test_decode_control_frame_126_rejected_regardless_of_fin() {
        for byte0 in [0x89, 0x09, 0x88, 0x0A] {
            let data = [byte0, 0x7E, 0x00, 0x7E];
            assert!(FrameHeader::decode(&data).unwrap_err().is_protocol());
        }
    }

    #[test]
    fn test_decode_fragmented_control() {
        assert_eq!(
            FrameHeader::decode(&[0x09, 0x00]),
            Err(Error::FragmentedControlFrame)
        );
    }

    // --------------------------------------------------------------------------
    // Test 6: Encoding
    // --------------------------------------------------------------------------
    #[test]
    fn test_encode_unmasked_frame() {
        let mut buf = BytesMut::new();
        encode_frame(FrameFlags::TEXT, b"Hello", None, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn test_encode_masked_frame_matches_rfc() {
        let mut buf = BytesMut::new();
        encode_frame(FrameFlags::TEXT, b"Hello", Some([0x37, 0xfa, 0x21, 0x3d]), &mut buf)
            .unwrap();
        assert_eq!(
            &buf[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_encode_length_forms() {
        for (len, expected_header) in [(125, 2), (126, 4), (65535, 4), (65536, 10)] {
            let payload = vec![0u8; len];
            let mut buf = BytesMut::new();
            encode_frame(FrameFlags::BINARY, &payload, None, &mut buf).unwrap();
            assert_eq!(buf.len(), expected_header + len);
            assert_eq!(header_len(len as u64, false), expected_header);
            assert_eq!(header_len(len as u64, true), expected_header + 4);
        }
    }

    #[test]
    fn test_encode_rejects_invalid_flags_without_writing() {
        let mut buf = BytesMut::new();
        let result = encode_frame(FrameFlags::from_bits(0xC1), b"x", None, &mut buf);
        assert_eq!(result, Err(Error::ReservedBitsSet));
        assert!(buf.is_empty());

        let result = encode_frame(FrameFlags::PING, &[0u8; 126], None, &mut buf);
        assert_eq!(result, Err(Error::ControlFrameTooLarge(126)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(FrameFlags::BINARY, Some([1, 2, 3, 4]), 70000);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), header.encoded_len());
        assert_eq!(decode_all(&buf), (header, MAX_HEADER_LEN));
    }
}
