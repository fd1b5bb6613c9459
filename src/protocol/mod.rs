//! WebSocket protocol core (RFC 6455): framing, masking, handshake messages.

pub mod auth;
pub mod flags;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod validation;

pub use auth::{AuthScheme, Authenticator, Credentials};
pub use flags::FrameFlags;
pub use frame::{FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, MAX_HEADER_LEN, encode_frame};
pub use handshake::{
    ClientRequest, HandshakeRequest, HandshakeResponse, WEBSOCKET_VERSION, WS_GUID,
    compute_accept_key,
};
pub use mask::{apply_mask, apply_mask_fast};
pub use opcode::OpCode;
pub use validation::FrameValidator;
