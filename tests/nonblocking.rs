//! Resumable send and receive over a transport that moves one byte per call and
//! stalls on every other call.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::Shutdown;
use std::time::Duration;

use bytes::BytesMut;
use wsmux::protocol::encode_frame;
use wsmux::{
    Config, ConnectionState, Error, FrameFlags, Progress, Result, Role, Transport, WebSocket,
};

const KEY: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];

#[derive(Default)]
struct Throttled {
    input: VecDeque<u8>,
    output: Vec<u8>,
    stall_next: bool,
    eof: bool,
    reads: usize,
}

impl Throttled {
    fn with_input(bytes: &[u8]) -> Self {
        Self {
            input: bytes.iter().copied().collect(),
            stall_next: true,
            ..Self::default()
        }
    }

    fn stall(&mut self) -> bool {
        let stall = self.stall_next;
        self.stall_next = !stall;
        stall
    }
}

impl Read for Throttled {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads += 1;
        if self.stall() {
            return Err(ErrorKind::WouldBlock.into());
        }
        match self.input.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None if self.eof => Ok(0),
            None => Err(ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for Throttled {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stall() {
            return Err(ErrorKind::WouldBlock.into());
        }
        self.output.push(buf[0]);
        Ok(1)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for Throttled {
    fn set_nonblocking(&self, _: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_read_timeout(&self, _: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn set_write_timeout(&self, _: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&self, _: Shutdown) -> io::Result<()> {
        Ok(())
    }
}

fn nonblocking(io: Throttled, role: Role, config: &Config) -> WebSocket<Throttled> {
    let mut ws = WebSocket::from_raw(io, role, config);
    ws.set_blocking(false).unwrap();
    ws
}

fn masked_frame(flags: FrameFlags, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(flags, payload, Some(KEY), &mut buf).unwrap();
    buf.to_vec()
}

/// Repeat `op` until it completes; returns the result and the number of stalls.
fn drive<T>(mut op: impl FnMut() -> Result<Progress<T>>) -> (T, usize) {
    let mut stalls = 0;
    loop {
        match op().unwrap() {
            Progress::Complete(value) => return (value, stalls),
            Progress::WouldBlock => stalls += 1,
        }
        assert!(stalls < 1_000_000, "operation never completed");
    }
}

#[test]
fn test_send_transmits_frame_exactly_once() {
    let payload = vec![0x42u8; 300];
    let mut ws = nonblocking(Throttled::default(), Role::Server, &Config::server());

    let (sent, stalls) = drive(|| ws.send_frame(&payload, FrameFlags::BINARY));
    assert_eq!(sent, payload.len());
    assert!(stalls > 0);
    assert!(!ws.has_pending_send());

    let mut expected = BytesMut::new();
    encode_frame(FrameFlags::BINARY, &payload, None, &mut expected).unwrap();
    assert_eq!(ws.get_ref().output, expected.to_vec());
}

#[test]
fn test_client_send_resumes_with_one_mask() {
    let payload = b"masked and resumed".to_vec();
    let mut ws = nonblocking(Throttled::default(), Role::Client, &Config::client());

    drive(|| ws.send_frame(&payload, FrameFlags::TEXT));

    let output = &ws.get_ref().output;
    assert_eq!(output.len(), 2 + 4 + payload.len());
    assert_eq!(output[1] & 0x80, 0x80);
    let key = [output[2], output[3], output[4], output[5]];
    let unmasked: Vec<u8> = output[6..]
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % 4])
        .collect();
    assert_eq!(unmasked, payload);
}

#[test]
fn test_send_retry_must_match() {
    let mut ws = nonblocking(Throttled::default(), Role::Server, &Config::server());

    assert_eq!(
        ws.send_frame(b"hello", FrameFlags::TEXT).unwrap(),
        Progress::WouldBlock
    );
    assert!(ws.has_pending_send());

    assert!(matches!(
        ws.send_frame(b"hello!", FrameFlags::TEXT),
        Err(Error::RetryMismatch(_))
    ));
    assert!(matches!(
        ws.send_frame(b"hello", FrameFlags::BINARY),
        Err(Error::RetryMismatch(_))
    ));

    let (sent, _) = drive(|| ws.send_frame(b"hello", FrameFlags::TEXT));
    assert_eq!(sent, 5);
    assert_eq!(ws.get_ref().output, b"\x81\x05hello");
}

#[test]
fn test_receive_delivers_only_complete_frames() {
    let frame = masked_frame(FrameFlags::BINARY, &[7u8; 200]);
    let mut ws = nonblocking(Throttled::with_input(&frame), Role::Server, &Config::server());
    let mut buf = vec![0xEEu8; 256];

    let mut stalls = 0;
    let (len, flags) = loop {
        match ws.receive_frame(&mut buf).unwrap() {
            Progress::Complete(result) => break result,
            Progress::WouldBlock => {
                stalls += 1;
                assert!(buf.iter().all(|&b| b == 0xEE), "buffer written before completion");
            }
        }
    };

    assert!(stalls >= frame.len());
    assert_eq!((len, flags), (200, FrameFlags::BINARY));
    assert!(buf[..200].iter().all(|&b| b == 7));
    assert!(buf[200..].iter().all(|&b| b == 0xEE));
    assert!(!ws.has_pending_receive());
}

#[test]
fn test_receive_retry_needs_capacity() {
    let frame = masked_frame(FrameFlags::BINARY, &[1u8; 64]);
    let mut ws = nonblocking(Throttled::with_input(&frame), Role::Server, &Config::server());
    let mut big = vec![0u8; 128];

    // Read until the header has been validated.
    while !ws.has_pending_receive() {
        assert_eq!(ws.receive_frame(&mut big).unwrap(), Progress::WouldBlock);
    }

    let mut small = vec![0u8; 16];
    assert!(matches!(
        ws.receive_frame(&mut small),
        Err(Error::RetryMismatch(_))
    ));

    let ((len, _), _) = drive(|| ws.receive_frame(&mut big));
    assert_eq!(len, 64);
}

#[test]
fn test_oversized_payload_rejected_before_delivery() {
    let frame = masked_frame(FrameFlags::BINARY, &[9u8; 20]);
    let config = Config::server().with_max_payload_size(10);
    let mut ws = nonblocking(Throttled::with_input(&frame), Role::Server, &config);
    let mut buf = vec![0u8; 64];

    let err = loop {
        match ws.receive_frame(&mut buf) {
            Ok(Progress::WouldBlock) => {}
            Ok(Progress::Complete(result)) => panic!("unexpected frame {result:?}"),
            Err(e) => break e,
        }
    };
    assert_eq!(err, Error::PayloadTooBig { size: 20, max: 10 });
    assert!(buf.iter().all(|&b| b == 0));
    assert_eq!(ws.state(), ConnectionState::Closed);
    assert!(!ws.has_pending_receive());
}

#[test]
fn test_empty_ping_then_end_of_stream() {
    let frame = masked_frame(FrameFlags::PING, b"");
    let mut io = Throttled::with_input(&frame);
    io.eof = true;
    let mut ws = nonblocking(io, Role::Server, &Config::server());
    let mut buf = [0u8; 16];

    let (result, _) = drive(|| ws.receive_frame(&mut buf));
    assert_eq!(result, (0, FrameFlags::PING));

    let (result, _) = drive(|| ws.receive_frame(&mut buf));
    assert_eq!(result, (0, FrameFlags::NONE));
    assert_eq!(ws.state(), ConnectionState::Closed);
}

#[test]
fn test_end_of_stream_mid_frame() {
    let frame = masked_frame(FrameFlags::TEXT, b"truncated");
    let mut io = Throttled::with_input(&frame[..frame.len() - 3]);
    io.eof = true;
    let mut ws = nonblocking(io, Role::Server, &Config::server());
    let mut buf = [0u8; 32];

    let err = loop {
        match ws.receive_frame(&mut buf) {
            Ok(Progress::WouldBlock) => {}
            Ok(Progress::Complete(result)) => panic!("unexpected frame {result:?}"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, Error::IncompleteFrame { .. }));
    assert_eq!(ws.state(), ConnectionState::Closed);
}

#[test]
fn test_blocking_stall_is_timeout_and_keeps_progress() {
    let mut ws = WebSocket::from_raw(Throttled::default(), Role::Server, &Config::server());
    assert!(ws.is_blocking());

    let mut timeouts = 0;
    let sent = loop {
        match ws.send_frame(b"slow", FrameFlags::TEXT) {
            Ok(Progress::Complete(n)) => break n,
            Ok(Progress::WouldBlock) => panic!("blocking mode never reports WouldBlock"),
            Err(Error::Timeout) => timeouts += 1,
            Err(e) => panic!("unexpected error {e}"),
        }
    };

    assert_eq!(sent, 4);
    assert!(timeouts > 0);
    assert_eq!(ws.get_ref().output, b"\x81\x04slow");
    assert_eq!(ws.state(), ConnectionState::Open);
}

#[test]
fn test_frames_split_across_reads_stay_ordered() {
    let mut input = masked_frame(FrameFlags::new(false, wsmux::OpCode::Text), b"Hel");
    input.extend(masked_frame(FrameFlags::new(true, wsmux::OpCode::Continuation), b"lo"));
    input.extend(masked_frame(FrameFlags::PONG, b"p"));
    let mut ws = nonblocking(Throttled::with_input(&input), Role::Server, &Config::server());

    let mut message = Vec::new();
    let ((_, first), _) = drive(|| ws.receive_frame_into(&mut message));
    let ((_, second), _) = drive(|| ws.receive_frame_into(&mut message));
    assert!(!first.is_fin());
    assert!(second.is_fin());
    assert_eq!(message, b"Hello");

    let mut buf = [0u8; 4];
    let ((len, flags), _) = drive(|| ws.receive_frame(&mut buf));
    assert_eq!((len, flags, &buf[..1]), (1, FrameFlags::PONG, &b"p"[..]));
    assert!(ws.get_ref().reads > input.len());
}
