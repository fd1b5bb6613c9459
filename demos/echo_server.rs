//! WebSocket echo server on a pool of `PollReactor`s.
//!
//! Run with: `RUST_LOG=debug cargo run --example echo_server`
//! Then connect any WebSocket client to ws://127.0.0.1:9001/.

use std::error::Error;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Weak};
use std::thread;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wsmux::connection::{accept, reject_error};
use wsmux::protocol::OpCode;
use wsmux::reactor::{EventHandler, Interest, Reactor, ReactorSlot, SocketId};
use wsmux::transport::AsSocketId;
use wsmux::{
    Acceptor, Config, ConnectionState, FrameFlags, PollReactor, PoolConfig, Progress, Result,
    ServiceFactory, WebSocket,
};

const ADDR: &str = "127.0.0.1:9001";

enum Stage {
    Handshake(TcpStream),
    Open(WebSocket<TcpStream>),
}

struct Session {
    socket: SocketId,
    reactor: Weak<dyn Reactor>,
    stage: Option<Stage>,
    buf: Vec<u8>,
}

impl Session {
    fn advance(&mut self) -> Result<bool> {
        match self.stage.take() {
            Some(Stage::Handshake(stream)) => match accept(stream, &Config::server()) {
                Ok(mut ws) => {
                    info!(socket = %self.socket, protocol = ?ws.protocol(), "upgraded");
                    ws.set_blocking(false)?;
                    self.stage = Some(Stage::Open(ws));
                    self.echo()
                }
                Err(mut failure) => {
                    warn!(socket = %self.socket, error = %failure.error, "handshake rejected");
                    reject_error(&mut failure.io, &failure.error)?;
                    Ok(false)
                }
            },
            Some(stage) => {
                self.stage = Some(stage);
                self.echo()
            }
            None => Ok(false),
        }
    }

    /// Echo every complete frame; `Ok(false)` once the session is over.
    fn echo(&mut self) -> Result<bool> {
        let Some(Stage::Open(ws)) = &mut self.stage else {
            return Ok(false);
        };
        loop {
            self.buf.clear();
            let (len, flags) = match ws.receive_frame_into(&mut self.buf)? {
                Progress::Complete(frame) => frame,
                Progress::WouldBlock => return Ok(true),
            };
            if len == 0 && flags.is_empty() {
                info!(socket = %self.socket, "peer hung up");
                return Ok(false);
            }

            let reply = match flags.opcode()? {
                OpCode::Ping => FrameFlags::PONG,
                OpCode::Pong => continue,
                _ => flags,
            };
            while ws.send_frame(&self.buf, reply)?.is_would_block() {
                thread::yield_now();
            }
            if ws.state() == ConnectionState::Closed {
                info!(socket = %self.socket, "closed");
                return Ok(false);
            }
        }
    }

    fn finish(&mut self) {
        if let Some(reactor) = self.reactor.upgrade() {
            let _ = reactor.unregister(self.socket);
        }
        self.stage = None;
    }
}

impl EventHandler for Session {
    fn readable(&mut self) {
        match self.advance() {
            Ok(true) => {}
            Ok(false) => self.finish(),
            Err(e) => {
                warn!(socket = %self.socket, error = %e, "session failed");
                self.finish();
            }
        }
    }

    fn error(&mut self) {
        self.finish();
    }
}

struct EchoService;

impl ServiceFactory<TcpStream> for EchoService {
    fn create_handler(&mut self, socket: TcpStream, slot: &ReactorSlot) -> Result<()> {
        let id = socket.socket_id();
        info!(socket = %id, worker = slot.index(), "connection accepted");
        slot.reactor().register(
            id,
            Interest::READABLE,
            Box::new(Session {
                socket: id,
                reactor: Arc::downgrade(slot.reactor()),
                stage: Some(Stage::Handshake(socket)),
                buf: Vec::new(),
            }),
        )
    }
}

fn main() -> std::result::Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let listener = TcpListener::bind(ADDR)?;
    let primary: Arc<dyn Reactor> = Arc::new(PollReactor::new("acceptor")?);
    let pool = PoolConfig::default().with_thread_name("worker");
    info!(addr = ADDR, workers = pool.size, "echo server listening");

    let _acceptor = Acceptor::new(
        listener,
        &pool,
        |_, name| Ok(Arc::new(PollReactor::new(name)?) as Arc<dyn Reactor>),
        EchoService,
        Some(primary),
    )?;

    loop {
        thread::park();
    }
}
