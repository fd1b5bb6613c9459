//! Configuration and limits for WebSocket connections and reactor pools.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::auth::Credentials;

/// Resource limits for WebSocket connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size accepted by `receive_frame`.
    ///
    /// Default: unbounded (`usize::MAX`)
    pub max_payload_size: usize,

    /// Maximum size of an HTTP handshake head in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_payload_size: usize::MAX,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_payload_size: usize, max_handshake_size: usize) -> Self {
        Self {
            max_payload_size,
            max_handshake_size,
        }
    }

    /// Validate that an announced payload length is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooBig`] if `size` exceeds the configured maximum.
    pub const fn check_payload_size(&self, size: u64) -> Result<()> {
        if size > self.max_payload_size as u64 {
            Err(Error::PayloadTooBig {
                size,
                max: self.max_payload_size as u64,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeouts applied to blocking transports.
///
/// `None` means wait forever. Timeouts have no effect on non-blocking transports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to complete the upgrade handshake.
    pub handshake: Option<Duration>,
    /// Maximum time `receive_frame` blocks waiting for data.
    pub receive: Option<Duration>,
    /// Maximum time `send_frame` blocks waiting for the transport.
    pub send: Option<Duration>,
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(
        handshake: Option<Duration>,
        receive: Option<Duration>,
        send: Option<Duration>,
    ) -> Self {
        Self {
            handshake,
            receive,
            send,
        }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Transport timeouts for blocking mode.
    pub timeouts: Timeouts,

    /// Accept unmasked frames from clients (server only).
    ///
    /// RFC 6455 requires clients to mask all frames. Setting this to `true`
    /// violates the RFC but helps with lenient peers.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Size of a single `read` from the transport (in bytes).
    ///
    /// Default: 8 KB (8192)
    pub read_chunk_size: usize,

    /// Credentials for HTTP authentication during the handshake.
    ///
    /// Server side: requests must authenticate with these credentials.
    /// Client side: used to answer a `401` challenge.
    /// Default: None
    pub credentials: Option<Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            accept_unmasked_frames: false,
            read_chunk_size: 8192,
            credentials: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for the server role.
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Configuration for the client role.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the maximum payload size accepted by `receive_frame`.
    #[must_use]
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.limits.max_payload_size = size;
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the per-read chunk size.
    #[must_use]
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Accept unmasked client frames (server only).
    #[must_use]
    pub fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Set handshake credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Configuration of an acceptor's reactor pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker reactors.
    ///
    /// Default: number of available processors
    pub size: usize,

    /// Name prefix for worker threads; workers are named `<prefix>#<index>`.
    ///
    /// Default: "reactor"
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let size = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            size,
            thread_name: "reactor".to_string(),
        }
    }
}

impl PoolConfig {
    /// Pool with `size` reactors.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Name of the worker thread at `index`.
    #[must_use]
    pub fn worker_name(&self, index: usize) -> String {
        format!("{}#{}", self.thread_name, index)
    }

    /// Validate the pool size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPoolSize`] if `size` is zero.
    pub const fn validate(&self) -> Result<()> {
        if self.size == 0 {
            Err(Error::InvalidPoolSize(self.size))
        } else {
            Ok(())
        }
    }
}
