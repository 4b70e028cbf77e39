//! Server Configuration
//!
//! Plain settings consumed by [`Server`](crate::server::Server) and each
//! connection. The binary fills these from command-line flags.

use crate::stats::DEFAULT_QUEUE_CAPACITY;

/// Default listen address (all interfaces, memcached's port)
pub const DEFAULT_ADDR: &str = ":11211";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on. A leading `:` means all interfaces.
    pub addr: String,
    /// Read buffer per connection; payloads up to this size are read
    /// without growing it
    pub read_buffer_size: usize,
    /// Write buffer per connection
    pub write_buffer_size: usize,
    /// Longest accepted command line, excluding its terminator
    pub max_line_len: usize,
    /// Largest accepted `set` payload
    pub max_value_len: usize,
    /// Pending deltas each statistics counter absorbs before callers wait
    pub counter_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            read_buffer_size: 1024 * 1024,
            write_buffer_size: 64 * 1024,
            max_line_len: 1024 * 1024,
            max_value_len: 1024 * 1024,
            counter_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Creates a default configuration listening on `addr`.
    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    /// Returns the address to bind, expanding `:port` to `0.0.0.0:port`.
    /// An empty address means [`DEFAULT_ADDR`].
    pub fn bind_address(&self) -> String {
        let addr = if self.addr.is_empty() {
            DEFAULT_ADDR
        } else {
            self.addr.as_str()
        };

        match addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => addr.to_string(),
        }
    }
}
