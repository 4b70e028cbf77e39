//! # mcwire - A memcached Text-Protocol Server Core
//!
//! mcwire speaks the ASCII memcached protocol and delegates every command
//! to a handler you supply. It holds no data of its own: storage and
//! eviction are the handler's business, and a handler only implements the
//! commands it supports.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               mcwire                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐            │
//! │  │   Server    │───>│ Connection  │───>│  RequestHandler  │            │
//! │  │ (Listener)  │    │ (per client)│    │ (capabilities)   │            │
//! │  └─────────────┘    └──────┬──────┘    └──────────────────┘            │
//! │                            │                                            │
//! │              ┌─────────────┼──────────────┐                             │
//! │              ▼             ▼              ▼                             │
//! │      ┌─────────────┐ ┌──────────┐ ┌───────────────┐                     │
//! │      │   Parser    │ │ Response │ │ StatsRegistry │                     │
//! │      │             │ │ Encoder  │ │  (counters)   │                     │
//! │      └─────────────┘ └──────────┘ └───────────────┘                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use mcwire::{Server, ServerConfig};
//! use mcwire::storage::{start_expiry_sweeper, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&store));
//!
//!     let server = Server::new(ServerConfig::with_addr(":11211"), store);
//!     server.listen_and_serve().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `get <key>*` (needs [`handler::Getter`])
//! - `set <key> <flags> <exptime> <bytes> [noreply]` (needs [`handler::Setter`])
//! - `delete <key> [noreply]` (needs [`handler::Deleter`])
//! - `stats`
//! - `quit`
//!
//! A command whose capability is missing is answered with `ERROR`.
//!
//! ## Module Overview
//!
//! - [`protocol`]: command-line parser and response encoder
//! - [`handler`]: capability traits a handler implements
//! - [`connection`]: per-client state machine
//! - [`server`]: accept loop
//! - [`stats`]: statistics registry and serialized counters
//! - [`config`]: server settings
//! - [`storage`]: an in-memory reference handler

pub mod config;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{ServerConfig, DEFAULT_ADDR};
pub use connection::{handle_connection, Connection, ConnectionError};
pub use handler::{Deleter, Getter, HandlerError, RequestHandler, Setter, StatsHandler};
pub use protocol::{Command, Item, ProtocolError, Response, Status};
pub use server::{listen_and_serve, Server, ServerError};
pub use stats::{Counter, StatsRegistry};

/// Version reported by the `version` statistic
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
