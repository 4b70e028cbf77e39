//! Connection Module
//!
//! This module runs the protocol state machine for one client. Each client
//! connection is handled by its own async task, so a slow client never blocks
//! the accept loop or other clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Server                              │
//! │                    (server module)                          │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept() + spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Connection                             │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────┐  │
//! │  │ Read line   │───>│ Parse line  │───>│ Read data block │  │
//! │  └─────────────┘    └─────────────┘    │   (set only)    │  │
//! │         ▲                              └────────┬────────┘  │
//! │         │                                       ▼           │
//! │  ┌─────────────┐                       ┌─────────────────┐  │
//! │  │ Write resp  │<──────────────────────│ Call handler    │  │
//! │  └─────────────┘                       └─────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Pipelining**: several commands may arrive in one packet; they are
//!   answered in order
//! - **Resync**: a malformed data block costs one `CLIENT_ERROR`, not the
//!   connection
//! - **Statistics**: every byte read and written is counted

pub mod handler;
pub mod rewind;

pub use handler::{handle_connection, Connection, ConnectionError};
pub use rewind::Rewind;
