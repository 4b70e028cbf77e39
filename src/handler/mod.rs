//! Request Handler Module
//!
//! This module defines the boundary between the protocol core and the code
//! that actually stores data.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │   Connection    │  (connection module)
//! └────────┬────────┘
//!          │  capability check
//!          ▼
//! ┌─────────────────┐
//! │ RequestHandler  │  (this module)
//! │                 │
//! │  - Getter       │
//! │  - Setter       │
//! │  - Deleter      │
//! │  - StatsHandler │
//! └────────┬────────┘
//!          │
//!          ▼
//!   user storage / proxy / anything
//! ```

pub mod traits;

pub use traits::{
    Capabilities, Deleter, Getter, HandlerError, RequestHandler, Setter, StatsHandler,
};
