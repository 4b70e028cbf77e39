//! Server Statistics
//!
//! This module holds the per-server operational metrics reported by the
//! `stats` command.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   StatsRegistry                      │
//! │   (key set fixed at construction, shared via Arc)    │
//! │                                                      │
//! │  pid / version ........ Static                       │
//! │  uptime ............... Timer                        │
//! │  time / rusage_* ...... Computed (sampled on render) │
//! │  cmd_get / bytes_* .... Counter ──> apply task       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The registry is an ordinary value passed to the server and every
//! connection, so tests can build an isolated one per case.

pub mod counter;
pub mod registry;

pub use counter::{Counter, DEFAULT_QUEUE_CAPACITY};
pub use registry::{names, Sample, Stat, StatsRegistry, StatsRegistryBuilder};
