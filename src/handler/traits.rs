//! Handler Capabilities
//!
//! The server holds no data. Everything a command does is delegated to a
//! user-supplied [`RequestHandler`], which opts into the commands it supports
//! by exposing capability traits:
//!
//! | Capability | Trait | Commands |
//! |------------|-------|----------|
//! | fetch | [`Getter`] | `get` |
//! | store | [`Setter`] | `set` |
//! | delete | [`Deleter`] | `delete` |
//! | statistics | [`StatsHandler`] | receives the server's registry at startup |
//!
//! The connection asks for a capability right before executing a command. A
//! handler without it answers that command with `ERROR\r\n`, the same as a
//! malformed line, so a read-only proxy only implements [`Getter`].
//!
//! Handler methods are called concurrently from every connection task and
//! must be safe to call that way.
//!
//! ## Example
//!
//! ```
//! use async_trait::async_trait;
//! use mcwire::handler::{Getter, RequestHandler};
//! use mcwire::protocol::{Item, Response};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Getter for Greeter {
//!     async fn get(&self, _cancel: &CancellationToken, key: &str) -> Option<Response> {
//!         Some(Response::item(Item::new(key, 0, format!("hello {}", key))))
//!     }
//! }
//!
//! impl RequestHandler for Greeter {
//!     fn as_getter(&self) -> Option<&dyn Getter> {
//!         Some(self)
//!     }
//! }
//!
//! assert!(Greeter.capabilities().fetch);
//! assert!(!Greeter.capabilities().store);
//! ```

use crate::protocol::{Item, Response};
use crate::stats::StatsRegistry;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors a handler reports back to the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The key does not exist; answered with `NOT_FOUND`
    #[error("not found")]
    NotFound,

    /// The handler failed; answered with `SERVER_ERROR <reason>`
    #[error("{0}")]
    Server(String),
}

/// Answers `get`.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Looks up `key`. `None` is a miss.
    ///
    /// A hit is normally [`Response::Item`], but any response is written
    /// as-is before the closing `END`.
    async fn get(&self, cancel: &CancellationToken, key: &str) -> Option<Response>;
}

/// Answers `set`.
#[async_trait]
pub trait Setter: Send + Sync {
    /// Stores `item`. Returning `None` answers `STORED`; anything else is
    /// written instead.
    ///
    /// For `noreply` requests the call runs on its own task and the result is
    /// discarded.
    async fn set(&self, cancel: &CancellationToken, item: Item) -> Option<Response>;
}

/// Answers `delete`.
#[async_trait]
pub trait Deleter: Send + Sync {
    /// Removes `key`. `Ok` answers `DELETED`.
    async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<(), HandlerError>;
}

/// Receives the server's statistics registry.
pub trait StatsHandler: Send + Sync {
    /// Called once when the server starts serving. The handler may keep the
    /// registry and update item counters such as `curr_items`.
    fn stats(&self, registry: Arc<StatsRegistry>);
}

/// The handler a server dispatches to.
///
/// Every capability accessor defaults to `None`; override the ones the
/// handler supports to return `Some(self)`.
pub trait RequestHandler: Send + Sync + 'static {
    fn as_getter(&self) -> Option<&dyn Getter> {
        None
    }

    fn as_setter(&self) -> Option<&dyn Setter> {
        None
    }

    fn as_deleter(&self) -> Option<&dyn Deleter> {
        None
    }

    fn as_stats_handler(&self) -> Option<&dyn StatsHandler> {
        None
    }

    /// Summarizes which capabilities this handler exposes.
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            fetch: self.as_getter().is_some(),
            store: self.as_setter().is_some(),
            delete: self.as_deleter().is_some(),
            stats: self.as_stats_handler().is_some(),
        }
    }
}

/// The capability set of a handler, for logging and checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub fetch: bool,
    pub store: bool,
    pub delete: bool,
    pub stats: bool,
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.fetch, "fetch"),
            (self.store, "store"),
            (self.delete, "delete"),
            (self.stats, "stats"),
        ]
        .iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(","))
        }
    }
}
