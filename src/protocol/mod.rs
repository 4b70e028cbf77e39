//! Memcached ASCII Protocol Implementation
//!
//! This module provides the text protocol spoken between memcached clients
//! and an `mcwire` server.
//!
//! ## Overview
//!
//! Commands are CRLF-terminated text lines. Store commands are followed by a
//! raw payload whose length is declared on the command line, so reading a
//! request switches from line framing to fixed-length framing mid-command.
//!
//! ## Modules
//!
//! - `types`: `Item`, `StorageCommand`, `Response` and its encoder
//! - `parser`: command-line grammar and payload validation
//!
//! ## Example
//!
//! ```
//! use mcwire::protocol::{parse_command, Command, Item, Response};
//!
//! // Parsing an incoming command line
//! let command = parse_command(b"get name").unwrap();
//! assert_eq!(command, Command::Get { keys: vec!["name".to_string()] });
//!
//! // Creating responses
//! let response = Response::item(Item::new("name", 0, "Ariz"));
//! assert_eq!(response.serialize(), b"VALUE name 0 4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{
    parse_command, split_payload, strip_line_terminator, ChunkError, Command, ParseResult,
    ProtocolError,
};
pub use types::{Item, Response, Status, StorageCommand};
