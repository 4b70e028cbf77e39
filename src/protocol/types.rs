//! Memcached ASCII Protocol Data Types
//!
//! This module defines the values that travel through a connection: the
//! [`Item`] handed to a store-capable handler, the transient
//! [`StorageCommand`] decoded from a `set` line, and the [`Response`] a
//! handler hands back for encoding.
//!
//! ## Wire Format
//!
//! Every line is terminated with CRLF (`\r\n`):
//!
//! ```text
//! VALUE <key> <flags> <bytes>\r\n<data>\r\n    item
//! END\r\n                                      end of results
//! STORED\r\n | DELETED\r\n | NOT_FOUND\r\n     status lines
//! ERROR\r\n                                    generic protocol error
//! CLIENT_ERROR <reason>\r\n                    client error
//! SERVER_ERROR <reason>\r\n                    handler failure
//! STAT <name> <value>\r\n                      one statistic
//! ```

use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The CRLF terminator used by every protocol line
pub const CRLF: &[u8] = b"\r\n";

/// Maximum key length accepted on the wire (memcached's limit)
pub const MAX_KEY_LEN: usize = 250;

/// Expiry values up to this many seconds (30 days) are relative to now;
/// anything larger is an absolute Unix timestamp.
pub const RELATIVE_EXPIRY_LIMIT: i64 = 60 * 60 * 24 * 30;

/// Pre-encoded status lines
pub mod status {
    pub const STORED: &[u8] = b"STORED\r\n";
    pub const NOT_STORED: &[u8] = b"NOT_STORED\r\n";
    pub const EXISTS: &[u8] = b"EXISTS\r\n";
    pub const NOT_FOUND: &[u8] = b"NOT_FOUND\r\n";
    pub const DELETED: &[u8] = b"DELETED\r\n";
    pub const END: &[u8] = b"END\r\n";
    pub const ERROR: &[u8] = b"ERROR\r\n";

    pub const VALUE_PREFIX: &[u8] = b"VALUE ";
    pub const STAT_PREFIX: &[u8] = b"STAT ";
    pub const CLIENT_ERROR_PREFIX: &[u8] = b"CLIENT_ERROR ";
    pub const SERVER_ERROR_PREFIX: &[u8] = b"SERVER_ERROR ";
}

/// A cached item.
///
/// Built by the connection from a `set` command and its payload, then owned
/// by the handler. `expires_at` is always absolute: relative expiry values are
/// resolved against the clock when the item is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// The item's key
    pub key: String,
    /// Opaque client flags, echoed back on `get`
    pub flags: u32,
    /// When this item expires (None = never expires)
    pub expires_at: Option<SystemTime>,
    /// The raw payload, exactly as many bytes as the client declared
    pub value: Bytes,
}

impl Item {
    /// Creates an item that never expires.
    pub fn new(key: impl Into<String>, flags: u32, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            flags,
            expires_at: None,
            value: value.into(),
        }
    }

    /// Creates an item from a protocol `exptime` field.
    ///
    /// See [`Item::set_expires`] for how the field is interpreted.
    pub fn with_exptime(
        key: impl Into<String>,
        flags: u32,
        exptime: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        let mut item = Self::new(key, flags, value);
        item.set_expires(exptime);
        item
    }

    /// Sets the expiry from a protocol `exptime` field.
    ///
    /// - `0` never expires
    /// - negative values expire immediately
    /// - up to 30 days: seconds from now
    /// - larger values: absolute Unix time in seconds
    pub fn set_expires(&mut self, exptime: i64) {
        self.expires_at = resolve_exptime(exptime, SystemTime::now());
    }

    /// Checks if this item has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Checks if this item has expired at the given instant.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Converts an `exptime` field into an absolute expiry time.
pub fn resolve_exptime(exptime: i64, now: SystemTime) -> Option<SystemTime> {
    match exptime {
        0 => None,
        t if t < 0 => Some(now),
        t if t <= RELATIVE_EXPIRY_LIMIT => Some(now + Duration::from_secs(t as u64)),
        t => Some(UNIX_EPOCH + Duration::from_secs(t as u64)),
    }
}

/// The decoded arguments of a `set` line.
///
/// Lives only between parsing the command line and reading the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCommand {
    pub key: String,
    pub flags: u32,
    /// Raw `exptime` field, resolved when the item is built
    pub exptime: i64,
    /// Declared payload length, excluding the trailing CRLF
    pub length: usize,
    pub noreply: bool,
}

impl StorageCommand {
    /// Builds the item once the payload has been read and validated.
    pub fn into_item(self, value: Bytes) -> Item {
        Item::with_exptime(self.key, self.flags, self.exptime, value)
    }
}

/// Fixed status lines a handler can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
}

impl Status {
    /// The encoded status line, CRLF included.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Status::Stored => status::STORED,
            Status::NotStored => status::NOT_STORED,
            Status::Exists => status::EXISTS,
            Status::NotFound => status::NOT_FOUND,
            Status::Deleted => status::DELETED,
        }
    }
}

/// A response produced for one request.
///
/// Handlers return these; the connection encodes them straight onto the
/// socket and counts the bytes written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// One item: `VALUE <key> <flags> <bytes>\r\n<data>\r\n`
    Item(Item),

    /// A sequence of responses written in order. `None` entries are skipped.
    Bulk(Vec<Option<Response>>),

    /// `CLIENT_ERROR <reason>\r\n`
    ClientError(String),

    /// `SERVER_ERROR <reason>\r\n`
    ServerError(String),

    /// A fixed status line such as `STORED\r\n`
    Status(Status),
}

impl Response {
    /// Creates an item response.
    pub fn item(item: Item) -> Self {
        Response::Item(item)
    }

    /// Creates a bulk response.
    pub fn bulk(responses: Vec<Option<Response>>) -> Self {
        Response::Bulk(responses)
    }

    /// Creates a client error response.
    ///
    /// # Example
    /// ```
    /// use mcwire::protocol::Response;
    /// let err = Response::client_error("bad chunk data");
    /// assert_eq!(err.serialize(), b"CLIENT_ERROR bad chunk data\r\n");
    /// ```
    pub fn client_error(reason: impl Into<String>) -> Self {
        Response::ClientError(reason.into())
    }

    /// Creates a server error response.
    pub fn server_error(reason: impl Into<String>) -> Self {
        Response::ServerError(reason.into())
    }

    /// Serializes the response to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the response into an existing buffer.
    ///
    /// Returns the exact number of bytes appended; the `bytes_written`
    /// statistic is fed from this value.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        match self {
            Response::Item(item) => {
                buf.extend_from_slice(status::VALUE_PREFIX);
                buf.extend_from_slice(item.key.as_bytes());
                buf.push(b' ');
                buf.extend_from_slice(item.flags.to_string().as_bytes());
                buf.push(b' ');
                buf.extend_from_slice(item.value.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(&item.value);
                buf.extend_from_slice(CRLF);
            }
            Response::Bulk(responses) => {
                for response in responses.iter().flatten() {
                    response.serialize_into(buf);
                }
            }
            Response::ClientError(reason) => {
                buf.extend_from_slice(status::CLIENT_ERROR_PREFIX);
                buf.extend_from_slice(reason.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Response::ServerError(reason) => {
                buf.extend_from_slice(status::SERVER_ERROR_PREFIX);
                buf.extend_from_slice(reason.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Response::Status(status) => {
                buf.extend_from_slice(status.as_bytes());
            }
        }
        buf.len() - start
    }

    /// Returns true if this is an item response.
    pub fn is_item(&self) -> bool {
        matches!(self, Response::Item(_))
    }
}

/// Appends one `STAT <name> <value>\r\n` line, returning its length.
pub fn serialize_stat(buf: &mut Vec<u8>, name: &str, value: &str) -> usize {
    let start = buf.len();
    buf.extend_from_slice(status::STAT_PREFIX);
    buf.extend_from_slice(name.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(CRLF);
    buf.len() - start
}
