//! Connection Handler Module
//!
//! This module drives one client connection. Each client gets its own task
//! that runs a strictly sequential read-parse-dispatch-write loop.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!          ┌─────────────────────────────────────────┐
//!          ▼                                         │
//!   ReadingCommand ──(set)──> ReadingPayload ──┐     │
//!          │                                   │     │
//!          ├──(get/delete/stats)──> Dispatching│     │
//!          │                           │       ▼     │
//!          │                           └──> WritingResponse
//!          │
//!          └──(EOF / quit / cancel)──> Closed
//! ```
//!
//! ## Two-Phase Framing
//!
//! A `set` line announces `<bytes>` bytes of raw data plus CRLF. After
//! parsing the line, the connection switches from line reads to one
//! fixed-length read. If that block is short or not CRLF-terminated, the
//! client gets `CLIENT_ERROR bad chunk data`. When the block already holds a
//! newline, the next command starts right after it and the bytes read past it
//! are pushed back into the reader. Otherwise the rest of the current line is
//! thrown away, so the next command starts on a line boundary again.

use crate::config::ServerConfig;
use crate::connection::rewind::Rewind;
use crate::handler::{HandlerError, RequestHandler};
use crate::protocol::parser::{self, ChunkError, Command, ProtocolError};
use crate::protocol::types::{self, status, Status, StorageCommand, CRLF};
use crate::protocol::{Item, Response};
use crate::stats::{names, StatsRegistry};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{
    self, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter, ReadHalf, WriteHalf,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Reason sent when a command line exceeds the configured limit
const LINE_TOO_LONG: &str = "line too long";

/// Reason sent when a payload exceeds the configured limit
const OBJECT_TOO_LARGE: &str = "object too large for cache";

/// What the loop does after a request.
enum Flow {
    Continue,
    Close,
}

/// Outcome of reading one command line.
enum Line {
    /// `self.line` holds a full line, terminator included
    Complete,
    /// The line exceeded the limit and has been discarded
    TooLong,
    /// The stream ended
    Eof,
}

/// Handles a single client connection.
///
/// Generic over the stream so tests can drive it through an in-memory pipe.
pub struct Connection<S> {
    /// Buffered read side; sized so payloads up to the buffer size need
    /// no reallocation
    reader: Rewind<BufReader<ReadHalf<S>>>,

    /// Buffered write side
    writer: BufWriter<WriteHalf<S>>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// The handler commands are dispatched to (shared)
    handler: Arc<dyn RequestHandler>,

    /// Server statistics (shared)
    stats: Arc<StatsRegistry>,

    /// Child of the server-wide token
    cancel: CancellationToken,

    max_line_len: usize,
    max_value_len: usize,

    /// Current command line
    line: Vec<u8>,

    /// Encoded response waiting to be written
    out: Vec<u8>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The client stream
    /// * `addr` - The client's socket address
    /// * `handler` - The handler commands are dispatched to
    /// * `stats` - Shared server statistics
    /// * `config` - Buffer sizes and limits
    /// * `cancel` - Token that closes this connection when cancelled
    pub fn new(
        stream: S,
        addr: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        stats: Arc<StatsRegistry>,
        config: &ServerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = io::split(stream);

        Self {
            reader: Rewind::new(BufReader::with_capacity(config.read_buffer_size, read_half)),
            writer: BufWriter::with_capacity(config.write_buffer_size, write_half),
            addr,
            handler,
            stats,
            cancel,
            max_line_len: config.max_line_len,
            max_value_len: config.max_value_len,
            line: Vec::with_capacity(1024),
            out: Vec::with_capacity(4096),
        }
    }

    /// Runs the connection until the client quits, the stream ends, or the
    /// server cancels it.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");
        self.stats.increment(names::TOTAL_CONNECTIONS, 1).await;
        self.stats.increment(names::CURR_CONNECTIONS, 1).await;

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Cancelled) => {
                debug!(client = %self.addr, "Connection closed by server shutdown")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        let _ = self.writer.shutdown().await;
        self.stats.decrement(names::CURR_CONNECTIONS, 1).await;
        result
    }

    /// The main read-dispatch-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        let cancel = self.cancel.clone();

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                line = self.read_line() => line?,
            };

            let flow = match line {
                Line::Eof => return Ok(()),
                Line::TooLong => {
                    self.send_response(&Response::client_error(LINE_TOO_LONG))
                        .await?;
                    Flow::Continue
                }
                Line::Complete => {
                    let parsed = parser::parse_command(parser::strip_line_terminator(&self.line));
                    match parsed {
                        Ok(command) => {
                            trace!(client = %self.addr, command = command.name(), "Parsed command");
                            self.dispatch(command).await?
                        }
                        Err(e) => self.reject(e).await?,
                    }
                }
            };

            if let Flow::Close = flow {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<Flow, ConnectionError> {
        match command {
            Command::Get { keys } => self.handle_get(keys).await,
            Command::Set(cmd) => self.handle_set(cmd).await,
            Command::Delete { key, noreply } => self.handle_delete(key, noreply).await,
            Command::Stats => self.handle_stats().await,
            Command::Quit => Ok(Flow::Close),
        }
    }

    /// `get <key>+`: one lookup per key, hits written in order, then `END`.
    async fn handle_get(&mut self, keys: Vec<String>) -> Result<Flow, ConnectionError> {
        let handler = Arc::clone(&self.handler);
        let Some(getter) = handler.as_getter() else {
            return self.reject(ProtocolError::Unsupported("get")).await;
        };

        let mut results = Vec::with_capacity(keys.len());
        for key in &keys {
            self.stats.increment(names::CMD_GET, 1).await;

            let response = getter.get(&self.cancel, key).await;
            let outcome = if response.is_some() {
                names::GET_HITS
            } else {
                names::GET_MISSES
            };
            self.stats.increment(outcome, 1).await;
            results.push(response);
        }

        self.out.clear();
        Response::Bulk(results).serialize_into(&mut self.out);
        self.out.extend_from_slice(status::END);
        self.write_out().await?;
        Ok(Flow::Continue)
    }

    /// `set`: read the payload block, then store inline or detached.
    async fn handle_set(&mut self, cmd: StorageCommand) -> Result<Flow, ConnectionError> {
        let block_len = cmd.length.saturating_add(CRLF.len());

        if cmd.length > self.max_value_len {
            debug!(client = %self.addr, key = %cmd.key, bytes = cmd.length, "Value too large");
            self.swallow(block_len).await?;
            self.send_response(&Response::server_error(OBJECT_TOO_LARGE))
                .await?;
            return Ok(Flow::Continue);
        }

        let handler = Arc::clone(&self.handler);
        let Some(setter) = handler.as_setter() else {
            // Keep the stream aligned even though the command is refused
            self.swallow(block_len).await?;
            return self.reject(ProtocolError::Unsupported("set")).await;
        };

        let value = match self.read_payload(cmd.length).await? {
            Ok(value) => value,
            Err((e, block)) => {
                debug!(client = %self.addr, key = %cmd.key, error = %e, "Bad data chunk");
                self.send_response(&Response::client_error(ChunkError::REASON))
                    .await?;
                self.resync(&block).await?;
                return Ok(Flow::Continue);
            }
        };

        self.stats.increment(names::CMD_SET, 1).await;
        let noreply = cmd.noreply;
        let item = cmd.into_item(value);

        if noreply {
            tokio::spawn(store_detached(Arc::clone(&handler), self.cancel.clone(), item));
            return Ok(Flow::Continue);
        }

        match setter.set(&self.cancel, item).await {
            Some(response) => self.send_response(&response).await?,
            None => self.send_response(&Response::Status(Status::Stored)).await?,
        }
        Ok(Flow::Continue)
    }

    /// `delete <key> [noreply]`
    async fn handle_delete(&mut self, key: String, noreply: bool) -> Result<Flow, ConnectionError> {
        let handler = Arc::clone(&self.handler);
        let Some(deleter) = handler.as_deleter() else {
            return self.reject(ProtocolError::Unsupported("delete")).await;
        };

        self.stats.increment(names::CMD_DELETE, 1).await;

        let response = match deleter.delete(&self.cancel, &key).await {
            Ok(()) => {
                self.stats.increment(names::DELETE_HITS, 1).await;
                Response::Status(Status::Deleted)
            }
            Err(HandlerError::NotFound) => {
                self.stats.increment(names::DELETE_MISSES, 1).await;
                Response::Status(Status::NotFound)
            }
            Err(HandlerError::Server(reason)) => {
                warn!(client = %self.addr, key = %key, error = %reason, "Delete failed");
                Response::server_error(reason)
            }
        };

        if !noreply {
            self.send_response(&response).await?;
        }
        Ok(Flow::Continue)
    }

    /// `stats`: one `STAT` line per registered metric, then `END`.
    async fn handle_stats(&mut self) -> Result<Flow, ConnectionError> {
        let snapshot = self.stats.snapshot().await;

        self.out.clear();
        for (name, value) in &snapshot {
            types::serialize_stat(&mut self.out, name, value);
        }
        self.out.extend_from_slice(status::END);
        self.write_out().await?;
        Ok(Flow::Continue)
    }

    /// Answers a protocol error with `ERROR`.
    async fn reject(&mut self, error: ProtocolError) -> Result<Flow, ConnectionError> {
        debug!(client = %self.addr, error = %error, "Protocol error");
        self.out.clear();
        self.out.extend_from_slice(status::ERROR);
        self.write_out().await?;
        Ok(Flow::Continue)
    }

    /// Reads one line into `self.line`, bounded by the line limit.
    async fn read_line(&mut self) -> Result<Line, ConnectionError> {
        self.line.clear();

        let limit = (self.max_line_len + CRLF.len()) as u64;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.line)
            .await?;

        if n == 0 {
            return Ok(Line::Eof);
        }
        self.stats.increment(names::BYTES_READ, n as i64).await;

        if self.line.last() == Some(&b'\n') {
            return Ok(Line::Complete);
        }

        if n as u64 == limit {
            let discarded = self.discard_line().await?;
            self.stats
                .increment(names::BYTES_READ, discarded as i64)
                .await;
            debug!(client = %self.addr, bytes = n + discarded, "Command line too long");
            return Ok(Line::TooLong);
        }

        // The stream ended in the middle of a line
        Ok(Line::Eof)
    }

    /// Reads exactly `length + 2` bytes, or whatever arrives before EOF, and
    /// validates it as a data block.
    async fn read_payload(
        &mut self,
        length: usize,
    ) -> Result<Result<Bytes, (ChunkError, BytesMut)>, ConnectionError> {
        let mut block = BytesMut::zeroed(length + CRLF.len());

        let mut filled = 0;
        while filled < block.len() {
            let n = self.reader.read(&mut block[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        block.truncate(filled);

        self.stats.increment(names::BYTES_READ, filled as i64).await;
        trace!(client = %self.addr, bytes = filled, "Read data block");

        Ok(parser::split_payload(&mut block, length).map_err(|e| (e, block)))
    }

    /// Realigns the stream after a bad data block.
    ///
    /// If the block holds a newline, the next command starts right after the
    /// first one and whatever was read past it is pushed back. Otherwise the
    /// rest of the current line is discarded.
    async fn resync(&mut self, block: &[u8]) -> Result<(), ConnectionError> {
        match block.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let excess = &block[pos + 1..];
                self.reader.unread(excess);
                // Counted again when read as part of the next line
                self.stats
                    .decrement(names::BYTES_READ, excess.len() as i64)
                    .await;
                trace!(client = %self.addr, bytes = excess.len(), "Pushed back after bad block");
            }
            None => {
                let discarded = self.discard_line().await?;
                self.stats
                    .increment(names::BYTES_READ, discarded as i64)
                    .await;
            }
        }
        Ok(())
    }

    /// Discards input up to and including the next newline.
    async fn discard_line(&mut self) -> io::Result<usize> {
        let mut discarded = 0;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(discarded);
            }

            let (consumed, found) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            };
            self.reader.consume(consumed);
            discarded += consumed;

            if found {
                return Ok(discarded);
            }
        }
    }

    /// Discards exactly `n` bytes (or up to EOF).
    async fn swallow(&mut self, n: usize) -> Result<(), ConnectionError> {
        let swallowed = io::copy(&mut (&mut self.reader).take(n as u64), &mut io::sink()).await?;
        self.stats
            .increment(names::BYTES_READ, swallowed as i64)
            .await;
        Ok(())
    }

    async fn send_response(&mut self, response: &Response) -> Result<(), ConnectionError> {
        self.out.clear();
        response.serialize_into(&mut self.out);
        self.write_out().await
    }

    /// Writes and flushes `self.out`, counting the bytes.
    async fn write_out(&mut self) -> Result<(), ConnectionError> {
        self.writer.write_all(&self.out).await?;
        self.writer.flush().await?;
        self.stats
            .increment(names::BYTES_WRITTEN, self.out.len() as i64)
            .await;
        trace!(client = %self.addr, bytes = self.out.len(), "Sent response");
        Ok(())
    }
}

/// Runs a `noreply` store on its own task; the result is dropped.
async fn store_detached(handler: Arc<dyn RequestHandler>, cancel: CancellationToken, item: Item) {
    let key = item.key.clone();
    if let Some(setter) = handler.as_setter() {
        if let Some(response) = setter.set(&cancel, item).await {
            trace!(key = %key, response = ?response, "Discarded noreply store response");
        }
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The server-wide token was cancelled
    #[error("connection cancelled")]
    Cancelled,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a [`Connection`] and runs it
/// to completion, logging anything unexpected.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    stats: Arc<StatsRegistry>,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let connection = Connection::new(stream, addr, handler, stats, &config, cancel);
    if let Err(e) = connection.run().await {
        match e {
            ConnectionError::Cancelled => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
