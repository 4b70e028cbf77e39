//! Memcached ASCII Command Parser
//!
//! The grammar mixes two framings: every command is a text line, but a `set`
//! line announces a binary payload of `<bytes>` bytes plus CRLF that follows
//! it. This module handles both halves separately, and the connection decides
//! which framing to read next:
//!
//! 1. [`parse_command`] decodes one command line (terminator already removed)
//!    into a [`Command`].
//! 2. [`split_payload`] validates the fixed-length block read after a `set`
//!    line and strips its CRLF.
//!
//! Neither function touches the socket, so the connection alone owns
//! resynchronization after a bad payload.

use crate::protocol::types::{StorageCommand, CRLF, MAX_KEY_LEN};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors in a command line.
///
/// All of these are answered with `ERROR\r\n`; the variants only matter for
/// logging.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Blank line
    #[error("empty command line")]
    EmptyLine,

    /// The first token is not a supported command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Wrong number of arguments for the command
    #[error("wrong number of arguments for '{command}', expected {expected}")]
    WrongArity {
        command: &'static str,
        expected: &'static str,
    },

    /// A numeric field did not parse
    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// The key exceeds [`MAX_KEY_LEN`]
    #[error("key is {0} bytes long (max: {MAX_KEY_LEN})")]
    KeyTooLong(usize),

    /// The key contains control characters
    #[error("key contains control characters")]
    InvalidKey,

    /// The line is not valid UTF-8
    #[error("invalid UTF-8 in command line")]
    InvalidUtf8,

    /// The handler lacks the capability the command needs
    #[error("handler does not support '{0}'")]
    Unsupported(&'static str),
}

/// Result type for command-line parsing.
pub type ParseResult<T> = Result<T, ProtocolError>;

/// Errors in a `set` payload block.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// The stream ended before the declared length plus CRLF arrived
    #[error("expected {expected} bytes of data block, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The block did not end in CRLF
    #[error("data block is not terminated by CRLF")]
    MissingTerminator,
}

impl ChunkError {
    /// The reason sent back in the `CLIENT_ERROR` line.
    pub const REASON: &'static str = "bad chunk data";
}

/// A decoded command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `get <key> [<key> ...]`
    Get { keys: Vec<String> },
    /// `set <key> <flags> <exptime> <bytes> [noreply]`
    Set(StorageCommand),
    /// `delete <key> [noreply]`
    Delete { key: String, noreply: bool },
    /// `stats`
    Stats,
    /// `quit`
    Quit,
}

impl Command {
    /// The command word, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Set(_) => "set",
            Command::Delete { .. } => "delete",
            Command::Stats => "stats",
            Command::Quit => "quit",
        }
    }
}

const NOREPLY: &str = "noreply";

/// Parses one command line.
///
/// `line` must not include its terminator (see [`strip_line_terminator`]).
/// Command words are case-sensitive, as in memcached.
pub fn parse_command(line: &[u8]) -> ParseResult<Command> {
    let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
    let mut tokens = line.split_ascii_whitespace();

    let name = tokens.next().ok_or(ProtocolError::EmptyLine)?;
    match name {
        "get" => {
            let keys = tokens
                .map(|key| validate_key(key).map(str::to_string))
                .collect::<ParseResult<Vec<_>>>()?;
            if keys.is_empty() {
                return Err(ProtocolError::WrongArity {
                    command: "get",
                    expected: "at least one key",
                });
            }
            Ok(Command::Get { keys })
        }
        "set" => parse_storage_args(tokens).map(Command::Set),
        "delete" => parse_delete_args(tokens),
        // fixed-shape commands: the whole line must be the command word
        "stats" if line == "stats" => Ok(Command::Stats),
        "quit" if line == "quit" => Ok(Command::Quit),
        "stats" => Err(ProtocolError::WrongArity {
            command: "stats",
            expected: "no arguments",
        }),
        "quit" => Err(ProtocolError::WrongArity {
            command: "quit",
            expected: "no arguments",
        }),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

/// Parses `<key> <flags> <exptime> <bytes> [noreply]`.
fn parse_storage_args<'a>(tokens: impl Iterator<Item = &'a str>) -> ParseResult<StorageCommand> {
    let fields: Vec<&str> = tokens.collect();

    let noreply = match fields.len() {
        4 => false,
        5 if fields[4] == NOREPLY => true,
        _ => {
            return Err(ProtocolError::WrongArity {
                command: "set",
                expected: "<key> <flags> <exptime> <bytes> [noreply]",
            })
        }
    };

    Ok(StorageCommand {
        key: validate_key(fields[0])?.to_string(),
        flags: parse_number(fields[1], "flags")?,
        exptime: parse_number(fields[2], "exptime")?,
        length: parse_number(fields[3], "bytes")?,
        noreply,
    })
}

/// Parses `<key> [noreply]`.
fn parse_delete_args<'a>(tokens: impl Iterator<Item = &'a str>) -> ParseResult<Command> {
    let fields: Vec<&str> = tokens.collect();

    let noreply = match fields.len() {
        1 => false,
        2 if fields[1] == NOREPLY => true,
        _ => {
            return Err(ProtocolError::WrongArity {
                command: "delete",
                expected: "<key> [noreply]",
            })
        }
    };

    Ok(Command::Delete {
        key: validate_key(fields[0])?.to_string(),
        noreply,
    })
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &'static str) -> ParseResult<T> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn validate_key(key: &str) -> ParseResult<&str> {
    if key.len() > MAX_KEY_LEN {
        return Err(ProtocolError::KeyTooLong(key.len()));
    }
    if key.bytes().any(|b| b.is_ascii_control()) {
        return Err(ProtocolError::InvalidKey);
    }
    Ok(key)
}

/// Removes a trailing `\r\n` or bare `\n` from a line.
pub fn strip_line_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Validates a `set` data block and splits the value off its trailing CRLF.
///
/// `block` is everything read for a payload declared as `declared` bytes:
/// it must be exactly `declared + 2` bytes long and end in CRLF. On error the
/// block is left untouched so the caller can resynchronize from it.
pub fn split_payload(block: &mut BytesMut, declared: usize) -> Result<Bytes, ChunkError> {
    let expected = declared + CRLF.len();
    if block.len() != expected {
        return Err(ChunkError::ShortRead {
            expected,
            got: block.len(),
        });
    }
    if !block.ends_with(CRLF) {
        return Err(ChunkError::MissingTerminator);
    }
    let value = block.split_to(declared).freeze();
    block.clear();
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get() {
        assert_eq!(
            parse_command(b"get name").unwrap(),
            Command::Get {
                keys: vec!["name".to_string()]
            }
        );
    }

    #[test]
    fn test_parse_multi_get() {
        assert_eq!(
            parse_command(b"get a b  c").unwrap(),
            Command::Get {
                keys: vec!["a".to_string(), "b".to_string(), "c".to_string()]
            }
        );
    }

    #[test]
    fn test_parse_get_without_key() {
        assert!(matches!(
            parse_command(b"get"),
            Err(ProtocolError::WrongArity { command: "get", .. })
        ));
        assert!(parse_command(b"get ").is_err());
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(
            parse_command(b"set user:101 5 3600 4").unwrap(),
            Command::Set(StorageCommand {
                key: "user:101".to_string(),
                flags: 5,
                exptime: 3600,
                length: 4,
                noreply: false,
            })
        );
    }

    #[test]
    fn test_parse_set_noreply() {
        match parse_command(b"set k 0 -1 10 noreply").unwrap() {
            Command::Set(cmd) => {
                assert!(cmd.noreply);
                assert_eq!(cmd.exptime, -1);
                assert_eq!(cmd.length, 10);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_set_wrong_field_count() {
        assert!(matches!(
            parse_command(b"set k 0 0"),
            Err(ProtocolError::WrongArity { command: "set", .. })
        ));
        assert!(matches!(
            parse_command(b"set k 0 0 1 noreply extra"),
            Err(ProtocolError::WrongArity { .. })
        ));
        // a fifth token that isn't noreply
        assert!(matches!(
            parse_command(b"set k 0 0 1 please"),
            Err(ProtocolError::WrongArity { .. })
        ));
    }

    #[test]
    fn test_parse_set_non_numeric() {
        assert_eq!(
            parse_command(b"set k abc 0 1"),
            Err(ProtocolError::InvalidNumber {
                field: "flags",
                value: "abc".to_string()
            })
        );
        assert!(matches!(
            parse_command(b"set k 0 soon 1"),
            Err(ProtocolError::InvalidNumber { field: "exptime", .. })
        ));
        assert!(matches!(
            parse_command(b"set k 0 0 -5"),
            Err(ProtocolError::InvalidNumber { field: "bytes", .. })
        ));
        // flags are 32-bit
        assert!(matches!(
            parse_command(b"set k 4294967296 0 1"),
            Err(ProtocolError::InvalidNumber { field: "flags", .. })
        ));
    }

    #[test]
    fn test_parse_delete() {
        assert_eq!(
            parse_command(b"delete name").unwrap(),
            Command::Delete {
                key: "name".to_string(),
                noreply: false
            }
        );
        assert_eq!(
            parse_command(b"delete name noreply").unwrap(),
            Command::Delete {
                key: "name".to_string(),
                noreply: true
            }
        );
        assert!(parse_command(b"delete").is_err());
        assert!(parse_command(b"delete a b").is_err());
    }

    #[test]
    fn test_parse_fixed_shape_commands() {
        assert_eq!(parse_command(b"stats").unwrap(), Command::Stats);
        assert_eq!(parse_command(b"quit").unwrap(), Command::Quit);

        assert!(parse_command(b"stats items").is_err());
        assert!(parse_command(b"stats ").is_err());
        assert!(parse_command(b"quit now").is_err());
    }

    #[test]
    fn test_parse_unknown_and_empty() {
        assert_eq!(
            parse_command(b"flush_all"),
            Err(ProtocolError::UnknownCommand("flush_all".to_string()))
        );
        assert_eq!(parse_command(b"GET k"), Err(ProtocolError::UnknownCommand("GET".to_string())));
        assert_eq!(parse_command(b""), Err(ProtocolError::EmptyLine));
        assert_eq!(parse_command(b"   "), Err(ProtocolError::EmptyLine));
        assert_eq!(parse_command(b"get \xff"), Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn test_key_limits() {
        let long_key = format!("get {}", "k".repeat(MAX_KEY_LEN + 1));
        assert_eq!(
            parse_command(long_key.as_bytes()),
            Err(ProtocolError::KeyTooLong(MAX_KEY_LEN + 1))
        );

        let max_key = format!("get {}", "k".repeat(MAX_KEY_LEN));
        assert!(parse_command(max_key.as_bytes()).is_ok());

        assert_eq!(parse_command(b"get a\x01b"), Err(ProtocolError::InvalidKey));
    }

    #[test]
    fn test_strip_line_terminator() {
        assert_eq!(strip_line_terminator(b"get k\r\n"), b"get k");
        assert_eq!(strip_line_terminator(b"get k\n"), b"get k");
        assert_eq!(strip_line_terminator(b"get k"), b"get k");
        assert_eq!(strip_line_terminator(b"\r\n"), b"");
    }

    #[test]
    fn test_split_payload() {
        let mut block = BytesMut::from(&b"hello\r\n"[..]);
        assert_eq!(split_payload(&mut block, 5).unwrap(), Bytes::from("hello"));
        assert!(block.is_empty());

        let mut empty = BytesMut::from(&b"\r\n"[..]);
        assert_eq!(split_payload(&mut empty, 0).unwrap(), Bytes::new());
    }

    #[test]
    fn test_split_payload_binary() {
        let mut block = BytesMut::from(&b"a\r\nb\x00\r\n"[..]);
        assert_eq!(split_payload(&mut block, 5).unwrap(), Bytes::from(&b"a\r\nb\x00"[..]));
    }

    #[test]
    fn test_split_payload_errors() {
        let mut short = BytesMut::from(&b"hel"[..]);
        assert_eq!(
            split_payload(&mut short, 5),
            Err(ChunkError::ShortRead {
                expected: 7,
                got: 3
            })
        );

        let mut unterminated = BytesMut::from(&b"hellowo"[..]);
        assert_eq!(
            split_payload(&mut unterminated, 5),
            Err(ChunkError::MissingTerminator)
        );
        // The failed block is kept for resynchronization
        assert_eq!(&unterminated[..], b"hellowo");
    }
}
