//! Memcached text protocol request encoder and response line grammars.
//!
//! Implements the client side of the memcached text protocol subset:
//! - Retrieval: get (single key)
//! - Storage: set (flags always 0)
//! - Deletion: delete
//! - Introspection: stats, stats <type>, stats items, stats cachedump
//!
//! Every request is a single CRLF-terminated line, except `set` which is
//! followed by its data block and a trailing CRLF.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::{ClientError, ClientResult};

/// Maximum key length allowed by memcached protocol
pub const MAX_KEY_LENGTH: usize = 250;

/// Largest data block accepted in a VALUE reply (memcached's 1 MiB default
/// item size can be raised to at most 1 GiB)
pub const MAX_VALUE_LENGTH: usize = 1024 * 1024 * 1024;

/// Longest response line accepted, terminator included
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Server metrics keyed by name.
pub type StatsMap = BTreeMap<String, String>;

/// Request to be written to the server
#[derive(Debug, Clone, PartialEq)]
pub enum Command<'a> {
    /// Fetch a single key
    Get { key: &'a str },

    /// Store a value (flags are always 0)
    Set {
        key: &'a str,
        exptime: i64,
        data: &'a [u8],
    },

    /// Delete a key
    Delete { key: &'a str },

    /// General statistics, or a named statistics group
    Stats { kind: Option<&'a str> },

    /// Per-slab item statistics
    StatsItems,

    /// List items resident in one slab (limit 0 = server default)
    CacheDump { slab_id: &'a str, limit: u32 },
}

impl Command<'_> {
    /// Short name used in log output
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Set { .. } => "set",
            Command::Delete { .. } => "delete",
            Command::Stats { .. } => "stats",
            Command::StatsItems => "stats items",
            Command::CacheDump { .. } => "stats cachedump",
        }
    }

    /// Append the exact wire form of this command to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Command::Get { key } => {
                buf.put_slice(format!("get {}\r\n", key).as_bytes());
            }
            Command::Set { key, exptime, data } => {
                buf.reserve(data.len() + 64);
                buf.put_slice(format!("set {} 0 {} {}\r\n", key, exptime, data.len()).as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            Command::Delete { key } => {
                buf.put_slice(format!("delete {}\r\n", key).as_bytes());
            }
            Command::Stats { kind: None } => {
                buf.put_slice(b"stats\r\n");
            }
            Command::Stats { kind: Some(kind) } => {
                buf.put_slice(format!("stats {}\r\n", kind).as_bytes());
            }
            Command::StatsItems => {
                buf.put_slice(b"stats items\r\n");
            }
            Command::CacheDump { slab_id, limit } => {
                buf.put_slice(format!("stats cachedump {} {}\r\n", slab_id, limit).as_bytes());
            }
        }
    }
}

/// Check that a key can travel on a command line without breaking framing.
pub fn validate_key(key: &str) -> ClientResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH || !is_token(key) {
        return Err(ClientError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Check a single-word argument such as a slab id.
pub fn validate_token(name: &'static str, value: &str) -> ClientResult<()> {
    if value.is_empty() || !is_token(value) {
        return Err(ClientError::InvalidArgument {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Check a stats group name. Spaces are allowed (`stats detail dump`), line
/// breaks and other control characters are not.
pub fn validate_stats_kind(kind: &str) -> ClientResult<()> {
    if kind.trim().is_empty() || kind.chars().any(|c| c.is_control()) {
        return Err(ClientError::InvalidArgument {
            name: "stats type",
            value: kind.to_string(),
        });
    }
    Ok(())
}

fn is_token(value: &str) -> bool {
    value
        .bytes()
        .all(|b| !b.is_ascii_whitespace() && !b.is_ascii_control())
}

/// Parsed `VALUE <key> <flags> <bytes>` header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueHeader<'a> {
    pub key: &'a str,
    pub flags: u32,
    pub len: usize,
}

/// Parse a VALUE header. Any other shape, including a missing length field,
/// a trailing CAS token or a length above `MAX_VALUE_LENGTH`, yields `None`.
pub fn parse_value_header(line: &str) -> Option<ValueHeader<'_>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 4 || parts[0] != "VALUE" {
        return None;
    }
    Some(ValueHeader {
        key: parts[1],
        flags: parts[2].parse().ok()?,
        len: parts[3]
            .parse()
            .ok()
            .filter(|len| *len <= MAX_VALUE_LENGTH)?,
    })
}

/// Returns true for the `END` terminator of listings and retrievals
pub fn is_end(line: &str) -> bool {
    line.starts_with("END")
}

/// Returns the error text if the line is an ERROR, CLIENT_ERROR or
/// SERVER_ERROR reply.
pub fn server_error(line: &str) -> Option<&str> {
    if line.starts_with("ERROR")
        || line.starts_with("CLIENT_ERROR")
        || line.starts_with("SERVER_ERROR")
    {
        Some(line.trim())
    } else {
        None
    }
}

/// Parse `STAT <name> <value...>`. Multi-word values are rejoined with
/// single spaces.
pub fn parse_stat_line(line: &str) -> Option<(&str, String)> {
    if !line.starts_with("STAT ") {
        return None;
    }
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    Some((parts[1], parts[2..].join(" ")))
}

/// Extract the slab id from `STAT items:<slab_id>:<field> <value>`.
pub fn parse_items_slab_id(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("STAT items:")?;
    let (slab_id, _) = rest.split_once(':')?;
    if slab_id.is_empty() {
        return None;
    }
    Some(slab_id)
}

/// An item reported by `stats cachedump`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub key: String,
    /// Size in bytes as reported by the server, brackets stripped
    pub size: String,
    /// Raw expiry value as reported by the server
    pub expiry: String,
}

impl CacheItem {
    /// Interpret the raw expiry as a unix timestamp.
    ///
    /// Returns `None` for non-numeric or non-positive values.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs: i64 = self.expiry.parse().ok()?;
        if secs <= 0 {
            return None;
        }
        DateTime::<Utc>::from_timestamp(secs, 0)
    }
}

/// Parse a cachedump line.
///
/// Accepts the form memcached emits, `ITEM <key> [<size> b; <expiry> s]`,
/// and the plain `ITEM <key> [<size>] <expiry>`.
pub fn parse_item_line(line: &str) -> Option<CacheItem> {
    let rest = line.strip_prefix("ITEM ")?.trim_start();
    let (key, rest) = rest.split_once(char::is_whitespace)?;
    let rest = rest.trim();

    if let Some(inner) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        if let Some((size_part, expiry_part)) = inner.split_once(';') {
            return Some(CacheItem {
                key: key.to_string(),
                size: size_part.split_whitespace().next()?.to_string(),
                expiry: expiry_part.split_whitespace().next()?.to_string(),
            });
        }
    }

    let mut fields = rest.split_whitespace();
    let size = fields.next()?.trim_matches(|c| c == '[' || c == ']');
    let expiry = fields.next()?;
    Some(CacheItem {
        key: key.to_string(),
        size: size.to_string(),
        expiry: expiry.to_string(),
    })
}

/// Key of an `ITEM <key> ...` line. Only the key is required.
pub fn parse_item_key(line: &str) -> Option<&str> {
    let mut fields = line.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some("ITEM"), Some(key)) => Some(key),
        _ => None,
    }
}

/// Outcome of a `delete`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The key existed and was removed
    Deleted,
    /// The key was not present
    NotFound,
}
