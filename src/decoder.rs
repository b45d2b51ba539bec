//! Response decoding, one routine per command family.
//!
//! Every routine reads from the connection's single buffered reader. The
//! reader must outlive individual calls: bytes buffered past one response
//! belong to the next one.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::io::{self, BufRead, Read};
use tracing::warn;

use crate::error::{ClientError, ClientResult};
use crate::protocol::{
    is_end, parse_item_key, parse_item_line, parse_items_slab_id, parse_stat_line,
    parse_value_header, server_error, CacheItem, DeleteOutcome, StatsMap, MAX_LINE_LENGTH,
};

/// Read one CRLF-terminated line, without its terminator.
///
/// A line longer than `MAX_LINE_LENGTH` is a `MalformedResponse`.
pub fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<String> {
    buf.clear();
    let bytes = reader
        .by_ref()
        .take(MAX_LINE_LENGTH as u64 + 1)
        .read_until(b'\n', buf)?;
    if buf.len() > MAX_LINE_LENGTH {
        let line = String::from_utf8_lossy(&buf[..64]).into_owned();
        warn!(line = %line, limit = MAX_LINE_LENGTH, "Response line too long");
        return Err(ClientError::MalformedResponse { line });
    }
    if bytes == 0 || buf.last() != Some(&b'\n') {
        return Err(ClientError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        )));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(buf).into_owned())
}

/// Decode a single-key `get` response.
///
/// `Ok(None)` is a miss. The VALUE header must name `key`.
pub fn decode_get<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    key: &str,
) -> ClientResult<Option<Bytes>> {
    let line = read_line(reader, buf)?;
    if is_end(&line) {
        return Ok(None);
    }

    let len = parse_value_header(&line)
        .filter(|header| header.key == key)
        .map(|header| header.len);
    let len = match len {
        Some(len) => len,
        None => {
            warn!(line = %line, "Malformed get response");
            return Err(ClientError::MalformedResponse { line });
        }
    };

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != *b"\r\n" {
        let line = String::from_utf8_lossy(&crlf).into_owned();
        warn!(line = %line, "Data block not terminated by CRLF");
        return Err(ClientError::ProtocolViolation { line });
    }

    let end = read_line(reader, buf)?;
    if !is_end(&end) {
        warn!(line = %end, "END marker not found after value");
        return Err(ClientError::ProtocolViolation { line: end });
    }

    Ok(Some(Bytes::from(data)))
}

/// Decode a `set` response.
pub fn decode_set<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    let line = read_line(reader, buf)?;
    if line.starts_with("STORED") {
        Ok(())
    } else {
        Err(ClientError::SetFailed {
            response: line.trim().to_string(),
        })
    }
}

/// Decode a `delete` response.
pub fn decode_delete<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<DeleteOutcome> {
    let line = read_line(reader, buf)?;
    if line.starts_with("DELETED") {
        Ok(DeleteOutcome::Deleted)
    } else if line.starts_with("NOT_FOUND") {
        Ok(DeleteOutcome::NotFound)
    } else {
        Err(ClientError::DeleteFailed {
            response: line.trim().to_string(),
        })
    }
}

/// Decode `stats` / `stats <type>` into a name to value map.
pub fn decode_stats<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<StatsMap> {
    let mut stats = StatsMap::new();
    read_until_end(reader, buf, |line| {
        if let Some((name, value)) = parse_stat_line(line) {
            stats.insert(name.to_string(), value);
        }
    })?;
    Ok(stats)
}

/// Decode `stats items` into the set of slab ids it mentions.
pub fn decode_slab_ids<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> ClientResult<BTreeSet<String>> {
    let mut slab_ids = BTreeSet::new();
    read_until_end(reader, buf, |line| {
        if let Some(slab_id) = parse_items_slab_id(line) {
            slab_ids.insert(slab_id.to_string());
        }
    })?;
    Ok(slab_ids)
}

/// Decode `stats cachedump` into items, in server order.
pub fn decode_cache_dump<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> ClientResult<Vec<CacheItem>> {
    let mut items = Vec::new();
    read_until_end(reader, buf, |line| {
        if let Some(item) = parse_item_line(line) {
            items.push(item);
        }
    })?;
    Ok(items)
}

/// Decode `stats cachedump` into bare keys. Any `ITEM` line naming a key
/// counts, even without size or expiry fields.
pub fn decode_item_keys<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> ClientResult<Vec<String>> {
    let mut keys = Vec::new();
    read_until_end(reader, buf, |line| {
        if let Some(key) = parse_item_key(line) {
            keys.push(key.to_string());
        }
    })?;
    Ok(keys)
}

/// Feed every line before `END` to `on_line`.
///
/// An error reply ends the listing early; such replies carry no END marker.
fn read_until_end<R, F>(reader: &mut R, buf: &mut Vec<u8>, mut on_line: F) -> ClientResult<()>
where
    R: BufRead,
    F: FnMut(&str),
{
    loop {
        let line = read_line(reader, buf)?;
        if is_end(&line) {
            return Ok(());
        }
        if let Some(message) = server_error(&line) {
            return Err(ClientError::Server {
                message: message.to_string(),
            });
        }
        on_line(&line);
    }
}
