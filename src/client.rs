//! Blocking memcached client.
//!
//! `Client` issues one command at a time over a single [`Connection`] and
//! returns plain decoded values. It also composes the introspection commands
//! into whole-keyspace queries: slab discovery via `stats items`, then one
//! `stats cachedump` per slab.

use bytes::Bytes;
use tracing::debug;

use crate::connection::{ConnectOptions, Connection};
use crate::decoder;
use crate::error::ClientResult;
use crate::protocol::{
    validate_key, validate_stats_kind, validate_token, CacheItem, Command, DeleteOutcome,
    StatsMap,
};

/// Memcached text protocol client bound to one server.
#[derive(Debug)]
pub struct Client {
    conn: Connection,
}

impl Client {
    /// Connect with default options (5 second dial timeout, no IO deadlines).
    pub fn connect(host: &str, port: u16) -> ClientResult<Self> {
        Self::connect_with(host, port, &ConnectOptions::default())
    }

    /// Connect with explicit socket options.
    pub fn connect_with(host: &str, port: u16, options: &ConnectOptions) -> ClientResult<Self> {
        let conn = Connection::open(host, port, options)?;
        Ok(Client { conn })
    }

    /// Close the connection. Later operations fail with `NotConnected`.
    pub fn close(&mut self) {
        self.conn.close();
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_open()
    }

    /// Fetch a value. Returns `Ok(None)` when the key is absent.
    pub fn get(&mut self, key: &str) -> ClientResult<Option<Bytes>> {
        validate_key(key)?;
        self.conn.execute(&Command::Get { key }, |reader, buf| {
            decoder::decode_get(reader, buf, key)
        })
    }

    /// Store a value with flags 0. An `exptime` of 0 never expires.
    pub fn set(&mut self, key: &str, value: &[u8], exptime: i64) -> ClientResult<()> {
        validate_key(key)?;
        let command = Command::Set {
            key,
            exptime,
            data: value,
        };
        self.conn.execute(&command, decoder::decode_set)
    }

    /// Delete a key. A missing key is `DeleteOutcome::NotFound`, not an error.
    pub fn delete(&mut self, key: &str) -> ClientResult<DeleteOutcome> {
        validate_key(key)?;
        self.conn
            .execute(&Command::Delete { key }, decoder::decode_delete)
    }

    /// Server statistics, optionally for a named group (`items`, `slabs`, ...).
    ///
    /// An empty group name is the same as `None`.
    pub fn stats(&mut self, kind: Option<&str>) -> ClientResult<StatsMap> {
        let kind = kind.filter(|k| !k.is_empty());
        if let Some(kind) = kind {
            validate_stats_kind(kind)?;
        }
        self.conn
            .execute(&Command::Stats { kind }, decoder::decode_stats)
    }

    /// Items resident in one slab. A `limit` of 0 asks for the server default.
    pub fn cache_dump(&mut self, slab_id: &str, limit: u32) -> ClientResult<Vec<CacheItem>> {
        validate_token("slab id", slab_id)?;
        self.conn.execute(
            &Command::CacheDump { slab_id, limit },
            decoder::decode_cache_dump,
        )
    }

    /// All slab ids with items, sorted as strings ("1", "12", "5").
    pub fn slabs(&mut self) -> ClientResult<Vec<String>> {
        let slab_ids = self
            .conn
            .execute(&Command::StatsItems, decoder::decode_slab_ids)?;
        debug!(count = slab_ids.len(), "Discovered slabs");
        Ok(slab_ids.into_iter().collect())
    }

    /// Keys visible through cachedump across every slab, filtered by
    /// `pattern` and sorted.
    ///
    /// Every `ITEM` line that names a key is listed, including lines without
    /// size or expiry fields. Matching is a substring test, not a glob; see
    /// [`key_matches`].
    pub fn keys(&mut self, pattern: &str) -> ClientResult<Vec<String>> {
        let mut keys = Vec::new();
        for slab_id in self.slabs()? {
            validate_token("slab id", &slab_id)?;
            let dumped = self.conn.execute(
                &Command::CacheDump {
                    slab_id: &slab_id,
                    limit: 0,
                },
                decoder::decode_item_keys,
            )?;
            debug!(slab = %slab_id, items = dumped.len(), "Dumped slab");
            keys.extend(dumped.into_iter().filter(|key| key_matches(pattern, key)));
        }
        keys.sort();
        Ok(keys)
    }
}

/// Key filter used by [`Client::keys`].
///
/// `*` matches everything. Any other pattern has its `*` characters removed
/// and the remainder is searched for as a plain substring, so `user:*:session`
/// matches keys containing `user::session`.
pub fn key_matches(pattern: &str, key: &str) -> bool {
    pattern == "*" || key.contains(pattern.replace('*', "").as_str())
}
