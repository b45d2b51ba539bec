//! memcc: a memcached text protocol client
//!
//! Features:
//! - get, set, delete over a single persistent connection
//! - stats, stats <type>, stats items, stats cachedump
//! - Slab discovery and whole-keyspace key listing
//! - Binary-safe values and a typed error for every failure mode
//!
//! The client is blocking and not meant to be shared between threads; open
//! one `Client` per concurrent caller.

pub mod client;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod protocol;

pub use client::{key_matches, Client};
pub use connection::{ConnectOptions, Connection, DEFAULT_CONNECT_TIMEOUT};
pub use error::{ClientError, ClientResult};
pub use protocol::{
    CacheItem, Command, DeleteOutcome, StatsMap, MAX_KEY_LENGTH, MAX_LINE_LENGTH, MAX_VALUE_LENGTH,
};
