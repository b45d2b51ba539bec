//! memcc: command-line client for memcached servers
//!
//! Subcommands:
//! - keys, get, set, delete
//! - stats, cachedump, slabs
//!
//! Connection settings come from CLI arguments, `MEMCACHED_HOST` /
//! `MEMCACHED_PORT`, or a TOML file. Data goes to stdout, logs to stderr.

use clap::Parser;
use memcc::config::{Action, CliArgs, Config};
use memcc::{Client, ClientResult, DeleteOutcome};
use std::io::{self, Write};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    // Load configuration
    let config = Config::load(&cli)?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    debug!(
        host = %config.host,
        port = config.port,
        connect_timeout = ?config.connect_timeout,
        read_timeout = ?config.read_timeout,
        "Connecting"
    );

    let mut client = Client::connect_with(&config.host, config.port, &config.connect_options())?;
    let result = run(&mut client, &cli.command);
    client.close();
    result?;
    Ok(())
}

fn run(client: &mut Client, action: &Action) -> ClientResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match action {
        Action::Keys { pattern } => {
            for key in client.keys(pattern)? {
                writeln!(out, "{}", key)?;
            }
        }
        Action::Get { key } => match client.get(key)? {
            Some(value) => {
                out.write_all(&value)?;
                writeln!(out)?;
            }
            None => writeln!(out, "Key '{}' not found", key)?,
        },
        Action::Set { key, value, expiry } => {
            client.set(key, value.as_bytes(), *expiry)?;
            writeln!(out, "STORED")?;
        }
        Action::Delete { key } => match client.delete(key)? {
            DeleteOutcome::Deleted => writeln!(out, "DELETED")?,
            DeleteOutcome::NotFound => writeln!(out, "Key '{}' not found", key)?,
        },
        Action::Stats { kind } => {
            for (name, value) in client.stats(kind.as_deref())? {
                writeln!(out, "{} {}", name, value)?;
            }
        }
        Action::Cachedump { slab_id, limit } => {
            for item in client.cache_dump(slab_id, *limit)? {
                let expiry = item
                    .expires_at()
                    .map(|at| at.to_rfc3339())
                    .unwrap_or(item.expiry);
                writeln!(out, "{} {} {}", item.key, item.size, expiry)?;
            }
        }
        Action::Slabs => {
            for slab_id in client.slabs()? {
                writeln!(out, "{}", slab_id)?;
            }
        }
    }

    out.flush()?;
    Ok(())
}
