//! A single TCP connection to a memcached server.
//!
//! The connection owns one buffered reader, created at open time and kept
//! until close. Every response is decoded from that reader so bytes read
//! ahead of one response are never lost to the next.

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{ClientError, ClientResult};
use crate::protocol::Command;

/// Default time allowed for the TCP handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Socket options applied when dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Upper bound on the TCP handshake
    pub connect_timeout: Duration,
    /// Read deadline once connected (None = block indefinitely)
    pub read_timeout: Option<Duration>,
    /// Write deadline once connected (None = block indefinitely)
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// An open (or closed) connection to one server endpoint.
///
/// Not safe to share between concurrent callers: a command and its response
/// must be fully exchanged before the next command is sent.
pub struct Connection {
    host: String,
    port: u16,
    /// `None` once closed
    reader: Option<BufReader<TcpStream>>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
}

impl Connection {
    /// Dial `host:port`, trying each resolved address within `connect_timeout`.
    pub fn open(host: &str, port: u16, options: &ConnectOptions) -> ClientResult<Self> {
        let peer = format_peer(host, port);

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|source| ClientError::Connect {
                addr: peer.clone(),
                source,
            })?;

        let mut last_err = None;
        for addr in addrs {
            match dial(addr, options) {
                Ok(stream) => {
                    debug!(peer = %peer, addr = %addr, "Connected");
                    return Ok(Connection {
                        host: host.to_string(),
                        port,
                        reader: Some(BufReader::with_capacity(BUFFER_SIZE, stream)),
                        line_buf: Vec::with_capacity(128),
                        write_buf: BytesMut::with_capacity(256),
                    });
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(ClientError::Connect {
            addr: peer,
            source: last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
            }),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns true until `close` is called or an IO error tears the socket down.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Send `command` and decode its response with `decode`.
    ///
    /// On an IO error the connection is closed; framing errors leave it open
    /// but its read position should be treated as suspect.
    pub fn execute<T, F>(&mut self, command: &Command<'_>, decode: F) -> ClientResult<T>
    where
        F: FnOnce(&mut BufReader<TcpStream>, &mut Vec<u8>) -> ClientResult<T>,
    {
        let reader = self.reader.as_mut().ok_or(ClientError::NotConnected)?;

        self.write_buf.clear();
        command.encode(&mut self.write_buf);
        trace!(command = command.name(), bytes = self.write_buf.len(), "Sending command");

        let result = match write_request(reader.get_mut(), &self.write_buf) {
            Ok(()) => decode(reader, &mut self.line_buf),
            Err(e) => Err(ClientError::Io(e)),
        };

        match &result {
            Err(ClientError::Io(e)) => {
                warn!(command = command.name(), error = %e, "IO error, closing connection");
                self.close();
            }
            Err(e) if e.is_desync() => {
                warn!(command = command.name(), error = %e, "Response framing lost");
            }
            _ => {}
        }

        result
    }

    /// Release the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            // The peer may already be gone; the socket is dropped either way.
            let _ = reader.get_ref().shutdown(Shutdown::Both);
            debug!(peer = %format_peer(&self.host, self.port), "Connection closed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("open", &self.is_open())
            .finish()
    }
}

fn write_request(stream: &mut TcpStream, request: &[u8]) -> io::Result<()> {
    stream.write_all(request)?;
    stream.flush()
}

fn dial(addr: SocketAddr, options: &ConnectOptions) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&addr.into(), options.connect_timeout)?;
    // Requests are small; don't let Nagle hold them back.
    socket.set_nodelay(true)?;
    socket.set_read_timeout(options.read_timeout)?;
    socket.set_write_timeout(options.write_timeout)?;
    Ok(socket.into())
}

fn format_peer(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
