//! Error types for the memcached client.

use std::io;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
///
/// A `get` miss and a `delete` miss are not errors; they are reported through
/// `Option` and [`DeleteOutcome`](crate::DeleteOutcome) respectively.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Dialing the server failed (resolution, refusal or timeout).
    #[error("failed to connect to memcached server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Operation issued on a closed or never-opened connection.
    #[error("client not connected")]
    NotConnected,

    /// Read or write failed mid-operation. The connection is closed afterwards.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A response line did not match the grammar of the in-flight command.
    #[error("malformed response: {line:?}")]
    MalformedResponse { line: String },

    /// The stream lost framing (missing payload terminator or END marker).
    #[error("protocol violation: {line:?}")]
    ProtocolViolation { line: String },

    /// The server refused a `set`.
    #[error("failed to set value: {response}")]
    SetFailed { response: String },

    /// The server answered a `delete` with something other than DELETED/NOT_FOUND.
    #[error("failed to delete key: {response}")]
    DeleteFailed { response: String },

    /// ERROR, CLIENT_ERROR or SERVER_ERROR where a listing was expected.
    #[error("server error: {message}")]
    Server { message: String },

    /// Key cannot be sent without breaking the line framing.
    #[error("invalid key: {key:?}")]
    InvalidKey { key: String },

    /// Non-key argument cannot be sent without breaking the line framing.
    #[error("invalid {name}: {value:?}")]
    InvalidArgument { name: &'static str, value: String },
}

impl ClientError {
    /// Returns true if the connection's read position can no longer be trusted.
    ///
    /// Callers should reconnect rather than issue further commands.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            ClientError::MalformedResponse { .. } | ClientError::ProtocolViolation { .. }
        )
    }
}
