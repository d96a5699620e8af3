//! Common error types for ipsecd components.
//!
//! Every layer (netlink codec, VICI client, daemon) reports failures through
//! this one flat enumeration so callers can map any result to a stable code.

use std::fmt;
use std::io;

/// A specialized Result type for ipsecd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for ipsecd operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to open socket: {0}")]
    SocketOpenFailed(io::Error),

    #[error("Failed to bind socket: {0}")]
    SocketBindFailed(io::Error),

    #[error("Failed to send message: {0}")]
    SocketSendFailed(io::Error),

    #[error("Failed to receive message: {0}")]
    SocketRecvFailed(io::Error),

    #[error("Failed to prepare message buffer: {0}")]
    AllocFailed(String),

    #[error("Add failed: {0}")]
    AddFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Modify failed: {0}")]
    ModifyFailed(String),

    #[error("Start failed: {0}")]
    StartFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

/// Flat result code for an [`Error`], stable across layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    SocketOpenFailed,
    SocketBindFailed,
    SocketSendFailed,
    SocketRecvFailed,
    AllocFailed,
    AddFailed,
    DeleteFailed,
    ModifyFailed,
    StartFailed,
    StopFailed,
    NotFound,
    InvalidSize,
    NotReady,
    ParseError,
    Netlink,
    Unsupported,
    Config,
    Serialization,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "IO_ERROR",
            ErrorKind::SocketOpenFailed => "SOCKET_OPEN_FAILED",
            ErrorKind::SocketBindFailed => "SOCKET_BIND_FAILED",
            ErrorKind::SocketSendFailed => "SOCKET_SEND_FAILED",
            ErrorKind::SocketRecvFailed => "SOCKET_RECV_FAILED",
            ErrorKind::AllocFailed => "ALLOC_FAILED",
            ErrorKind::AddFailed => "ADD_FAILED",
            ErrorKind::DeleteFailed => "DELETE_FAILED",
            ErrorKind::ModifyFailed => "MODIFY_FAILED",
            ErrorKind::StartFailed => "START_FAILED",
            ErrorKind::StopFailed => "STOP_FAILED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidSize => "INVALID_SIZE",
            ErrorKind::NotReady => "NOT_READY",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::Netlink => "NETLINK_ERROR",
            ErrorKind::Unsupported => "UNSUPPORTED",
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::Serialization => "SERIALIZATION_ERROR",
            ErrorKind::Other => "GENERIC_ERROR",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Flat result code of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::SocketOpenFailed(_) => ErrorKind::SocketOpenFailed,
            Error::SocketBindFailed(_) => ErrorKind::SocketBindFailed,
            Error::SocketSendFailed(_) => ErrorKind::SocketSendFailed,
            Error::SocketRecvFailed(_) => ErrorKind::SocketRecvFailed,
            Error::AllocFailed(_) => ErrorKind::AllocFailed,
            Error::AddFailed(_) => ErrorKind::AddFailed,
            Error::DeleteFailed(_) => ErrorKind::DeleteFailed,
            Error::ModifyFailed(_) => ErrorKind::ModifyFailed,
            Error::StartFailed(_) => ErrorKind::StartFailed,
            Error::StopFailed(_) => ErrorKind::StopFailed,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidSize(_) => ErrorKind::InvalidSize,
            Error::NotReady(_) => ErrorKind::NotReady,
            Error::ParseError(_) => ErrorKind::ParseError,
            Error::Netlink(_) => ErrorKind::Netlink,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Config(_) => ErrorKind::Config,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Create a new add-failed error.
    pub fn add_failed(msg: impl fmt::Display) -> Self {
        Error::AddFailed(msg.to_string())
    }

    /// Create a new delete-failed error.
    pub fn delete_failed(msg: impl fmt::Display) -> Self {
        Error::DeleteFailed(msg.to_string())
    }

    /// Create a new modify-failed error.
    pub fn modify_failed(msg: impl fmt::Display) -> Self {
        Error::ModifyFailed(msg.to_string())
    }

    /// Create a new start-failed error.
    pub fn start_failed(msg: impl fmt::Display) -> Self {
        Error::StartFailed(msg.to_string())
    }

    /// Create a new stop-failed error.
    pub fn stop_failed(msg: impl fmt::Display) -> Self {
        Error::StopFailed(msg.to_string())
    }

    /// Create a new not-found error.
    pub fn not_found(msg: impl fmt::Display) -> Self {
        Error::NotFound(msg.to_string())
    }

    /// Create a new invalid-size error.
    pub fn invalid_size(msg: impl fmt::Display) -> Self {
        Error::InvalidSize(msg.to_string())
    }

    /// Create a new not-ready error.
    pub fn not_ready(msg: impl fmt::Display) -> Self {
        Error::NotReady(msg.to_string())
    }

    /// Create a new parse error.
    pub fn parse(msg: impl fmt::Display) -> Self {
        Error::ParseError(msg.to_string())
    }

    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a new unsupported-feature error.
    pub fn unsupported(msg: impl fmt::Display) -> Self {
        Error::Unsupported(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
