//! Error taxonomy for the loadcom session and transport.
//!
//! Malformed device replies are deliberately not represented here: decoding
//! failures are non-fatal by protocol contract and are handled inline as
//! ignore-and-continue branches (logged and counted), never raised to the
//! caller.

use thiserror::Error;

/// Errors surfaced by the loadcom core.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial endpoint could not be opened. Fatal to the attempted
    /// connect only; the session stays disconnected.
    #[error("could not open {path}: {source}")]
    Connection {
        path: String,
        source: serialport::Error,
    },

    /// A read or write failed mid-session. The session should be treated as
    /// degraded and a reconnect is recommended.
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// An operation was attempted without a live connection. Returned
    /// synchronously, before any hardware access.
    #[error("Not Connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, Error>;
