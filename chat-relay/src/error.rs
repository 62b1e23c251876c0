//! Startup errors for the relay server and console client.
//!
//! Per-connection failures never surface here: readers and the dispatcher turn
//! them into [`DepartureReason`](crate::protocol::DepartureReason)s instead.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors produced while turning a command-line address into a socket address.
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address must not be empty")]
    Empty,
    #[error("invalid port in `{input}`")]
    InvalidPort { input: String },
    #[error("failed to resolve `{input}`: {source}")]
    Resolve {
        input: String,
        #[source]
        source: io::Error,
    },
    #[error("no socket addresses resolved for `{input}`")]
    ResolveEmpty { input: String },
}

/// Fatal errors raised before the relay or client starts exchanging lines.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind TCP listener at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to read bound listener address: {source}")]
    LocalAddr {
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
