//! Runtime configuration for the relay server and address parsing shared with
//! the client.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::AddressError;

/// Port used when neither flag nor environment variable overrides it.
pub const DEFAULT_PORT: u16 = 8030;

/// Default bound on both dispatcher event channels.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default upper bound on a single broadcast write to one recipient.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the connection listener binds to.
    pub listen: SocketAddr,

    /// Capacity of the connection channel and the client-event channel.
    ///
    /// A full channel blocks the producer: the accept loop stops accepting and
    /// client readers stop reading from their sockets until the dispatcher
    /// catches up.
    pub queue_capacity: NonZeroUsize,

    /// How long the dispatcher waits on one recipient before dropping it.
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            queue_capacity: NonZeroUsize::new(DEFAULT_QUEUE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Configuration listening on `listen` with every other knob at its default.
    pub fn with_listen(listen: SocketAddr) -> Self {
        Self {
            listen,
            ..Self::default()
        }
    }
}

/// Parses a server listen address. `:port` binds every IPv4 interface.
pub fn parse_listen_addr(raw: &str) -> Result<SocketAddr, AddressError> {
    parse_addr(raw, IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Parses the address a client dials. `:port` targets the loopback interface.
pub fn parse_server_addr(raw: &str) -> Result<SocketAddr, AddressError> {
    parse_addr(raw, IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn parse_addr(raw: &str, bare_port_host: IpAddr) -> Result<SocketAddr, AddressError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(AddressError::Empty);
    }

    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Some(port) = input.strip_prefix(':') {
        let port = port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
            input: input.to_string(),
        })?;
        return Ok(SocketAddr::new(bare_port_host, port));
    }

    let mut resolved = input
        .to_socket_addrs()
        .map_err(|source| AddressError::Resolve {
            input: input.to_string(),
            source,
        })?;
    resolved.next().ok_or_else(|| AddressError::ResolveEmpty {
        input: input.to_string(),
    })
}
