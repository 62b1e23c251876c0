//! Line-oriented TCP chat relay.
//!
//! A server accepts connections, gives each one an id and rebroadcasts
//! every line a client sends to all other connected clients. The client
//! prints incoming lines and forwards what the user types.
//!
//! - [`cli`] parses the `server` and `client` subcommands.
//! - [`config`] holds server settings and address parsing.
//! - [`listener`] accepts TCP connections and queues them.
//! - [`reader`] turns one client's byte stream into line events.
//! - [`dispatcher`] owns the [`registry`] and performs fan-out; it is the
//!   only task that ever touches client state.
//! - [`server`] wires the pieces together.
//! - [`client`] is the console front end.
//! - [`protocol`] defines the events and the newline framing.

pub mod cli;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod reader;
pub mod registry;
pub mod server;
