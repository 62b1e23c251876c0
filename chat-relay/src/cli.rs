use std::{
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};

use crate::config::{RelayConfig, parse_listen_addr, parse_server_addr};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, rebroadcasting every line to all other clients.
    Server(ServerArgs),
    /// Connect to a relay, print incoming lines and send typed ones.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to listen on, as `host:port` or `:port` for every interface.
    #[arg(
        long,
        visible_alias = "listen",
        env = "CHAT_RELAY_LISTEN",
        default_value = ":8030",
        value_parser = parse_listen_addr
    )]
    pub port: SocketAddr,

    /// Pending connections and client events buffered before producers wait.
    #[arg(long, env = "CHAT_RELAY_QUEUE_CAPACITY", default_value = "1024")]
    pub queue_capacity: NonZeroUsize,

    /// Milliseconds a broadcast may wait on one client before dropping it.
    #[arg(long, env = "CHAT_RELAY_WRITE_TIMEOUT_MS", default_value = "5000")]
    pub write_timeout_ms: NonZeroU64,
}

impl ServerArgs {
    pub fn into_config(self) -> RelayConfig {
        RelayConfig {
            listen: self.port,
            queue_capacity: self.queue_capacity,
            write_timeout: Duration::from_millis(self.write_timeout_ms.get()),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Relay address to connect to (`host:port`, or `:port` for loopback).
    #[arg(
        long,
        visible_alias = "server",
        env = "CHAT_RELAY_SERVER",
        default_value = "127.0.0.1:8030",
        value_parser = parse_server_addr
    )]
    pub ip: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("chat-relay").chain(args.iter().copied()))
    }

    #[test]
    fn server_defaults() {
        let cli = parse(&["server"]).expect("defaults parse");
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let config = args.into_config();
        assert_eq!(config.listen, "0.0.0.0:8030".parse().expect("valid"));
        assert_eq!(config.queue_capacity.get(), 1024);
        assert_eq!(config.write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn server_accepts_bare_port_and_alias() {
        let cli = parse(&["server", "--listen", ":9100", "--write-timeout-ms", "250"])
            .expect("flags parse");
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let config = args.into_config();
        assert_eq!(config.listen.port(), 9100);
        assert_eq!(config.write_timeout, Duration::from_millis(250));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(parse(&["server", "--queue-capacity", "0"]).is_err());
    }

    #[test]
    fn invalid_address_is_a_usage_error() {
        let err = parse(&["client", "--ip", ":not-a-port"]).expect_err("bad port");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn client_defaults_to_local_relay() {
        let cli = parse(&["client"]).expect("defaults parse");
        let Command::Client(args) = cli.command else {
            panic!("expected client command");
        };
        assert_eq!(args.ip, "127.0.0.1:8030".parse().expect("valid"));
    }
}
