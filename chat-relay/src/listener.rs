//! Connection listener: accepts transport sessions and queues them for the
//! dispatcher. It never touches client state.

use std::{future::Future, io, net::SocketAddr, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::protocol::PendingConnection;

/// Pause after a failed `accept` so persistent errors (e.g. fd exhaustion)
/// do not spin the loop.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Source of inbound sessions.
pub trait Acceptor: Send + Sync + 'static {
    type Stream: Send + 'static;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accepts connections until the dispatcher drops its receiver.
///
/// Each accepted stream is handed over as a [`PendingConnection`]. When the
/// channel is full the loop waits for room before accepting again.
pub async fn accept_loop<A>(listener: A, connections: mpsc::Sender<PendingConnection<A::Stream>>)
where
    A: Acceptor,
{
    loop {
        let accepted = select! {
            result = listener.accept() => result,
            () = connections.closed() => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                if connections
                    .send(PendingConnection { stream, peer })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => {
                warn!(error = ?err, "failed to accept connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }

    debug!("connection listener stopped");
}
