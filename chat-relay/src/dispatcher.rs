//! The dispatcher: a single task that owns the client registry.
//!
//! It waits on two channels, new connections from the listener and client
//! events from the readers, and handles exactly one event at a time in
//! arrival order. Because no other task can reach the registry, no locking
//! is involved.
//!
//! A broadcast writes to recipients one after another. Each write is bounded
//! by the configured timeout; a recipient whose write fails or times out is
//! removed once the fan-out is complete.

use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
    time::timeout,
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    protocol::{
        ClientEvent, ClientId, DepartureReason, InboundMessage, PendingConnection, RelayNotice,
        write_line,
    },
    reader::read_loop,
    registry::{ClientEntry, ClientRegistry},
};

pub struct Dispatcher<S> {
    registry: ClientRegistry<S>,
    last_id: u64,
    connections: mpsc::Receiver<PendingConnection<S>>,
    events_tx: mpsc::Sender<ClientEvent>,
    events_rx: mpsc::Receiver<ClientEvent>,
    write_timeout: Duration,
    observer: Option<mpsc::UnboundedSender<RelayNotice>>,
}

impl<S> Dispatcher<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Creates a dispatcher fed by `connections`.
    ///
    /// `queue_capacity` bounds the client-event channel shared by all readers.
    pub fn new(
        connections: mpsc::Receiver<PendingConnection<S>>,
        queue_capacity: NonZeroUsize,
        write_timeout: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(queue_capacity.get());
        Self {
            registry: ClientRegistry::new(),
            last_id: 0,
            connections,
            events_tx,
            events_rx,
            write_timeout,
            observer: None,
        }
    }

    /// Publishes every join, relay and departure decision on `observer`.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<RelayNotice>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Currently registered ids in ascending order.
    pub fn registered(&self) -> Vec<ClientId> {
        self.registry.ids()
    }

    /// Runs the event loop until `shutdown` resolves, then disconnects every
    /// registered client.
    ///
    /// Connection and client events have equal priority. If the listener goes
    /// away the loop keeps serving the clients it already has.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut accepting = true;

        loop {
            select! {
                () = &mut shutdown => break,
                pending = self.connections.recv(), if accepting => match pending {
                    Some(pending) => {
                        self.admit(pending);
                    }
                    None => {
                        debug!("connection channel closed; no new clients will be admitted");
                        accepting = false;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_client_event(event).await,
            }
        }

        self.disconnect_all().await;
    }

    /// Registers a new connection under the next id and starts its reader.
    ///
    /// This is the only place ids are minted and readers are spawned.
    pub fn admit(&mut self, pending: PendingConnection<S>) -> ClientId {
        self.last_id += 1;
        let id = ClientId(self.last_id);
        let PendingConnection { stream, peer } = pending;

        let (read_half, writer) = tokio::io::split(stream);
        let reader = tokio::spawn(
            read_loop(id, BufReader::new(read_half), self.events_tx.clone())
                .instrument(info_span!("client", client = %id)),
        );

        if let Err(rejected) = self.registry.insert(id, ClientEntry { writer, peer, reader }) {
            // Unreachable while ids are only minted above.
            warn!(client = %id, "client id already registered; dropping connection");
            rejected.reader.abort();
            return id;
        }

        info!(client = %id, %peer, "new client connected");
        self.notify(RelayNotice::Joined { id, peer });
        id
    }

    /// Applies one event produced by a client reader.
    pub async fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Line(message) => {
                info!(client = %message.sender, text = %message.text(), "message received");
                self.broadcast(&message).await;
            }
            ClientEvent::Left { id, reason } => self.remove(id, reason).await,
        }
    }

    /// Writes `message` to every registered client except its sender.
    ///
    /// Returns the ids that received the full payload, in ascending order.
    pub async fn broadcast(&mut self, message: &InboundMessage) -> Vec<ClientId> {
        let write_timeout = self.write_timeout;
        let mut delivered = Vec::new();
        let mut failed = Vec::new();

        for (id, entry) in self.registry.recipients_mut(message.sender) {
            match timeout(write_timeout, write_line(&mut entry.writer, &message.payload)).await {
                Ok(Ok(())) => delivered.push(id),
                Ok(Err(err)) => {
                    warn!(client = %id, error = ?err, "broadcast write failed");
                    failed.push((id, DepartureReason::WriteFailed(err.kind())));
                }
                Err(_) => {
                    warn!(client = %id, timeout = ?write_timeout, "broadcast write timed out");
                    failed.push((id, DepartureReason::WriteTimedOut));
                }
            }
        }

        delivered.sort_unstable();
        debug!(client = %message.sender, recipients = delivered.len(), "message relayed");
        self.notify(RelayNotice::Relayed {
            from: message.sender,
            recipients: delivered.clone(),
        });

        for (id, reason) in failed {
            self.remove(id, reason).await;
        }

        delivered
    }

    /// Drops `id` from the registry and closes its connection.
    ///
    /// Unknown ids are ignored, so a reader reporting a client that was
    /// already removed after a failed write is harmless.
    pub async fn remove(&mut self, id: ClientId, reason: DepartureReason) {
        let Some(mut entry) = self.registry.remove(id) else {
            debug!(client = %id, %reason, "departure for unregistered client ignored");
            return;
        };

        entry.reader.abort();
        match timeout(self.write_timeout, entry.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(client = %id, error = ?err, "failed to shut down client writer"),
            Err(_) => debug!(client = %id, "timed out shutting down client writer"),
        }

        info!(client = %id, peer = %entry.peer, %reason, "client left");
        self.notify(RelayNotice::Left { id, reason });
    }

    async fn disconnect_all(&mut self) {
        info!(clients = self.registry.len(), "dispatcher shutting down");
        for id in self.registry.ids() {
            self.remove(id, DepartureReason::ServerShutdown).await;
        }
    }

    fn notify(&self, notice: RelayNotice) {
        if let Some(observer) = &self.observer {
            if observer.send(notice).is_err() {
                debug!("relay observer dropped");
            }
        }
    }
}
