//! Per-client reader task.

use tokio::{io::AsyncBufRead, sync::mpsc};
use tracing::debug;

use crate::protocol::{ClientEvent, ClientId, DepartureReason, InboundMessage, read_line};

/// Forwards every line read from one client to the dispatcher, in order.
///
/// The loop ends on end of stream or on the first read error and reports the
/// departure on the same channel, after any lines already read. If the
/// dispatcher has gone away the loop stops silently.
pub async fn read_loop<R>(id: ClientId, mut reader: R, events: mpsc::Sender<ClientEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    let reason = loop {
        match read_line(&mut reader, &mut buf).await {
            Ok(true) => {
                let message = InboundMessage {
                    sender: id,
                    payload: std::mem::take(&mut buf),
                };
                if events.send(ClientEvent::Line(message)).await.is_err() {
                    return;
                }
            }
            Ok(false) => break DepartureReason::Closed,
            Err(err) => {
                debug!(error = ?err, "client read failed");
                break DepartureReason::ReadFailed(err.kind());
            }
        }
    };

    if events.send(ClientEvent::Left { id, reason }).await.is_err() {
        debug!("dispatcher closed before departure was reported");
    }
}
