//! Top-level server wiring: binds the listener, spawns the accept loop and
//! runs the dispatcher on the calling task.

use std::{future::Future, net::SocketAddr};

use tokio::{net::TcpListener, sync::mpsc};
use tracing::{info, warn};

use crate::{
    config::RelayConfig,
    dispatcher::Dispatcher,
    error::RelayError,
    listener::accept_loop,
    protocol::RelayNotice,
};

pub struct Server {
    listener: TcpListener,
    config: RelayConfig,
    observer: Option<mpsc::UnboundedSender<RelayNotice>>,
}

impl Server {
    /// Binds `config.listen`. Failure here is fatal: no client can ever connect.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.listen,
                source,
            })?;
        Ok(Self::from_listener(listener, config))
    }

    /// Wraps an already bound listener; `config.listen` is ignored.
    pub fn from_listener(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            config,
            observer: None,
        }
    }

    /// The address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.listener
            .local_addr()
            .map_err(|source| RelayError::LocalAddr { source })
    }

    /// Forwards the dispatcher's [`RelayNotice`]s to `observer`.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<RelayNotice>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            config,
            observer,
        } = self;

        let (conn_tx, conn_rx) = mpsc::channel(config.queue_capacity.get());
        let accept_task = tokio::spawn(accept_loop(listener, conn_tx));

        let mut dispatcher = Dispatcher::new(conn_rx, config.queue_capacity, config.write_timeout);
        if let Some(observer) = observer {
            dispatcher = dispatcher.with_observer(observer);
        }

        dispatcher.run_until(shutdown).await;
        accept_task.abort();
        info!("server stopped");
    }

    pub async fn run_until_ctrl_c(self) {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler; running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;
    }
}
