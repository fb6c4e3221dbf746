use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{net::TcpListener, task::JoinSet};

use crate::{
    config::{ConsultMode, ServerConfig},
    draw::{winning_number, DrawCoordinator, WinningPredicate},
    registry::Registry,
    session::{self, SharedState},
    shutdown::Shutdown,
    store::{AgencyId, BetStore},
};

/// Accepts agencies and hands every connection to its own session task
pub struct Server {
    listener: TcpListener,
    state: SharedState,
}

impl Server {
    /// Binds the listening socket, failing here is the only fatal network error
    pub async fn bind(
        addr: SocketAddr,
        expected: impl IntoIterator<Item = AgencyId>,
        predicate: WinningPredicate,
        store: Arc<dyn BetStore>,
        consult: ConsultMode,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {}", addr))?;

        let shutdown = Shutdown::new();
        let state = SharedState {
            store,
            draw: Arc::new(DrawCoordinator::new(expected, predicate, shutdown.clone())),
            registry: Registry::new(),
            shutdown,
            consult,
        };

        Ok(Self { listener, state })
    }

    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let store = config.open_store().await?;
        Self::bind(
            config.listen,
            config.expected_agencies(),
            winning_number(config.winning_number),
            store,
            config.consult,
        )
        .await
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that stops the server once triggered
    pub fn shutdown_handle(&self) -> Shutdown {
        self.state.shutdown.clone()
    }

    /// Accepts connections until the shutdown is triggered, then closes every session
    pub async fn run(self) -> anyhow::Result<()> {
        let Self { listener, state } = self;
        tracing::info!("server listening on: {}", listener.local_addr()?);

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        sessions.spawn(session::handle(conn, peer, state.clone()));
                    }
                    // a failed accept only affects the connection being accepted
                    Err(err) => tracing::warn!("failed to accept a connection: {}", err),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = joined {
                        tracing::error!("a session task failed: {}", err);
                    }
                }
                _ = state.shutdown.wait() => break,
            }
        }

        tracing::info!(sessions = state.registry.len(), "stopping the server");
        drop(listener);

        // the draw waiters are released by the shutdown flag itself,
        // the remaining sessions are blocked on their sockets
        let closed = state.registry.close_all();
        tracing::debug!(sessions = closed, "closing live sessions");

        while let Some(joined) = sessions.join_next().await {
            if let Err(err) = joined {
                tracing::error!("a session task failed: {}", err);
            }
        }

        tracing::info!("server stopped");
        Ok(())
    }
}
