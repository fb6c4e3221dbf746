use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpStream;

use crate::{
    config::ConsultMode,
    draw::{DrawCoordinator, DrawError, Readiness},
    protocol::{Connection, DeserializeError, FromClient, SerializeError, ToClient},
    registry::{Registration, Registry},
    shutdown::Shutdown,
    store::{AgencyId, Bet, BetStore, StoreError},
};

/// Everything a session shares with the rest of the server
#[derive(Clone)]
pub struct SharedState {
    pub store: Arc<dyn BetStore>,
    pub draw: Arc<DrawCoordinator>,
    pub registry: Registry,
    pub shutdown: Shutdown,
    pub consult: ConsultMode,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("failed to read a message: {0}")]
    Deserialize(#[from] DeserializeError),

    #[error("failed to send a message: {0}")]
    Serialize(#[from] SerializeError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Draw(#[from] DrawError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("the connection was closed by the server")]
    ForcedClose,
}

/// How a session that didn't fail came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// the peer closed the connection
    Disconnected,
    /// the winners were sent to the agency
    Answered,
    /// the server shut down while the agency was waiting for the draw
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Unregistered,
    Registered(AgencyId),
}

struct Session {
    conn: Connection,
    registration: Registration,
    mode: Mode,
    state: SharedState,
}

/// Drives a single accepted connection until it closes
///
/// errors never leave the session, they are logged and the socket is closed.
pub async fn handle(stream: TcpStream, peer: SocketAddr, state: SharedState) {
    let registration = match state.registry.insert_unregistered(peer) {
        Ok(registration) => registration,
        Err(err) => {
            tracing::info!(%peer, "rejected connection: {}", err);
            return;
        }
    };

    let mut session = Session {
        conn: Connection::new(stream, peer),
        registration,
        mode: Mode::Unregistered,
        state,
    };

    // a close request interrupts the session wherever it is, including a stalled write
    let closer = session.registration.closer().clone();
    let result = tokio::select! {
        result = session.run() => result,
        _ = closer.closed() => Err(SessionError::ForcedClose),
    };
    let agency = match session.mode {
        Mode::Registered(agency) => Some(agency),
        Mode::Unregistered => None,
    };

    match result {
        Ok(outcome) => tracing::info!(%peer, ?agency, ?outcome, "session closed"),
        Err(err) if session.state.shutdown.is_triggered() => {
            tracing::info!(%peer, ?agency, "session closed by shutdown: {}", err)
        }
        Err(SessionError::Deserialize(DeserializeError::Io(err))) => {
            tracing::warn!(%peer, ?agency, "connection lost: {}", err)
        }
        Err(err) => tracing::warn!(%peer, ?agency, "session terminated: {}", err),
    }

    // the final flush may never complete against a peer that stopped reading
    tokio::select! {
        result = session.conn.shutdown() => if let Err(err) = result {
            tracing::debug!(%peer, "failed to shutdown the socket: {}", err);
        },
        _ = session.state.shutdown.wait() => {}
    }

    // dropping the session removes its registry entry and closes the socket
}

impl Session {
    async fn run(&mut self) -> Result<Outcome, SessionError> {
        loop {
            let message = match self.conn.read::<FromClient>().await {
                Ok(message) => message,
                Err(DeserializeError::Closed) => return Ok(Outcome::Disconnected),
                Err(err) => return Err(err.into()),
            };
            tracing::debug!(peer = %self.conn.peer(), "received: {:?}", message);

            match (self.mode, message) {
                (Mode::Unregistered, FromClient::Connect { agency }) => self.register(agency)?,
                (Mode::Unregistered, message) => {
                    return Err(SessionError::Protocol(format!(
                        "expected a connect message, got message type {}",
                        message.message_type()
                    )))
                }

                (Mode::Registered(_), FromClient::Connect { .. }) => {
                    return Err(SessionError::Protocol(
                        "the agency has already connected".into(),
                    ))
                }
                (Mode::Registered(agency), message) if message.agency() != agency => {
                    return Err(SessionError::Protocol(format!(
                        "agency {} sent a message on behalf of agency {}",
                        agency,
                        message.agency()
                    )))
                }

                (Mode::Registered(agency), FromClient::BetBatch { bets, .. }) => {
                    self.store_bets(agency, bets).await?
                }
                (Mode::Registered(agency), FromClient::Finished { .. }) => {
                    self.finish(agency).await?
                }
                (Mode::Registered(agency), FromClient::ConsultWinners { .. }) => {
                    if let Some(outcome) = self.consult(agency).await? {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    fn register(&mut self, agency: AgencyId) -> Result<(), SessionError> {
        if !self.registration.promote(agency) {
            // the entry is gone, the server is closing every socket
            return Err(SessionError::ForcedClose);
        }

        if !self.state.draw.is_expected(agency) {
            tracing::warn!(agency, "an unexpected agency has connected");
        }

        tracing::info!(agency, peer = %self.conn.peer(), "agency connected");
        self.mode = Mode::Registered(agency);

        Ok(())
    }

    async fn store_bets(&mut self, agency: AgencyId, bets: Vec<Bet>) -> Result<(), SessionError> {
        self.state.store.append(&bets).await?;
        tracing::info!(agency, bets = bets.len(), "stored bet batch");

        self.conn.send(&ToClient::Confirmation).await?;
        Ok(())
    }

    async fn finish(&mut self, agency: AgencyId) -> Result<(), SessionError> {
        if !self.state.draw.is_expected(agency) {
            tracing::warn!(agency, "ignoring the completion of an unexpected agency");
            return Ok(());
        }

        tracing::info!(agency, "agency finished betting");
        if self.state.draw.mark_finished(agency) {
            // the last agency runs the draw, consulting sessions reuse the result
            self.state
                .draw
                .compute_winners_once(self.state.store.as_ref())
                .await?;
        }

        Ok(())
    }

    /// Answers a consult, returns None if the session should keep going
    async fn consult(&mut self, agency: AgencyId) -> Result<Option<Outcome>, SessionError> {
        let draw = self.state.draw.clone();

        if !draw.is_ready() {
            match self.state.consult {
                ConsultMode::Poll => {
                    tracing::debug!(agency, "the draw is not ready, asking the agency to wait");
                    self.conn.send(&ToClient::Wait).await?;
                    return Ok(None);
                }
                ConsultMode::Block => {
                    tracing::debug!(agency, "waiting for the draw");
                    if draw.wait_until_ready_or_shutdown().await == Readiness::Terminated {
                        return Ok(Some(Outcome::Interrupted));
                    }
                }
            }
        }

        draw.compute_winners_once(self.state.store.as_ref()).await?;
        let winners = draw.winners_for(agency).unwrap_or_default();
        tracing::info!(agency, winners = winners.len(), "sending winners");

        if let Err(err) = self.conn.send(&ToClient::Winners(winners)).await {
            if let SerializeError::TooLong(len) = err {
                // the size field is 16 bits wide, at most 16382 documents fit in a frame
                tracing::warn!(agency, bytes = len, "the winners do not fit in a single frame");
            }
            return Err(err.into());
        }

        Ok(Some(Outcome::Answered))
    }
}
