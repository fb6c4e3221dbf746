use std::{path::Path, time::Duration};

use anyhow::Context;

use crate::{
    config::AgencyConfig,
    protocol::{
        serializer::encoded_bet_len, Connection, DeserializeError, FromClient, SerializeError,
        ToClient,
    },
    store::{AgencyId, Bet, Document},
};

/// size(2) + type(1) + agency(1) + terminator(1)
const BATCH_OVERHEAD: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    Io(#[from] tokio::io::Error),

    #[error("failed to read a reply: {0}")]
    Deserialize(#[from] DeserializeError),

    #[error("failed to send a message: {0}")]
    Serialize(#[from] SerializeError),

    #[error("unexpected reply from the server: {0:?}")]
    UnexpectedReply(ToClient),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct CsvError {
    line: usize,
    reason: String,
}

/// Parses bets from `first_name,last_name,document,birthdate,number` lines
///
/// blank lines are skipped.
pub fn parse_bets_csv(agency: AgencyId, content: &str) -> Result<Vec<Bet>, CsvError> {
    let mut bets = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let err = |reason: String| CsvError {
            line: idx + 1,
            reason,
        };

        let fields: Vec<_> = line.split(',').map(str::trim).collect();
        let [first_name, last_name, document, birthdate, number] = fields[..] else {
            return Err(err(format!("expected 5 fields, got {}", fields.len())));
        };

        if first_name.contains('|') || last_name.contains('|') {
            return Err(err("names must not contain '|'".into()));
        }

        bets.push(Bet {
            agency,
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
            document: document
                .parse()
                .map_err(|_| err(format!("invalid document: {:?}", document)))?,
            birthdate: birthdate.parse().map_err(|e| err(format!("{}", e)))?,
            number: number
                .parse()
                .map_err(|_| err(format!("invalid number: {:?}", number)))?,
        });
    }

    Ok(bets)
}

/// Splits bets into batches of at most `max_bets`, each fitting in a single frame
pub fn batches(bets: &[Bet], max_bets: usize) -> Vec<&[Bet]> {
    let max_bets = max_bets.max(1);
    let mut batches = Vec::new();

    let mut start = 0;
    let mut len = BATCH_OVERHEAD;
    for (idx, bet) in bets.iter().enumerate() {
        let bet_len = encoded_bet_len(bet);
        if idx > start && (idx - start == max_bets || len + bet_len > u16::MAX as usize) {
            batches.push(&bets[start..idx]);
            start = idx;
            len = BATCH_OVERHEAD;
        }
        len += bet_len;
    }

    if start < bets.len() {
        batches.push(&bets[start..]);
    }

    batches
}

/// The client side of a single agency
pub struct Agency {
    id: AgencyId,
    conn: Connection,
}

impl Agency {
    /// Connects to the server and registers as agency `id`
    pub async fn connect(addr: std::net::SocketAddr, id: AgencyId) -> Result<Self, ClientError> {
        let mut conn = Connection::connect(addr).await?;
        conn.send(&FromClient::Connect { agency: id }).await?;
        tracing::debug!(agency = id, "connected to {}", addr);

        Ok(Self { id, conn })
    }

    /// Sends a single batch and waits for it to be confirmed
    pub async fn send_batch(&mut self, bets: &[Bet]) -> Result<(), ClientError> {
        self.conn
            .send(&FromClient::BetBatch {
                agency: self.id,
                bets: bets.to_vec(),
            })
            .await?;

        match self.conn.read::<ToClient>().await? {
            ToClient::Confirmation => Ok(()),
            reply => Err(ClientError::UnexpectedReply(reply)),
        }
    }

    pub async fn finish(&mut self) -> Result<(), ClientError> {
        self.conn
            .send(&FromClient::Finished { agency: self.id })
            .await?;
        Ok(())
    }

    /// Asks for the winners, consulting again every `poll_interval` while told to wait
    pub async fn consult_winners(
        mut self,
        poll_interval: Duration,
    ) -> Result<Vec<Document>, ClientError> {
        loop {
            self.conn
                .send(&FromClient::ConsultWinners { agency: self.id })
                .await?;

            match self.conn.read::<ToClient>().await? {
                ToClient::Winners(documents) => return Ok(documents),
                ToClient::Wait => {
                    tracing::debug!(agency = self.id, "the draw is not ready yet");
                    tokio::time::sleep(poll_interval).await;
                }
                reply => return Err(ClientError::UnexpectedReply(reply)),
            }
        }
    }
}

/// Loads the agency's bets from disk
pub async fn load_bets(agency: AgencyId, path: &Path) -> anyhow::Result<Vec<Bet>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    parse_bets_csv(agency, &content).with_context(|| format!("invalid bets file {}", path.display()))
}

/// Sends every bet of the agency, then waits for its winners
pub async fn run(config: &AgencyConfig) -> anyhow::Result<Vec<Document>> {
    let bets = load_bets(config.id, &config.bets).await?;

    let mut agency = Agency::connect(config.server, config.id)
        .await
        .context("failed to connect to the server")?;

    for batch in batches(&bets, config.batch_size) {
        agency.send_batch(batch).await?;
        tracing::debug!(agency = config.id, bets = batch.len(), "batch confirmed");
    }
    tracing::info!(agency = config.id, bets = bets.len(), "all bets were sent");

    agency.finish().await?;
    let winners = agency.consult_winners(config.poll_interval()).await?;
    tracing::info!(agency = config.id, winners = winners.len(), "received the winners");

    Ok(winners)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{batches, parse_bets_csv, Agency};
    use crate::{
        config::ConsultMode,
        draw::winning_number,
        server::Server,
        store::{Bet, Birthdate, MemoryStore},
    };

    fn bets(count: usize, name_len: usize) -> Vec<Bet> {
        (0..count)
            .map(|idx| Bet {
                agency: 1,
                first_name: "a".repeat(name_len),
                last_name: "b".into(),
                document: idx as u32,
                birthdate: Birthdate::new(2000, 1, 1),
                number: 1,
            })
            .collect()
    }

    #[test]
    fn parse_csv() {
        let content = "Ana,Diaz,30904465,1990-05-12,1234\n\n Santiago Lionel , Lorca,30904466,1999-03-17,7574 \n";
        let parsed = parse_bets_csv(1, content).unwrap();

        assert_eq!(
            parsed,
            [
                Bet {
                    agency: 1,
                    first_name: "Ana".into(),
                    last_name: "Diaz".into(),
                    document: 30904465,
                    birthdate: Birthdate::new(1990, 5, 12),
                    number: 1234,
                },
                Bet {
                    agency: 1,
                    first_name: "Santiago Lionel".into(),
                    last_name: "Lorca".into(),
                    document: 30904466,
                    birthdate: Birthdate::new(1999, 3, 17),
                    number: 7574,
                },
            ]
        );
    }

    #[test]
    fn reject_malformed_csv() {
        let err = parse_bets_csv(1, "Ana,Diaz,30904465,1990-05-12\n").unwrap_err();
        assert_eq!(err.to_string(), "line 1: expected 5 fields, got 4");

        let err = parse_bets_csv(1, "Ana,Diaz,1,1990-05-12,1\nBob,Ruiz,x,1990-05-12,1").unwrap_err();
        assert!(err.to_string().starts_with("line 2: invalid document"));

        assert!(parse_bets_csv(1, "Ana,Diaz,1,1990-05-12,70000").is_err());
        assert!(parse_bets_csv(1, "A|na,Diaz,1,1990-05-12,1").is_err());
    }

    #[test]
    fn batches_respect_the_bet_count() {
        let bets = bets(250, 3);
        let sizes: Vec<_> = batches(&bets, 100).iter().map(|batch| batch.len()).collect();
        assert_eq!(sizes, [100, 100, 50]);

        assert!(batches(&[], 100).is_empty());
        assert_eq!(batches(&bets[..3], 0).len(), 3);
    }

    #[test]
    fn batches_fit_in_a_frame() {
        // each record takes 10 + 1000 + 1 + 2 = 1013 bytes, 64 of them fit in a frame
        let bets = bets(100, 1000);
        let sizes: Vec<_> = batches(&bets, 100).iter().map(|batch| batch.len()).collect();
        assert_eq!(sizes, [64, 36]);
    }

    #[tokio::test]
    async fn agency_polls_until_the_draw() {
        let server = Server::bind(
            "127.0.0.1:0".parse().unwrap(),
            [1, 2],
            winning_number(1),
            std::sync::Arc::new(MemoryStore::new()),
            ConsultMode::Poll,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        let mut first = Agency::connect(addr, 1).await.unwrap();
        let all = bets(250, 3);
        for batch in batches(&all, 100) {
            first.send_batch(batch).await.unwrap();
        }
        first.finish().await.unwrap();
        let consult = tokio::spawn(first.consult_winners(Duration::from_millis(10)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!consult.is_finished());

        let mut second = Agency::connect(addr, 2).await.unwrap();
        second.finish().await.unwrap();

        let winners = tokio::time::timeout(Duration::from_secs(5), consult)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(winners, (0..250).collect::<Vec<u32>>());

        shutdown.trigger();
        task.await.unwrap().unwrap();
    }
}
