use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use tokio::sync::{watch, OnceCell};

use crate::{
    shutdown::Shutdown,
    store::{AgencyId, Bet, BetStore, Document, LotteryNumber, StoreError},
};

/// Decides whether a bet won the draw
pub type WinningPredicate = Arc<dyn Fn(&Bet) -> bool + Send + Sync>;

/// A predicate where every agency draws the same number
pub fn winning_number(number: LotteryNumber) -> WinningPredicate {
    Arc::new(move |bet: &Bet| bet.number == number)
}

/// The documents of the winning bets, grouped by agency
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Winners {
    by_agency: HashMap<AgencyId, Vec<Document>>,
}

impl Winners {
    fn from_bets(bets: &[Bet], predicate: &WinningPredicate) -> Self {
        let mut by_agency: HashMap<_, Vec<_>> = HashMap::new();
        for bet in bets.iter().filter(|bet| predicate(bet)) {
            by_agency.entry(bet.agency).or_default().push(bet.document);
        }

        Self { by_agency }
    }

    /// The winning documents of a single agency, in the order the bets were stored
    pub fn for_agency(&self, agency: AgencyId) -> &[Document] {
        self.by_agency
            .get(&agency)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.by_agency.values().map(Vec::len).sum()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DrawError {
    #[error("Not every agency has finished betting yet")]
    NotReady,

    #[error("{0}")]
    Store(#[from] StoreError),
}

/// How a wait on the draw ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Terminated,
}

/// Collects the agencies that finished betting and runs the draw once all did
///
/// the draw moves from collecting to ready exactly once and never goes back.
pub struct DrawCoordinator {
    expected: HashSet<AgencyId>,
    finished: Mutex<HashSet<AgencyId>>,
    // flips to true once `finished` covers `expected`
    ready: watch::Sender<bool>,
    winners: OnceCell<Winners>,
    predicate: WinningPredicate,
    shutdown: Shutdown,
}

impl std::fmt::Debug for DrawCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawCoordinator")
            .field("expected", &self.expected)
            .field("finished", &self.finished)
            .field("ready", &self.is_ready())
            .field("winners", &self.winners.get())
            .finish_non_exhaustive()
    }
}

impl DrawCoordinator {
    pub fn new(
        expected: impl IntoIterator<Item = AgencyId>,
        predicate: WinningPredicate,
        shutdown: Shutdown,
    ) -> Self {
        let expected: HashSet<_> = expected.into_iter().collect();
        let (ready, _) = watch::channel(expected.is_empty());

        Self {
            expected,
            finished: Mutex::default(),
            ready,
            winners: OnceCell::new(),
            predicate,
            shutdown,
        }
    }

    pub fn is_expected(&self, agency: AgencyId) -> bool {
        self.expected.contains(&agency)
    }

    /// Records that an agency has finished betting
    ///
    /// returns true if every expected agency has finished, in which case
    /// everyone waiting for the draw is woken up.
    pub fn mark_finished(&self, agency: AgencyId) -> bool {
        let mut finished = self.finished.lock().unwrap();
        finished.insert(agency);

        let complete = self.expected.is_subset(&finished);
        if complete {
            self.ready.send_replace(true);
        }

        complete
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Waits until every expected agency has finished, or until the server shuts down
    pub async fn wait_until_ready_or_shutdown(&self) -> Readiness {
        let mut ready = self.ready.subscribe();

        tokio::select! {
            biased;

            // wait_for re-checks the flag on every wake
            result = ready.wait_for(|ready| *ready) => match result {
                Ok(_) => Readiness::Ready,
                Err(_) => Readiness::Terminated,
            },
            _ = self.shutdown.wait() => Readiness::Terminated,
        }
    }

    /// Runs the draw on the first call and returns the cached result afterwards
    ///
    /// concurrent callers wait for the single scan of the store to complete.
    /// if the scan fails nothing is cached, and the next call retries it.
    pub async fn compute_winners_once(&self, store: &dyn BetStore) -> Result<&Winners, DrawError> {
        if !self.is_ready() {
            return Err(DrawError::NotReady);
        }

        let winners = self
            .winners
            .get_or_try_init(|| async {
                let bets = store.all().await?;
                let winners = Winners::from_bets(&bets, &self.predicate);
                tracing::info!(
                    bets = bets.len(),
                    winners = winners.total(),
                    "the draw has taken place"
                );

                Ok::<_, StoreError>(winners)
            })
            .await?;

        Ok(winners)
    }

    /// The winning documents of an agency, None until the draw has taken place
    pub fn winners_for(&self, agency: AgencyId) -> Option<Vec<Document>> {
        self.winners
            .get()
            .map(|winners| winners.for_agency(agency).to_vec())
    }
}
