use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

pub type AgencyId = u8;
pub type Document = u32;
pub type LotteryNumber = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Birthdate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Birthdate {
    pub fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }
}

impl fmt::Display for Birthdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("expected a date formatted as YYYY-MM-DD, got: {0:?}")]
pub struct BirthdateParseErr(String);

impl FromStr for Birthdate {
    type Err = BirthdateParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || BirthdateParseErr(s.to_owned());

        let mut parts = s.trim().splitn(3, '-');
        let (Some(year), Some(month), Some(day)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };

        Ok(Self {
            year: year.parse().map_err(|_| err())?,
            month: month.parse().map_err(|_| err())?,
            day: day.parse().map_err(|_| err())?,
        })
    }
}

impl From<Birthdate> for String {
    fn from(date: Birthdate) -> Self {
        date.to_string()
    }
}

impl TryFrom<String> for Birthdate {
    type Error = BirthdateParseErr;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single bet, as placed by a bettor at an agency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub agency: AgencyId,
    pub first_name: String,
    pub last_name: String,
    pub document: Document,
    pub birthdate: Birthdate,
    pub number: LotteryNumber,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

/// Persists bets for the draw
///
/// implementations serialize every call internally, so a scan through `all`
/// never observes a batch that is only partially appended.
#[async_trait]
pub trait BetStore: Send + Sync {
    /// Appends a batch of bets to the store
    async fn append(&self, bets: &[Bet]) -> Result<(), StoreError>;

    /// Returns every bet stored so far, in insertion order
    async fn all(&self) -> Result<Vec<Bet>, StoreError>;
}

#[cfg(test)]
pub(crate) fn bet(agency: AgencyId, document: Document, number: LotteryNumber) -> Bet {
    Bet {
        agency,
        first_name: "Ana".into(),
        last_name: "Diaz".into(),
        document,
        birthdate: Birthdate::new(1990, 5, 12),
        number,
    }
}
