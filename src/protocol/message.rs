use crate::store::{AgencyId, Bet, Document};

/// Bytes taken by the size prefix of every frame
pub const SIZE_LEN: usize = 2;

/// Every frame ends with this byte, and it is counted by the size prefix
pub const TERMINATOR: u8 = b'\n';

/// Separates (and ends) the first and last name of a bet record
pub const NAME_DELIMITER: u8 = b'|';

/// number(2) + document(4) + day(1) + month(1) + year(2)
pub const BET_FIXED_LEN: usize = 10;

pub mod message_type {
    pub const CONNECT: u8 = 10;
    pub const BET_BATCH: u8 = 14;
    pub const FINISHED: u8 = 20;
    pub const CONFIRMATION: u8 = 21;
    pub const WINNERS: u8 = 22;
    pub const CONSULT_WINNERS: u8 = 23;
    pub const WAIT: u8 = 25;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromClient {
    Connect { agency: AgencyId },
    BetBatch { agency: AgencyId, bets: Vec<Bet> },
    Finished { agency: AgencyId },
    ConsultWinners { agency: AgencyId },
}

impl FromClient {
    /// The agency byte carried in the frame header
    pub fn agency(&self) -> AgencyId {
        match self {
            Self::Connect { agency }
            | Self::BetBatch { agency, .. }
            | Self::Finished { agency }
            | Self::ConsultWinners { agency } => *agency,
        }
    }

    pub fn message_type(&self) -> u8 {
        match self {
            Self::Connect { .. } => message_type::CONNECT,
            Self::BetBatch { .. } => message_type::BET_BATCH,
            Self::Finished { .. } => message_type::FINISHED,
            Self::ConsultWinners { .. } => message_type::CONSULT_WINNERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToClient {
    /// The last bet batch has been stored
    Confirmation,
    /// The documents of the winning bets of the consulting agency
    Winners(Vec<Document>),
    /// The draw has not taken place yet, consult again later
    Wait,
}

impl ToClient {
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Confirmation => message_type::CONFIRMATION,
            Self::Winners(_) => message_type::WINNERS,
            Self::Wait => message_type::WAIT,
        }
    }
}
