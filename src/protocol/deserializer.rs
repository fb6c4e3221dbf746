use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::io::AsyncReadExt;

use super::message::{
    message_type, FromClient, ToClient, BET_FIXED_LEN, NAME_DELIMITER, SIZE_LEN, TERMINATOR,
};
use crate::store::{AgencyId, Bet, Birthdate, Document};

#[async_trait]
pub trait Deserialize: Sized {
    type Error;

    // Deserialize a structure from a reader
    async fn deserialize<R: AsyncReadExt + Unpin + Send>(
        reader: &mut R,
    ) -> Result<Self, Self::Error>;
}

#[derive(thiserror::Error, Debug)]
pub enum DeserializeError {
    #[error("{0}")]
    Io(#[from] tokio::io::Error),

    #[error("The peer closed the connection")]
    Closed,

    #[error("The frame is too short: {0} bytes")]
    Truncated(u16),

    #[error("Unknown message type: {0}")]
    UnknownType(u8),

    #[error("The winners list is not made of 4-byte documents")]
    MalformedWinners,
}

/// Reads a single frame and returns everything after the size prefix,
/// with the trailing terminator removed
///
/// the frame must be at least `min_len` bytes long, including the prefix.
async fn read_frame<R: AsyncReadExt + Unpin + Send>(
    reader: &mut R,
    min_len: usize,
) -> Result<Bytes, DeserializeError> {
    // an EOF before the first byte is a clean disconnection
    let mut size = [0u8; SIZE_LEN];
    if reader.read(&mut size[..1]).await? == 0 {
        return Err(DeserializeError::Closed);
    }
    reader.read_exact(&mut size[1..]).await?;

    let size = u16::from_be_bytes(size);
    if (size as usize) < min_len {
        return Err(DeserializeError::Truncated(size));
    }

    // read_exact keeps reading until the declared length is reached
    let mut body = vec![0u8; size as usize - SIZE_LEN];
    reader.read_exact(&mut body).await?;

    if body.last() == Some(&TERMINATOR) {
        body.pop();
    }

    Ok(body.into())
}

/// Parses the records of a bet batch payload
///
/// parsing stops at the first record that is cut short or is missing one of its
/// delimiters, the bets that were parsed before it are still returned.
pub fn parse_bets(agency: AgencyId, mut payload: &[u8]) -> Vec<Bet> {
    let mut bets = Vec::new();

    while payload.remaining() >= BET_FIXED_LEN {
        let number = payload.get_u16();
        let document = payload.get_u32();
        let day = payload.get_u8();
        let month = payload.get_u8();
        let year = payload.get_u16();

        let Some(first_end) = payload.iter().position(|&b| b == NAME_DELIMITER) else {
            break;
        };
        let Some(second_end) = payload[first_end + 1..]
            .iter()
            .position(|&b| b == NAME_DELIMITER)
            .map(|idx| idx + first_end + 1)
        else {
            break;
        };

        let (Ok(first_name), Ok(last_name)) = (
            std::str::from_utf8(&payload[..first_end]),
            std::str::from_utf8(&payload[first_end + 1..second_end]),
        ) else {
            break;
        };

        bets.push(Bet {
            agency,
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
            document,
            birthdate: Birthdate::new(year, month, day),
            number,
        });

        payload.advance(second_end + 1);
    }

    bets
}

/// Parses a concatenation of 4-byte documents
pub fn parse_documents(payload: &[u8]) -> Result<Vec<Document>, DeserializeError> {
    if payload.len() % 4 != 0 {
        return Err(DeserializeError::MalformedWinners);
    }

    Ok(payload
        .chunks_exact(4)
        .map(|mut chunk| chunk.get_u32())
        .collect())
}

#[async_trait]
impl Deserialize for FromClient {
    type Error = DeserializeError;

    async fn deserialize<R: AsyncReadExt + Unpin + Send>(
        reader: &mut R,
    ) -> Result<Self, Self::Error> {
        // size + type + agency
        let mut body = read_frame(reader, SIZE_LEN + 2).await?;
        let ty = body.get_u8();
        let agency = body.get_u8();

        let msg = match ty {
            message_type::CONNECT => Self::Connect { agency },
            message_type::BET_BATCH => Self::BetBatch {
                agency,
                bets: parse_bets(agency, &body),
            },
            message_type::FINISHED => Self::Finished { agency },
            message_type::CONSULT_WINNERS => Self::ConsultWinners { agency },

            _ => return Err(DeserializeError::UnknownType(ty)),
        };

        Ok(msg)
    }
}

#[async_trait]
impl Deserialize for ToClient {
    type Error = DeserializeError;

    async fn deserialize<R: AsyncReadExt + Unpin + Send>(
        reader: &mut R,
    ) -> Result<Self, Self::Error> {
        // size + type
        let mut body = read_frame(reader, SIZE_LEN + 1).await?;
        let ty = body.get_u8();

        let msg = match ty {
            message_type::CONFIRMATION => Self::Confirmation,
            message_type::WINNERS => Self::Winners(parse_documents(&body)?),
            message_type::WAIT => Self::Wait,

            _ => return Err(DeserializeError::UnknownType(ty)),
        };

        Ok(msg)
    }
}
