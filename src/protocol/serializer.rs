use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;

use super::message::{
    FromClient, ToClient, BET_FIXED_LEN, NAME_DELIMITER, SIZE_LEN, TERMINATOR,
};
use crate::store::Bet;

#[async_trait]
pub trait Serialize: Sized {
    type Error;

    /// Serialize a structure into a writer
    async fn serialize<W: AsyncWriteExt + Unpin + Send>(
        &self,
        writer: &mut W,
    ) -> Result<(), Self::Error>;
}

#[derive(thiserror::Error, Debug)]
pub enum SerializeError {
    #[error("The frame is too long: {0} bytes")]
    TooLong(usize),

    #[error("{0}")]
    Io(#[from] tokio::io::Error),
}

/// Bytes a single bet record takes inside a bet batch payload
pub fn encoded_bet_len(bet: &Bet) -> usize {
    BET_FIXED_LEN + bet.first_name.len() + bet.last_name.len() + 2
}

fn put_bet(buf: &mut BytesMut, bet: &Bet) {
    buf.put_u16(bet.number);
    buf.put_u32(bet.document);
    buf.put_u8(bet.birthdate.day);
    buf.put_u8(bet.birthdate.month);
    buf.put_u16(bet.birthdate.year);
    buf.put_slice(bet.first_name.as_bytes());
    buf.put_u8(NAME_DELIMITER);
    buf.put_slice(bet.last_name.as_bytes());
    buf.put_u8(NAME_DELIMITER);
}

/// Wraps a frame body (type, header and payload) with the size prefix and terminator
fn frame(body: &[u8]) -> Result<BytesMut, SerializeError> {
    let len = SIZE_LEN + body.len() + 1;
    let size: u16 = len.try_into().map_err(|_| SerializeError::TooLong(len))?;

    let mut buf = BytesMut::with_capacity(len);
    buf.put_u16(size);
    buf.put_slice(body);
    buf.put_u8(TERMINATOR);

    Ok(buf)
}

impl FromClient {
    /// Encodes the message into a single frame
    pub fn to_frame(&self) -> Result<BytesMut, SerializeError> {
        let mut body = BytesMut::new();
        body.put_u8(self.message_type());
        body.put_u8(self.agency());

        if let Self::BetBatch { bets, .. } = self {
            for bet in bets {
                put_bet(&mut body, bet);
            }
        }

        frame(&body)
    }
}

impl ToClient {
    /// Encodes the message into a single frame
    pub fn to_frame(&self) -> Result<BytesMut, SerializeError> {
        let mut body = BytesMut::new();
        body.put_u8(self.message_type());

        if let Self::Winners(documents) = self {
            for document in documents {
                body.put_u32(*document);
            }
        }

        frame(&body)
    }
}

#[async_trait]
impl Serialize for FromClient {
    type Error = SerializeError;

    async fn serialize<W: AsyncWriteExt + Unpin + Send>(
        &self,
        writer: &mut W,
    ) -> Result<(), Self::Error> {
        // write_all keeps writing until the entire frame was accepted
        writer.write_all(&self.to_frame()?).await?;
        Ok(())
    }
}

#[async_trait]
impl Serialize for ToClient {
    type Error = SerializeError;

    async fn serialize<W: AsyncWriteExt + Unpin + Send>(
        &self,
        writer: &mut W,
    ) -> Result<(), Self::Error> {
        writer.write_all(&self.to_frame()?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        protocol::{
            deserializer::Deserialize,
            message::{FromClient, ToClient},
            serializer::{encoded_bet_len, Serialize, SerializeError},
        },
        store::{Bet, Birthdate},
    };

    #[tokio::test]
    async fn serialize_responses() {
        let values = [
            ToClient::Confirmation,
            ToClient::Wait,
            ToClient::Winners(vec![]),
            ToClient::Winners(vec![30904465]),
            ToClient::Winners(vec![1, 0xffffffff]),
        ];

        let mut serialized_values = Vec::with_capacity(values.len());
        for value in values {
            let mut raw = vec![];
            value.serialize(&mut raw).await.unwrap();
            serialized_values.push(raw);
        }

        let expected_values: [&[u8]; 5] = [
            b"\x00\x04\x15\x0a",
            b"\x00\x04\x19\x0a",
            b"\x00\x04\x16\x0a",
            b"\x00\x08\x16\x01\xd7\x90\x91\x0a",
            b"\x00\x0c\x16\x00\x00\x00\x01\xff\xff\xff\xff\x0a",
        ];

        assert_eq!(serialized_values, expected_values)
    }

    #[tokio::test]
    async fn serialize_requests() {
        let values = [
            FromClient::Connect { agency: 1 },
            FromClient::Finished { agency: 2 },
            FromClient::ConsultWinners { agency: 3 },
            FromClient::BetBatch {
                agency: 1,
                bets: vec![Bet {
                    agency: 1,
                    first_name: "Ana".into(),
                    last_name: "Diaz".into(),
                    document: 30904465,
                    birthdate: Birthdate::new(1990, 5, 12),
                    number: 1234,
                }],
            },
        ];

        let mut serialized_values = Vec::with_capacity(values.len());
        for value in values {
            let mut raw = vec![];
            value.serialize(&mut raw).await.unwrap();
            serialized_values.push(raw);
        }

        let expected_values: [&[u8]; 4] = [
            b"\x00\x05\x0a\x01\x0a",
            b"\x00\x05\x14\x02\x0a",
            b"\x00\x05\x17\x03\x0a",
            b"\x00\x18\x0e\x01\x04\xd2\x01\xd7\x90\x91\x0c\x05\x07\xc6Ana|Diaz|\x0a",
        ];

        assert_eq!(serialized_values, expected_values)
    }

    #[tokio::test]
    async fn bet_batch_keeps_every_field() {
        let bets: Vec<_> = [
            ("María José", "Núñez", 1, 1, 1, 1900, 0),
            ("O'Neil", "Smith-Jones", 99999999, 31, 12, 2004, 9999),
            ("", "", u32::MAX, 0, 0, 0, u16::MAX),
        ]
        .into_iter()
        .map(|(first, last, document, day, month, year, number)| Bet {
            agency: 4,
            first_name: first.into(),
            last_name: last.into(),
            document,
            birthdate: Birthdate::new(year, month, day),
            number,
        })
        .collect();

        let message = FromClient::BetBatch {
            agency: 4,
            bets: bets.clone(),
        };
        let raw = message.to_frame().unwrap();
        assert_eq!(
            raw.len(),
            5 + bets.iter().map(encoded_bet_len).sum::<usize>()
        );

        let decoded = FromClient::deserialize(&mut raw.as_ref()).await.unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn frame_size_limit() {
        // 2 + 1 + 4 * 16382 + 1 = 65532
        assert!(ToClient::Winners(vec![7; 16382]).to_frame().is_ok());

        let result = ToClient::Winners(vec![7; 16384]).to_frame();
        assert!(matches!(result, Err(SerializeError::TooLong(65540))));
    }
}
