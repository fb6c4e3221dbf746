use std::net::SocketAddr;

use tokio::{
    io::{AsyncWriteExt, BufReader, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

use super::{
    deserializer::Deserialize,
    serializer::{Serialize, SerializeError},
};

/// A framed wrapper around a TcpStream
///
/// used by both ends of the protocol, the message types decide the direction.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();

        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            peer,
        }
    }

    /// Connects to `addr` and wraps the resulting stream
    pub async fn connect(addr: SocketAddr) -> tokio::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream, addr))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reads a single message from the connection
    pub async fn read<M: Deserialize + Send>(&mut self) -> Result<M, M::Error> {
        M::deserialize(&mut self.reader).await
    }

    /// Writes a single message and flushes it to the socket
    pub async fn send<M>(&mut self, message: &M) -> Result<(), SerializeError>
    where
        M: Serialize<Error = SerializeError> + Sync,
    {
        message.serialize(&mut self.writer).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Flushes whatever is left and closes the write half of the socket
    pub async fn shutdown(&mut self) -> tokio::io::Result<()> {
        self.writer.shutdown().await
    }
}
