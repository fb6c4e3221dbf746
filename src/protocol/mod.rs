pub mod connection;
pub mod deserializer;
pub mod message;
pub mod serializer;

pub use connection::Connection;
pub use deserializer::{Deserialize, DeserializeError};
pub use message::{FromClient, ToClient};
pub use serializer::{Serialize, SerializeError};
