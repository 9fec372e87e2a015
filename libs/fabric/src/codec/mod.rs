use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub mod bincode;

pub use self::bincode::BincodeCodec;

/// Turns typed request and response messages into exchange payloads and back
///
/// Codecs are cloned into every handler and client call, so they should be
/// cheap to copy.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Encode a message into a payload
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode a payload into a message
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}
