//! `MessagePack` Codec using `rmp-serde`
//!
//! Binary alternative for values JSON cannot represent (e.g. maps keyed by
//! non-strings) or where payload size matters more than readability.

use crate::traits::CacheCodec;
use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// `MessagePack` Codec using `rmp-serde`
///
/// Structs are encoded as maps (field names kept) so adding an optional field
/// to a cached type does not invalidate entries already in the remote store.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl CacheCodec for MsgPackCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}
