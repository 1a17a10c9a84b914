//! JSON Codec using `serde_json`

use crate::traits::CacheCodec;
use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON Codec using `serde_json`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_rejects_non_string_map_keys() {
        let mut value = HashMap::new();
        value.insert(vec![1u8], "x");
        assert!(JsonCodec.serialize(&value).is_err());
    }

    #[test]
    fn test_corrupt_bytes_fail_to_decode() {
        let decoded: Result<serde_json::Value> = JsonCodec.deserialize(b"{not json");
        assert!(decoded.is_err());
    }
}
