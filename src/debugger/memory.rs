//! Linear memory reads for a paused frame.
//!
//! CDP exposes no direct wasm memory command, the bytes are fetched by
//! evaluating a `Uint8Array` view over the instance's exported memory on the
//! paused call frame. Fetched ranges are cached for the lifetime of the
//! paused state, so at most one round-trip happens per (address, size) key.

use crate::cdp::SessionCdp;
use crate::debugger::error::Error;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryEvaluator {
    cache: HashMap<(u64, usize), Vec<u8>>,
}

impl MemoryEvaluator {
    /// Read `byte_size` bytes of linear memory at `address`.
    ///
    /// # Arguments
    ///
    /// * `cdp`: session of the paused target
    /// * `call_frame_id`: frame the read expression is evaluated on
    pub fn read(
        &mut self,
        cdp: &SessionCdp,
        call_frame_id: &str,
        address: u64,
        byte_size: usize,
    ) -> Result<Vec<u8>, Error> {
        if let Some(bytes) = self.cache.get(&(address, byte_size)) {
            return Ok(bytes.clone());
        }

        let expression = format!(
            "new Uint8Array(memories[0].buffer).subarray({address}, {})",
            address + byte_size as u64
        );
        let result = cdp.evaluate_on_call_frame(call_frame_id, &expression)?;

        let bytes = decode_byte_array(result.value.as_ref())
            .ok_or(Error::ProtocolViolation("memory read returned no bytes"))?;

        self.cache.insert((address, byte_size), bytes.clone());
        Ok(bytes)
    }
}

/// `returnByValue` serializes a `Uint8Array` subarray either as a JSON array
/// or as an object keyed by element index.
fn decode_byte_array(value: Option<&serde_json::Value>) -> Option<Vec<u8>> {
    match value? {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().map(|b| b as u8))
            .collect::<Option<Vec<u8>>>(),
        serde_json::Value::Object(map) => {
            let mut bytes = vec![0u8; map.len()];
            for (key, v) in map {
                let index: usize = key.parse().ok()?;
                if index >= bytes.len() {
                    return None;
                }
                bytes[index] = v.as_u64()? as u8;
            }
            Some(bytes)
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_byte_array_decoding() {
        assert_eq!(
            decode_byte_array(Some(&json!([1, 2, 255]))),
            Some(vec![1, 2, 255])
        );
        assert_eq!(
            decode_byte_array(Some(&json!({"0": 7, "1": 8}))),
            Some(vec![7, 8])
        );
        assert_eq!(decode_byte_array(Some(&json!("nope"))), None);
        assert_eq!(decode_byte_array(None), None);
    }
}
