//! Typed wasm value snapshots and the adapter that builds them from CDP
//! `Runtime.getProperties` listings.
//!
//! Chrome models a paused wasm frame's operand stack, locals and globals as
//! scope objects whose properties are either plain numbers, bigints, or
//! wrapper objects carrying a `{type, value}` pair. Big integers that do not
//! fit a JS number arrive spelled as decimal digits with a trailing `n`.

use crate::cdp::types::{PropertyDescriptor, RemoteObject};
use crate::cdp::SessionCdp;
use crate::debugger::dwarf::subroutine::WasmLoc;
use crate::debugger::error::Error;
use num_bigint::BigInt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WasmValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl WasmValue {
    /// Little-endian byte image of the value, padded to eight bytes.
    pub fn to_le_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        match self {
            WasmValue::I32(v) => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            WasmValue::I64(v) => bytes.copy_from_slice(&v.to_le_bytes()),
            WasmValue::F32(v) => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            WasmValue::F64(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        }
        bytes
    }

    /// The value as a linear-memory address, integers only.
    pub fn as_address(self) -> Option<u64> {
        match self {
            WasmValue::I32(v) => Some(v as u32 as u64),
            WasmValue::I64(v) => Some(v as u64),
            WasmValue::F32(_) | WasmValue::F64(_) => None,
        }
    }
}

impl std::fmt::Display for WasmValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WasmValue::I32(v) => write!(f, "{v}"),
            WasmValue::I64(v) => write!(f, "{v}"),
            WasmValue::F32(v) => write!(f, "{v}"),
            WasmValue::F64(v) => write!(f, "{v}"),
        }
    }
}

/// Snapshot of the three wasm value vectors of one paused frame.
#[derive(Debug, Clone, Default)]
pub struct ValueStores {
    pub stacks: Vec<WasmValue>,
    pub locals: Vec<WasmValue>,
    pub globals: Vec<WasmValue>,
}

impl ValueStores {
    pub fn slot(&self, loc: WasmLoc) -> Option<WasmValue> {
        let (slots, index) = match loc {
            WasmLoc::Local(idx) => (&self.locals, idx),
            WasmLoc::Global(idx) => (&self.globals, idx),
            WasmLoc::Stack(idx) => (&self.stacks, idx),
        };
        slots.get(index as usize).copied()
    }
}

/// Convert a scope object's property listing into a typed value vector.
///
/// Entries already carrying a scalar are pushed directly (`number` as i32,
/// `bigint` as i64). Anything else is a wrapper object: one more
/// `getProperties` round-trip fetches its `type` and `value` members.
pub fn values_from_properties(
    cdp: &SessionCdp,
    properties: Vec<PropertyDescriptor>,
) -> Result<Vec<WasmValue>, Error> {
    let mut values = Vec::with_capacity(properties.len());

    for property in properties {
        let Some(object) = property.value else {
            continue;
        };

        match object.object_type.as_deref() {
            Some("number") => values.push(WasmValue::I32(number_value(&object)? as i32)),
            Some("bigint") => values.push(WasmValue::I64(bigint_value(&object)?)),
            _ => {
                let object_id = object
                    .object_id
                    .as_deref()
                    .ok_or(Error::ProtocolViolation("scope entry without object id"))?;
                values.push(unwrap_value_object(cdp, object_id)?);
            }
        }
    }

    Ok(values)
}

fn unwrap_value_object(cdp: &SessionCdp, object_id: &str) -> Result<WasmValue, Error> {
    let members = cdp.get_properties(object_id)?;

    let mut value_type = None;
    let mut value = None;
    for member in members {
        match member.name.as_str() {
            "type" => value_type = member.value,
            "value" => value = member.value,
            _ => {}
        }
    }

    let value_type = value_type
        .as_ref()
        .and_then(|o| o.value.as_ref())
        .and_then(|v| v.as_str())
        .ok_or(Error::ProtocolViolation("wasm value without type tag"))?
        .to_string();
    let value = value.ok_or(Error::ProtocolViolation("wasm value without payload"))?;

    match value_type.as_str() {
        "i32" => Ok(WasmValue::I32(number_value(&value)? as i32)),
        "i64" => Ok(WasmValue::I64(bigint_value(&value)?)),
        "f32" => Ok(WasmValue::F32(float_value(&value)? as f32)),
        "f64" => Ok(WasmValue::F64(float_value(&value)?)),
        other => Err(Error::UnexpectedValueType(other.to_string())),
    }
}

fn number_value(object: &RemoteObject) -> Result<i64, Error> {
    if let Some(v) = object.value.as_ref() {
        if let Some(n) = v.as_i64() {
            return Ok(n);
        }
        if let Some(n) = v.as_f64() {
            return Ok(n as i64);
        }
    }
    Err(Error::ProtocolViolation("expected a numeric value"))
}

fn float_value(object: &RemoteObject) -> Result<f64, Error> {
    object
        .value
        .as_ref()
        .and_then(|v| v.as_f64())
        .ok_or(Error::ProtocolViolation("expected a float value"))
}

/// Big integers arrive either as a native number or as a decimal string with
/// a literal `n` suffix (`"81985529216486895n"`).
fn bigint_value(object: &RemoteObject) -> Result<i64, Error> {
    if let Some(v) = object.value.as_ref() {
        if let Some(n) = v.as_i64() {
            return Ok(n);
        }
        if let Some(s) = v.as_str() {
            return parse_bigint_literal(s);
        }
    }
    if let Some(s) = object.unserializable_value.as_deref() {
        return parse_bigint_literal(s);
    }
    Err(Error::ProtocolViolation("expected a bigint value"))
}

fn parse_bigint_literal(literal: &str) -> Result<i64, Error> {
    let digits = literal.strip_suffix('n').unwrap_or(literal);
    let value: BigInt = digits
        .parse()
        .map_err(|_| Error::ProtocolViolation("undecodable bigint literal"))?;
    // wasm i64 wraps around, bigints wider than 64 bit keep the low bits
    let masked = value & BigInt::from(u64::MAX);
    Ok(u64::try_from(masked).unwrap_or_default() as i64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bigint_literal_parsing() {
        assert_eq!(parse_bigint_literal("42n").unwrap(), 42);
        assert_eq!(parse_bigint_literal("42").unwrap(), 42);
        assert_eq!(parse_bigint_literal("-1n").unwrap(), -1);
        assert_eq!(
            parse_bigint_literal("18446744073709551615n").unwrap(),
            -1i64
        );
        assert!(parse_bigint_literal("0x10n").is_err());
    }

    #[test]
    fn test_value_byte_images() {
        assert_eq!(WasmValue::I32(1).to_le_bytes()[..4], 1i32.to_le_bytes());
        assert_eq!(WasmValue::I64(-2).to_le_bytes(), (-2i64).to_le_bytes());
        assert_eq!(WasmValue::F32(0.5).to_le_bytes()[..4], 0.5f32.to_le_bytes());
    }

    #[test]
    fn test_address_conversion() {
        assert_eq!(WasmValue::I32(-1).as_address(), Some(u32::MAX as u64));
        assert_eq!(WasmValue::I64(16).as_address(), Some(16));
        assert_eq!(WasmValue::F32(1.0).as_address(), None);
    }

    #[test]
    fn test_store_slot_lookup() {
        let stores = ValueStores {
            stacks: vec![WasmValue::I32(9)],
            locals: vec![WasmValue::I32(1), WasmValue::I64(2)],
            globals: vec![],
        };

        assert_eq!(stores.slot(WasmLoc::Local(1)), Some(WasmValue::I64(2)));
        assert_eq!(stores.slot(WasmLoc::Stack(0)), Some(WasmValue::I32(9)));
        assert_eq!(stores.slot(WasmLoc::Global(0)), None);
    }
}
