//! Canonical JSON rendering used to normalize documents before signing.
//!
//! Object keys are sorted by their UTF-8 bytes at every level and no
//! insignificant whitespace is emitted, so two semantically equal values
//! always produce the same byte string regardless of field order.

use serde::Serialize;

use super::DidError;

/// Serialize `value` into canonical JSON bytes.
///
/// Going through `Value` sorts every object, since `serde_json::Map` is
/// ordered by key unless `preserve_order` is enabled.
pub fn to_canonical_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, DidError> {
    serde_json::to_value(value)
        .and_then(|value| serde_json::to_vec(&value))
        .map_err(|e| DidError::Encoding(e.to_string()))
}
