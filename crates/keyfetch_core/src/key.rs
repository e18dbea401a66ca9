//! Data keys: the identity used for dedup and cancellation grouping.
//!
//! A key is the canonical JSON text of `[operation_type, ...arguments]`.
//! JSON text is self-delimiting and keeps strings, numbers, booleans and
//! nulls apart, so `["1","2"]`, `["12"]` and `[1, 2]` all derive different
//! keys. Object members are emitted in sorted order regardless of how the
//! argument was built.

use crate::hash::Digest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Canonical identity of an `(operation_type, arguments)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataKey(String);

impl DataKey {
    /// Canonical text of the key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// BLAKE3 digest of the canonical text
    #[must_use]
    pub fn digest(&self) -> Digest {
        Digest::compute(self.0.as_bytes())
    }

    /// Short digest, for log fields
    #[must_use]
    pub fn short(&self) -> String {
        self.digest().short()
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DataKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the data key for an operation and its arguments
///
/// Pure and total: equal inputs (by value) always produce equal keys.
#[must_use]
pub fn derive_key(operation_type: &str, arguments: &[Value]) -> DataKey {
    let mut tuple = Vec::with_capacity(arguments.len() + 1);
    tuple.push(Value::String(operation_type.to_owned()));
    tuple.extend(arguments.iter().map(canonical));
    DataKey(Value::Array(tuple).to_string())
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(members) => {
            let mut sorted: Vec<(&String, &Value)> = members.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let map: Map<String, Value> = sorted
                .into_iter()
                .map(|(name, member)| (name.clone(), canonical(member)))
                .collect();
            Value::Object(map)
        }
        scalar => scalar.clone(),
    }
}
