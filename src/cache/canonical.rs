//! Canonical JSON serialization for cache keys.
//!
//! Header and parameter maps are stored as JSON text with every object's keys sorted, so two
//! logically identical requests produce byte-identical keys no matter how the caller built
//! their maps.

// self
use crate::{_prelude::*, cache::CacheError};

/// Recursively rebuilds `value` with object keys in sorted order.
pub fn canonicalize(value: JsonValue) -> JsonValue {
	match value {
		JsonValue::Object(map) => {
			let sorted: BTreeMap<String, JsonValue> =
				map.into_iter().map(|(key, value)| (key, canonicalize(value))).collect();
			let mut out = serde_json::Map::with_capacity(sorted.len());

			for (key, value) in sorted {
				out.insert(key, value);
			}

			JsonValue::Object(out)
		},
		JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(canonicalize).collect()),
		other => other,
	}
}

/// Serializes any value to canonical JSON text.
pub fn canonical_text<T>(value: &T) -> Result<String, CacheError>
where
	T: ?Sized + Serialize,
{
	let value = serde_json::to_value(value).map_err(|source| CacheError::Encode { source })?;

	serde_json::to_string(&canonicalize(value)).map_err(|source| CacheError::Encode { source })
}

/// Builds the stored key for a header or parameter map.
///
/// Null values and empty maps/sequences yield `None`, which is stored as SQL `NULL`.
pub fn canonical_key<T>(value: &T) -> Result<Option<String>, CacheError>
where
	T: ?Sized + Serialize,
{
	let value = serde_json::to_value(value).map_err(|source| CacheError::Encode { source })?;
	let empty = match &value {
		JsonValue::Null => true,
		JsonValue::Object(map) => map.is_empty(),
		JsonValue::Array(items) => items.is_empty(),
		_ => false,
	};

	if empty {
		return Ok(None);
	}

	serde_json::to_string(&canonicalize(value))
		.map(Some)
		.map_err(|source| CacheError::Encode { source })
}
