//! Scope modeling helpers.

// std
use std::{collections::BTreeSet, slice::Iter};
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
// self
use crate::_prelude::*;

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace or delimiter characters.
	#[error("Scope contains a separator character: {scope}.")]
	ContainsSeparator {
		/// The offending scope string.
		scope: String,
	},
}

/// Normalized, deduplicated, sorted set of OAuth scopes.
///
/// Providers disagree on how scopes are joined on the wire (RFC 6749 uses spaces, some
/// vendors use commas), so the set itself is delimiter-free and callers pick the delimiter
/// with [`join`](Self::join) and [`parse_delimited`](Self::parse_delimited).
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeSet(Arc<[String]>);
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		normalize(scopes).map(Self)
	}

	/// Parses a scope string split on whitespace and the provided delimiter.
	///
	/// Empty segments are skipped so `"read,,activity:read"` and `""` both parse.
	pub fn parse_delimited(raw: &str, delimiter: char) -> Result<Self, ScopeValidationError> {
		Self::new(
			raw.split(|c: char| c == delimiter || c.is_whitespace())
				.filter(|segment| !segment.is_empty()),
		)
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the normalized set contains the provided scope.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.binary_search_by(|candidate| candidate.as_str().cmp(scope)).is_ok()
	}

	/// Returns true when every scope in `requested` is present in `self`.
	pub fn covers(&self, requested: &ScopeSet) -> bool {
		requested.iter().all(|scope| self.contains(scope))
	}

	/// Iterator over normalized scopes.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(|s| s.as_str())
	}

	/// Joins the scopes with the provided delimiter.
	pub fn join(&self, delimiter: char) -> String {
		let mut buf = String::new();

		for (idx, value) in self.0.iter().enumerate() {
			if idx > 0 {
				buf.push(delimiter);
			}

			buf.push_str(value);
		}

		buf
	}

	/// Returns the underlying slice of scope strings.
	pub fn as_slice(&self) -> &[String] {
		&self.0
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.0).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.join(' '))
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse_delimited(s, ',')
	}
}

/// Iterator over scope strings.
pub struct ScopeIter<'a> {
	inner: Iter<'a, String>,
}
impl<'a> Iterator for ScopeIter<'a> {
	type Item = &'a str;

	fn next(&mut self) -> Option<Self::Item> {
		self.inner.next().map(|s| s.as_str())
	}
}
impl<'a> IntoIterator for &'a ScopeSet {
	type IntoIter = ScopeIter<'a>;
	type Item = &'a str;

	fn into_iter(self) -> Self::IntoIter {
		ScopeIter { inner: self.0.iter() }
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.0.len()))?;

		for scope in self.0.iter() {
			seq.serialize_element(scope)?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		ScopeSet::new(values).map_err(DeError::custom)
	}
}

fn normalize<I, S>(scopes: I) -> Result<Arc<[String]>, ScopeValidationError>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut set = BTreeSet::new();

	for scope in scopes {
		let owned: String = scope.into();

		if owned.is_empty() {
			return Err(ScopeValidationError::Empty);
		}
		if owned.chars().any(|c| c.is_whitespace() || c == ',') {
			return Err(ScopeValidationError::ContainsSeparator { scope: owned });
		}

		set.insert(owned);
	}

	Ok(Arc::from(set.into_iter().collect::<Vec<_>>()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_normalize_regardless_of_order() {
		let lhs = ScopeSet::new(["profile:read_all", "read", "read"])
			.expect("Left-hand scope set should be valid.");
		let rhs = ScopeSet::new(["read", "profile:read_all"])
			.expect("Right-hand scope set should be valid.");

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.join(','), "profile:read_all,read");
	}

	#[test]
	fn delimited_parsing_accepts_commas_and_spaces() {
		let scopes = ScopeSet::parse_delimited("read,activity:read activity:write", ',')
			.expect("Delimited scope string should parse.");

		assert_eq!(scopes.len(), 3);
		assert!(scopes.contains("activity:write"));
		assert!(ScopeSet::parse_delimited("", ',').expect("Empty input is valid.").is_empty());
	}

	#[test]
	fn separators_inside_entries_are_rejected() {
		let err = ScopeSet::new(["read,write"]).expect_err("Embedded commas must be rejected.");

		assert!(matches!(err, ScopeValidationError::ContainsSeparator { .. }));
		assert!(ScopeSet::new([""]).is_err());
	}

	#[test]
	fn coverage_checks_requested_subset() {
		let granted = ScopeSet::from_str("read,activity:read,activity:write")
			.expect("Granted scopes should parse.");
		let requested =
			ScopeSet::from_str("read,activity:read").expect("Requested scopes should parse.");
		let wider = ScopeSet::from_str("read,profile:write").expect("Wider scopes should parse.");

		assert!(granted.covers(&requested));
		assert!(!granted.covers(&wider));
		assert!(granted.covers(&ScopeSet::default()));
	}

	#[test]
	fn serde_round_trips_as_sequence() {
		let scopes = ScopeSet::from_str("read,activity:read").expect("Scopes should parse.");
		let json = serde_json::to_string(&scopes).expect("Scopes should serialize.");

		assert_eq!(json, "[\"activity:read\",\"read\"]");
		assert_eq!(
			serde_json::from_str::<ScopeSet>(&json).expect("Scopes should deserialize."),
			scopes
		);
	}
}
