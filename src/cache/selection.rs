//! Result shapes for selects and cache lookups.

// self
use crate::{
	_prelude::*,
	cache::{
		CacheError, canonical,
		query::{Column, Filter, OrderBy, Window},
	},
};

/// Shape of a select result, chosen by the projection and window.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
	/// Several columns per row, keyed by column name.
	Rows(Vec<BTreeMap<&'static str, JsonValue>>),
	/// A single column; bare values in row order.
	Column(Vec<JsonValue>),
	/// A single value (one column with `limit = 1`, or an aggregate); `None` when no row matched.
	Value(Option<JsonValue>),
}
impl Selection {
	/// Number of rows represented by this selection.
	pub fn len(&self) -> usize {
		match self {
			Selection::Rows(rows) => rows.len(),
			Selection::Column(values) => values.len(),
			Selection::Value(value) => usize::from(value.is_some()),
		}
	}

	/// Returns true when nothing matched.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the single value, if this is a [`Selection::Value`].
	pub fn into_value(self) -> Option<JsonValue> {
		match self {
			Selection::Value(value) => value,
			_ => None,
		}
	}
}

/// Payloads returned by [`RequestStore::retrieve`](crate::cache::RequestStore::retrieve).
#[derive(Clone, Debug, PartialEq)]
pub enum Retrieved {
	/// Single payload (lookup limit of one).
	One(JsonValue),
	/// Payloads in the lookup's order.
	Many(Vec<JsonValue>),
}
impl Retrieved {
	/// Returns the first payload.
	pub fn into_first(self) -> Option<JsonValue> {
		match self {
			Retrieved::One(value) => Some(value),
			Retrieved::Many(values) => values.into_iter().next(),
		}
	}

	/// Returns every payload.
	pub fn into_vec(self) -> Vec<JsonValue> {
		match self {
			Retrieved::One(value) => vec![value],
			Retrieved::Many(values) => values,
		}
	}
}

/// How a lookup treats the params or headers column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum KeyMatch {
	/// No filter on the column.
	#[default]
	Any,
	/// The stored canonical key must equal this one; `None` requires the column to be absent.
	Exactly(Option<String>),
}

/// Cache lookup keyed on a request's identity.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheLookup {
	pub(crate) method: String,
	pub(crate) url: String,
	pub(crate) params: KeyMatch,
	pub(crate) headers: KeyMatch,
	pub(crate) max_age: Option<Duration>,
	pub(crate) successful_only: bool,
	pub(crate) window: Window,
}
impl CacheLookup {
	/// Looks up the newest exchange for `method url`.
	pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			method: method.into(),
			url: url.into(),
			params: KeyMatch::Any,
			headers: KeyMatch::Any,
			max_age: None,
			successful_only: false,
			window: Window::first(OrderBy::NEWEST_FIRST),
		}
	}

	/// Shorthand for a `GET` lookup.
	pub fn get(url: impl Into<String>) -> Self {
		Self::new("GET", url)
	}

	/// Requires the stored params to equal `params` (empty means absent).
	pub fn params<T>(mut self, params: &T) -> Result<Self, CacheError>
	where
		T: ?Sized + Serialize,
	{
		self.params = KeyMatch::Exactly(canonical::canonical_key(params)?);

		Ok(self)
	}

	/// Requires the stored headers to equal `headers` (empty means absent).
	pub fn headers<T>(mut self, headers: &T) -> Result<Self, CacheError>
	where
		T: ?Sized + Serialize,
	{
		self.headers = KeyMatch::Exactly(canonical::canonical_key(headers)?);

		Ok(self)
	}

	/// Sets the params match directly.
	pub fn params_key(mut self, key: KeyMatch) -> Self {
		self.params = key;

		self
	}

	/// Sets the headers match directly.
	pub fn headers_key(mut self, key: KeyMatch) -> Self {
		self.headers = key;

		self
	}

	/// Only considers exchanges younger than `max_age`; zero always misses.
	pub fn max_age(mut self, max_age: Option<Duration>) -> Self {
		self.max_age = max_age;

		self
	}

	/// Only considers status-200 exchanges.
	pub fn successful_only(mut self) -> Self {
		self.successful_only = true;

		self
	}

	/// Returns up to `limit` payloads instead of one.
	pub fn limit(mut self, limit: Option<u64>) -> Self {
		self.window.limit = limit;

		self
	}

	/// Overrides the ordering.
	pub fn order(mut self, order: OrderBy) -> Self {
		self.window.order = Some(order);

		self
	}

	pub(crate) fn filter(&self) -> Filter {
		let mut filter = Filter::new()
			.eq(Column::Method, self.method.as_str())
			.eq(Column::Url, self.url.as_str());

		if let KeyMatch::Exactly(key) = &self.params {
			filter = filter.eq(Column::Params, key_value(key));
		}
		if let KeyMatch::Exactly(key) = &self.headers {
			filter = filter.eq(Column::Headers, key_value(key));
		}
		if self.successful_only {
			filter = filter.eq(Column::ResponseCode, 200);
		}

		filter.with_max_age(self.max_age)
	}
}

fn key_value(key: &Option<String>) -> JsonValue {
	key.clone().map_or(JsonValue::Null, JsonValue::String)
}

#[cfg(test)]
mod tests {
	// crates.io
	use rusqlite::types::Value as SqlValue;
	use time::macros;
	// self
	use super::*;
	use crate::cache::query::Projection;

	#[test]
	fn empty_params_require_absent_column() {
		let lookup = CacheLookup::get("https://api.example.com/athlete")
			.params(&BTreeMap::<String, String>::new())
			.expect("Empty params should canonicalize.")
			.successful_only();
		let query = lookup
			.filter()
			.compose_select(
				&Projection::column(Column::ResponseJson),
				&lookup.window,
				macros::datetime!(2025-01-01 00:00 UTC),
			)
			.expect("Lookup should compose.");

		assert_eq!(
			query.statement,
			"SELECT response_json FROM requests WHERE method = ? AND url = ? AND params IS NULL \
			 AND response_code = ? ORDER BY called_at DESC LIMIT 1"
		);
		assert_eq!(query.params.last(), Some(&SqlValue::Integer(200)));
	}

	#[test]
	fn retrieved_helpers_flatten() {
		assert_eq!(Retrieved::One(JsonValue::from(1)).into_vec(), vec![JsonValue::from(1)]);
		assert_eq!(
			Retrieved::Many(vec![JsonValue::from(1), JsonValue::from(2)]).into_first(),
			Some(JsonValue::from(1))
		);
		assert_eq!(Retrieved::Many(Vec::new()).into_first(), None);
	}
}
