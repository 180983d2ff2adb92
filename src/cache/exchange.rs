//! Row types for recorded HTTP exchanges.

// crates.io
use time::{format_description::BorrowedFormatItem, macros::format_description};
// self
use crate::{
	_prelude::*,
	cache::{CacheError, canonical},
};

const CALLED_AT_FORMAT: &[BorrowedFormatItem<'static>] =
	format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]");

/// Converts an instant into the fractional epoch seconds stored in `called_at`.
pub fn epoch_seconds(instant: OffsetDateTime) -> f64 {
	instant.unix_timestamp() as f64 + f64::from(instant.nanosecond()) / 1_000_000_000.
}

/// Converts stored epoch seconds back into an instant.
pub fn from_epoch_seconds(value: f64) -> Result<OffsetDateTime, CacheError> {
	if !value.is_finite() {
		return Err(CacheError::Timestamp { value });
	}

	let whole = value.floor();
	let nanos = ((value - whole) * 1_000_000_000.).round() as i64;

	OffsetDateTime::from_unix_timestamp(whole as i64)
		.map(|instant| instant + Duration::nanoseconds(nanos))
		.map_err(|_| CacheError::Timestamp { value })
}

/// Human-readable form stored next to the numeric timestamp.
pub fn display_timestamp(instant: OffsetDateTime) -> String {
	instant.format(CALLED_AT_FORMAT).unwrap_or_else(|_| instant.unix_timestamp().to_string())
}

/// Decodes a stored payload, keeping undecodable text as a JSON string.
pub fn decode_payload(raw: Option<String>) -> JsonValue {
	match raw {
		None => JsonValue::Null,
		Some(text) => serde_json::from_str(&text).unwrap_or(JsonValue::String(text)),
	}
}

/// One recorded request/response pair.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredExchange {
	/// Generated, monotonically increasing identifier.
	pub id: i64,
	/// Instant the request was issued.
	pub issued_at: OffsetDateTime,
	/// Human-readable issue time, as stored.
	pub issued_at_text: Option<String>,
	/// HTTP method.
	pub method: String,
	/// Absolute request URL.
	pub url: String,
	/// Canonical request headers, absent when none were sent.
	pub request_headers: Option<String>,
	/// Canonical request parameters, absent when none were sent.
	pub request_params: Option<String>,
	/// HTTP status code.
	pub status_code: u16,
	/// Decoded response payload.
	pub response_body: JsonValue,
	/// Decoded response headers.
	pub response_headers: JsonValue,
}
impl StoredExchange {
	/// Returns true when the exchange completed with status 200.
	pub fn is_success(&self) -> bool {
		self.status_code == 200
	}
}

/// Exchange about to be appended to the store.
#[derive(Clone, Debug, PartialEq)]
pub struct NewExchange {
	/// HTTP method.
	pub method: String,
	/// Absolute request URL.
	pub url: String,
	/// Canonical request headers.
	pub request_headers: Option<String>,
	/// Canonical request parameters.
	pub request_params: Option<String>,
	/// HTTP status code.
	pub status_code: u16,
	/// Raw response payload text.
	pub response_body: String,
	/// Response headers as a JSON object.
	pub response_headers: JsonValue,
	/// Instant the request was issued.
	pub issued_at: OffsetDateTime,
}
impl NewExchange {
	/// Starts an exchange issued now with an empty body and no request metadata.
	pub fn new(method: impl Into<String>, url: impl Into<String>, status_code: u16) -> Self {
		Self {
			method: method.into(),
			url: url.into(),
			request_headers: None,
			request_params: None,
			status_code,
			response_body: String::new(),
			response_headers: JsonValue::Object(Default::default()),
			issued_at: OffsetDateTime::now_utc(),
		}
	}

	/// Canonicalizes and attaches request parameters.
	pub fn with_params<T>(mut self, params: &T) -> Result<Self, CacheError>
	where
		T: ?Sized + Serialize,
	{
		self.request_params = canonical::canonical_key(params)?;

		Ok(self)
	}

	/// Canonicalizes and attaches request headers.
	pub fn with_headers<T>(mut self, headers: &T) -> Result<Self, CacheError>
	where
		T: ?Sized + Serialize,
	{
		self.request_headers = canonical::canonical_key(headers)?;

		Ok(self)
	}

	/// Sets the raw response payload.
	pub fn body(mut self, body: impl Into<String>) -> Self {
		self.response_body = body.into();

		self
	}

	/// Sets the response headers.
	pub fn response_headers(mut self, headers: JsonValue) -> Self {
		self.response_headers = headers;

		self
	}

	/// Overrides the issue instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = instant;

		self
	}

	/// Returns true when the exchange completed with status 200.
	pub fn is_success(&self) -> bool {
		self.status_code == 200
	}
}
