//! SQLite-backed request cache.
//!
//! [`RequestStore`] owns a single connection to a `requests` table holding every recorded
//! HTTP exchange. Filters are built with [`query::Filter`], results come back as a
//! [`Selection`], and [`RequestStore::retrieve`] answers the "have I already asked this?"
//! question the gateway needs before touching the network.
//!
//! Every statement runs on the caller's thread under a mutex and is committed before the call
//! returns. Failures are logged with the statement text and bound parameters, then surfaced
//! as [`CacheError::Query`].

pub mod canonical;
pub mod exchange;
pub mod query;
pub mod selection;

pub use exchange::*;
pub use query::{
	Column, ComposedQuery, CompareOp, Condition, Direction, Filter, OrderBy, Projection, Window,
};
pub use selection::*;

// std
use std::path::{Path, PathBuf};
// crates.io
use rusqlite::{
	Connection, Row, params_from_iter,
	types::{Value as SqlValue, ValueRef},
};
// self
use crate::_prelude::*;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS requests (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	called_at REAL,
	called_at_str TEXT,
	url TEXT,
	headers JSON,
	params JSON,
	method TEXT,
	response_code INTEGER,
	response_json JSON,
	response_headers JSON
)";

/// Errors raised by the request cache.
#[derive(Debug, ThisError)]
pub enum CacheError {
	/// The cache directory could not be created.
	#[error("Cache directory {path} could not be created.")]
	Directory {
		/// Directory that failed.
		path: PathBuf,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// The database could not be opened or its schema created.
	#[error("Cache database {path} could not be opened.")]
	Open {
		/// Database location (`:memory:` for in-memory stores).
		path: String,
		/// Underlying SQLite failure.
		#[source]
		source: rusqlite::Error,
	},
	/// A statement failed to execute.
	#[error("Cache query failed: {statement} with parameters {params}.")]
	Query {
		/// Statement text.
		statement: String,
		/// Rendered bound parameters.
		params: String,
		/// Underlying SQLite failure.
		#[source]
		source: rusqlite::Error,
	},
	/// A value could not be serialized into canonical JSON.
	#[error("Value could not be encoded as JSON.")]
	Encode {
		/// Underlying serialization failure.
		#[source]
		source: serde_json::Error,
	},
	/// A stored timestamp is out of range.
	#[error("Stored timestamp {value} is out of range.")]
	Timestamp {
		/// Offending epoch seconds.
		value: f64,
	},
}

/// Store-wide policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreConfig {
	/// When `false`, non-200 exchanges are not recorded.
	pub cache_failed_requests: bool,
}
impl Default for StoreConfig {
	fn default() -> Self {
		Self { cache_failed_requests: true }
	}
}

/// Durable table of past HTTP exchanges.
pub struct RequestStore {
	conn: Mutex<Connection>,
	config: StoreConfig,
	location: String,
}
impl RequestStore {
	/// Opens (or creates) the cache at `path`, creating missing parent directories.
	pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, CacheError> {
		let path = path.as_ref();

		if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
			std::fs::create_dir_all(parent)
				.map_err(|source| CacheError::Directory { path: parent.to_path_buf(), source })?;
		}

		let location = path.display().to_string();
		let conn = Connection::open(path)
			.map_err(|source| CacheError::Open { path: location.clone(), source })?;

		Self::with_connection(conn, config, location)
	}

	/// Opens a private in-memory cache.
	pub fn open_in_memory(config: StoreConfig) -> Result<Self, CacheError> {
		let location = String::from(":memory:");
		let conn = Connection::open_in_memory()
			.map_err(|source| CacheError::Open { path: location.clone(), source })?;

		Self::with_connection(conn, config, location)
	}

	fn with_connection(
		conn: Connection,
		config: StoreConfig,
		location: String,
	) -> Result<Self, CacheError> {
		conn.execute_batch(SCHEMA)
			.map_err(|source| CacheError::Open { path: location.clone(), source })?;

		tracing::debug!(location = %location, "Request cache opened.");

		Ok(Self { conn: Mutex::new(conn), config, location })
	}

	/// Store-wide policy.
	pub fn config(&self) -> StoreConfig {
		self.config
	}

	/// Database location (`:memory:` for in-memory stores).
	pub fn location(&self) -> &str {
		&self.location
	}

	/// Appends one exchange and returns its generated id.
	///
	/// Returns `Ok(None)` without touching the table when the exchange failed and the store
	/// does not cache failures.
	pub fn insert(&self, exchange: &NewExchange) -> Result<Option<i64>, CacheError> {
		if !exchange.is_success() && !self.config.cache_failed_requests {
			tracing::debug!(
				url = %exchange.url,
				status = exchange.status_code,
				"Failed exchange not cached."
			);

			return Ok(None);
		}

		let query = ComposedQuery {
			statement: format!(
				"INSERT INTO {} (called_at, called_at_str, url, headers, params, method, \
				 response_code, response_json, response_headers) \
				 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
				query::TABLE
			),
			params: vec![
				SqlValue::Real(epoch_seconds(exchange.issued_at)),
				SqlValue::Text(display_timestamp(exchange.issued_at)),
				SqlValue::Text(exchange.url.clone()),
				optional_text(&exchange.request_headers),
				optional_text(&exchange.request_params),
				SqlValue::Text(exchange.method.clone()),
				SqlValue::Integer(i64::from(exchange.status_code)),
				SqlValue::Text(exchange.response_body.clone()),
				SqlValue::Text(canonical::canonical_text(&exchange.response_headers)?),
			],
		};

		self.run(&query, |conn, query| {
			conn.execute(&query.statement, params_from_iter(query.params.iter()))?;

			Ok(conn.last_insert_rowid())
		})
		.map(Some)
	}

	/// Runs a filtered select relative to the current clock.
	pub fn select(
		&self,
		filter: &Filter,
		projection: &Projection,
		window: &Window,
	) -> Result<Selection, CacheError> {
		self.select_at(filter, projection, window, OffsetDateTime::now_utc())
	}

	/// Runs a filtered select relative to `now`.
	pub fn select_at(
		&self,
		filter: &Filter,
		projection: &Projection,
		window: &Window,
		now: OffsetDateTime,
	) -> Result<Selection, CacheError> {
		let query = filter.compose_select(projection, window, now)?;
		let columns: &[Column] = match projection {
			Projection::Columns(columns) if !columns.is_empty() => columns.as_slice(),
			_ => &Column::ALL,
		};
		let rows = self.run(&query, |conn, query| {
			let mut statement = conn.prepare(&query.statement)?;
			let width = statement.column_count();
			let mut rows = statement.query(params_from_iter(query.params.iter()))?;
			let mut out = Vec::new();

			while let Some(row) = rows.next()? {
				let mut values = Vec::with_capacity(width);

				for idx in 0..width {
					values.push(json_from_sql(row.get_ref(idx)?));
				}

				out.push(values);
			}

			Ok(out)
		})?;

		Ok(match projection {
			Projection::Count =>
				Selection::Value(rows.into_iter().next().and_then(|row| row.into_iter().next())),
			_ if columns.len() == 1 && window.limit == Some(1) =>
				Selection::Value(rows.into_iter().next().and_then(|row| row.into_iter().next())),
			_ if columns.len() == 1 => Selection::Column(
				rows.into_iter().filter_map(|row| row.into_iter().next()).collect(),
			),
			_ => Selection::Rows(
				rows.into_iter()
					.map(|row| columns.iter().map(|column| column.as_str()).zip(row).collect())
					.collect(),
			),
		})
	}

	/// Returns matching rows as typed exchanges.
	pub fn exchanges(
		&self,
		filter: &Filter,
		window: &Window,
	) -> Result<Vec<StoredExchange>, CacheError> {
		self.exchanges_at(filter, window, OffsetDateTime::now_utc())
	}

	/// Returns matching rows as typed exchanges, relative to `now`.
	pub fn exchanges_at(
		&self,
		filter: &Filter,
		window: &Window,
		now: OffsetDateTime,
	) -> Result<Vec<StoredExchange>, CacheError> {
		let query = filter.compose_select(&Projection::All, window, now)?;
		let raw = self.run(&query, |conn, query| {
			let mut statement = conn.prepare(&query.statement)?;
			let rows =
				statement.query_map(params_from_iter(query.params.iter()), RawExchange::read)?;

			rows.collect::<rusqlite::Result<Vec<_>>>()
		})?;

		raw.into_iter().map(RawExchange::into_exchange).collect()
	}

	/// Counts matching rows relative to the current clock.
	pub fn count(&self, filter: &Filter) -> Result<u64, CacheError> {
		self.count_at(filter, OffsetDateTime::now_utc())
	}

	/// Counts matching rows relative to `now`.
	pub fn count_at(&self, filter: &Filter, now: OffsetDateTime) -> Result<u64, CacheError> {
		let query = filter.compose_select(&Projection::Count, &Window::default(), now)?;

		self.run(&query, |conn, query| {
			conn.query_row(&query.statement, params_from_iter(query.params.iter()), |row| {
				row.get::<_, i64>(0)
			})
		})
		.map(|count| count.max(0) as u64)
	}

	/// Deletes matching rows and returns how many were removed.
	pub fn delete(&self, filter: &Filter) -> Result<usize, CacheError> {
		self.delete_at(filter, OffsetDateTime::now_utc())
	}

	/// Deletes matching rows relative to `now`.
	pub fn delete_at(&self, filter: &Filter, now: OffsetDateTime) -> Result<usize, CacheError> {
		let query = filter.compose_delete(now)?;
		let removed = self.run(&query, |conn, query| {
			conn.execute(&query.statement, params_from_iter(query.params.iter()))
		})?;

		tracing::debug!(removed, statement = %query.statement, "Cached exchanges deleted.");

		Ok(removed)
	}

	/// Deletes every exchange issued more than `max_age` ago.
	pub fn trim_older_than(&self, max_age: Duration) -> Result<usize, CacheError> {
		self.trim_older_than_at(max_age, OffsetDateTime::now_utc())
	}

	/// Deletes every exchange issued more than `max_age` before `now`.
	pub fn trim_older_than_at(
		&self,
		max_age: Duration,
		now: OffsetDateTime,
	) -> Result<usize, CacheError> {
		let cutoff = epoch_seconds(now - max_age);

		self.delete_at(&Filter::new().compare(Column::CalledAt, CompareOp::Lt, cutoff), now)
	}

	/// Deletes every exchange whose status differs from `status`.
	pub fn delete_where_status_not(&self, status: u16) -> Result<usize, CacheError> {
		self.delete(&Filter::new().compare(Column::ResponseCode, CompareOp::Ne, status))
	}

	/// Deletes every non-200 exchange.
	pub fn delete_failed(&self) -> Result<usize, CacheError> {
		self.delete_where_status_not(200)
	}

	/// Looks up cached payloads relative to the current clock.
	pub fn retrieve(&self, lookup: &CacheLookup) -> Result<Option<Retrieved>, CacheError> {
		self.retrieve_at(lookup, OffsetDateTime::now_utc())
	}

	/// Looks up cached payloads relative to `now`.
	///
	/// A zero `max_age` always misses. Stored payloads that no longer parse as JSON come back
	/// as JSON strings.
	pub fn retrieve_at(
		&self,
		lookup: &CacheLookup,
		now: OffsetDateTime,
	) -> Result<Option<Retrieved>, CacheError> {
		if lookup.max_age.is_some_and(|max_age| !max_age.is_positive()) {
			return Ok(None);
		}

		let query = lookup.filter().compose_select(
			&Projection::column(Column::ResponseJson),
			&lookup.window,
			now,
		)?;
		let mut payloads = self.run(&query, |conn, query| {
			let mut statement = conn.prepare(&query.statement)?;
			let rows = statement.query_map(params_from_iter(query.params.iter()), |row| {
				Ok(payload_from_sql(row.get_ref(0)?))
			})?;

			rows.collect::<rusqlite::Result<Vec<_>>>()
		})?;

		if payloads.is_empty() {
			return Ok(None);
		}

		Ok(Some(if lookup.window.limit == Some(1) {
			Retrieved::One(payloads.swap_remove(0))
		} else {
			Retrieved::Many(payloads)
		}))
	}

	fn run<T, F>(&self, query: &ComposedQuery, f: F) -> Result<T, CacheError>
	where
		F: FnOnce(&Connection, &ComposedQuery) -> rusqlite::Result<T>,
	{
		let conn = self.conn.lock();

		f(&conn, query).map_err(|source| {
			let params = format!("{:?}", query.params);

			tracing::error!(
				statement = %query.statement,
				params = %params,
				error = %source,
				"Request cache query failed."
			);

			CacheError::Query { statement: query.statement.clone(), params, source }
		})
	}
}
impl Debug for RequestStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestStore")
			.field("location", &self.location)
			.field("config", &self.config)
			.finish()
	}
}

struct RawExchange {
	id: i64,
	called_at: f64,
	called_at_str: Option<String>,
	url: String,
	headers: Option<String>,
	params: Option<String>,
	method: String,
	response_code: i64,
	response_json: JsonValue,
	response_headers: JsonValue,
}
impl RawExchange {
	fn read(row: &Row) -> rusqlite::Result<Self> {
		Ok(Self {
			id: row.get(0)?,
			called_at: row.get::<_, Option<f64>>(1)?.unwrap_or_default(),
			called_at_str: row.get(2)?,
			url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
			headers: row.get(4)?,
			params: row.get(5)?,
			method: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
			response_code: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
			response_json: payload_from_sql(row.get_ref(8)?),
			response_headers: payload_from_sql(row.get_ref(9)?),
		})
	}

	fn into_exchange(self) -> Result<StoredExchange, CacheError> {
		Ok(StoredExchange {
			id: self.id,
			issued_at: from_epoch_seconds(self.called_at)?,
			issued_at_text: self.called_at_str,
			method: self.method,
			url: self.url,
			request_headers: self.headers,
			request_params: self.params,
			status_code: u16::try_from(self.response_code).unwrap_or_default(),
			response_body: self.response_json,
			response_headers: self.response_headers,
		})
	}
}

fn optional_text(value: &Option<String>) -> SqlValue {
	value.clone().map_or(SqlValue::Null, SqlValue::Text)
}

fn json_from_sql(value: ValueRef) -> JsonValue {
	match value {
		ValueRef::Null => JsonValue::Null,
		ValueRef::Integer(int) => JsonValue::from(int),
		ValueRef::Real(real) => JsonValue::from(real),
		ValueRef::Text(text) => JsonValue::String(String::from_utf8_lossy(text).into_owned()),
		ValueRef::Blob(blob) => JsonValue::String(String::from_utf8_lossy(blob).into_owned()),
	}
}

fn payload_from_sql(value: ValueRef) -> JsonValue {
	match json_from_sql(value) {
		JsonValue::String(text) => decode_payload(Some(text)),
		other => other,
	}
}
