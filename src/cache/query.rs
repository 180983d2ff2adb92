//! Parameterized filter construction for the request table.
//!
//! A [`Filter`] is an ordered list of `(Column, Condition)` pairs plus an optional age bound
//! and an optional raw predicate. [`Filter::compose`] renders it into SQL text with a parallel
//! list of bound parameters; nothing here touches the database.

// crates.io
use rusqlite::types::Value as SqlValue;
// self
use crate::{
	_prelude::*,
	cache::{CacheError, canonical, exchange},
};

/// Name of the single table owned by [`RequestStore`](crate::cache::RequestStore).
pub const TABLE: &str = "requests";

/// Columns of the request table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Column {
	/// Generated row identifier.
	Id,
	/// Epoch seconds (float) when the call was issued.
	CalledAt,
	/// Human-readable issue time.
	CalledAtStr,
	/// Absolute request URL.
	Url,
	/// Canonical request headers (JSON) or `NULL`.
	Headers,
	/// Canonical request parameters (JSON) or `NULL`.
	Params,
	/// HTTP method.
	Method,
	/// HTTP status code.
	ResponseCode,
	/// Response payload (JSON text).
	ResponseJson,
	/// Response headers (JSON text).
	ResponseHeaders,
}
impl Column {
	/// Every column in table order.
	pub const ALL: [Column; 10] = [
		Column::Id,
		Column::CalledAt,
		Column::CalledAtStr,
		Column::Url,
		Column::Headers,
		Column::Params,
		Column::Method,
		Column::ResponseCode,
		Column::ResponseJson,
		Column::ResponseHeaders,
	];

	/// Returns the SQL column name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Column::Id => "id",
			Column::CalledAt => "called_at",
			Column::CalledAtStr => "called_at_str",
			Column::Url => "url",
			Column::Headers => "headers",
			Column::Params => "params",
			Column::Method => "method",
			Column::ResponseCode => "response_code",
			Column::ResponseJson => "response_json",
			Column::ResponseHeaders => "response_headers",
		}
	}
}
impl Display for Column {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Comparison operators with a bound right-hand side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
	/// `=`
	Eq,
	/// `!=`
	Ne,
	/// `>`
	Gt,
	/// `>=`
	Ge,
	/// `<`
	Lt,
	/// `<=`
	Le,
	/// `LIKE`
	Like,
}
impl CompareOp {
	/// Returns the SQL operator text.
	pub const fn as_str(self) -> &'static str {
		match self {
			CompareOp::Eq => "=",
			CompareOp::Ne => "!=",
			CompareOp::Gt => ">",
			CompareOp::Ge => ">=",
			CompareOp::Lt => "<",
			CompareOp::Le => "<=",
			CompareOp::Like => "LIKE",
		}
	}
}

/// One per-column condition.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
	/// Equality against a bound value; `null` renders as `IS NULL`.
	Equals(JsonValue),
	/// Comparison against a bound value.
	Compare(CompareOp, JsonValue),
	/// Set membership; an empty set matches nothing.
	OneOf(Vec<JsonValue>),
	/// Trusted predicate text appended verbatim after the column name, e.g. `"!= 200"`.
	Raw(String),
}
impl Condition {
	const OPERATOR_PREFIXES: [&'static str; 8] =
		[">", "<", "=", "!", "IN", "LIKE", "BETWEEN", "IS"];

	/// Interprets the textual convention: text starting with an operator token becomes
	/// [`Condition::Raw`], anything else an equality on the text itself.
	pub fn parse(text: &str) -> Self {
		if Self::OPERATOR_PREFIXES.iter().any(|prefix| text.starts_with(prefix)) {
			Condition::Raw(text.to_owned())
		} else {
			Condition::Equals(JsonValue::String(text.to_owned()))
		}
	}

	/// Equality helper accepting anything convertible into JSON.
	pub fn eq(value: impl Into<JsonValue>) -> Self {
		Condition::Equals(value.into())
	}
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
	/// Smallest first.
	Asc,
	/// Largest first.
	Desc,
}

/// `ORDER BY` clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderBy {
	/// Column to order by.
	pub column: Column,
	/// Sort direction.
	pub direction: Direction,
}
impl OrderBy {
	/// Newest exchanges first.
	pub const NEWEST_FIRST: OrderBy =
		OrderBy { column: Column::CalledAt, direction: Direction::Desc };
	/// Oldest exchanges first.
	pub const OLDEST_FIRST: OrderBy =
		OrderBy { column: Column::CalledAt, direction: Direction::Asc };
}

/// Which columns a select returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
	/// Every column, in table order.
	All,
	/// The listed columns, in the given order.
	Columns(Vec<Column>),
	/// `COUNT(*)`.
	Count,
}
impl Projection {
	/// Projection of a single column.
	pub fn column(column: Column) -> Self {
		Projection::Columns(vec![column])
	}

	fn render(&self) -> String {
		match self {
			Projection::All => "*".into(),
			Projection::Count => "COUNT(*)".into(),
			Projection::Columns(columns) if columns.is_empty() => "*".into(),
			Projection::Columns(columns) =>
				columns.iter().map(|column| column.as_str()).collect::<Vec<_>>().join(", "),
		}
	}
}

/// Ordering, limit and offset applied to a select.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Window {
	/// Optional ordering.
	pub order: Option<OrderBy>,
	/// Optional maximum number of rows.
	pub limit: Option<u64>,
	/// Optional number of rows to skip.
	pub offset: Option<u64>,
}
impl Window {
	/// A single row in the given order.
	pub fn first(order: OrderBy) -> Self {
		Self { order: Some(order), limit: Some(1), offset: None }
	}

	/// Sets the ordering.
	pub fn order(mut self, order: OrderBy) -> Self {
		self.order = Some(order);

		self
	}

	/// Sets the row limit.
	pub fn limit(mut self, limit: u64) -> Self {
		self.limit = Some(limit);

		self
	}

	/// Sets the row offset.
	pub fn offset(mut self, offset: u64) -> Self {
		self.offset = Some(offset);

		self
	}
}

/// Statement text plus bound parameters, ready for execution.
#[derive(Clone, Debug, PartialEq)]
pub struct ComposedQuery {
	/// SQL text with `?` placeholders.
	pub statement: String,
	/// Parameters in placeholder order.
	pub params: Vec<SqlValue>,
}

/// Ordered filter over the request table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
	conditions: Vec<(Column, Condition)>,
	max_age: Option<Duration>,
	extra: Option<String>,
}
impl Filter {
	/// Creates an empty filter (matches every row).
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a condition.
	pub fn with(mut self, column: Column, condition: Condition) -> Self {
		self.conditions.push((column, condition));

		self
	}

	/// Appends an equality condition.
	pub fn eq(self, column: Column, value: impl Into<JsonValue>) -> Self {
		self.with(column, Condition::Equals(value.into()))
	}

	/// Appends a comparison condition.
	pub fn compare(self, column: Column, op: CompareOp, value: impl Into<JsonValue>) -> Self {
		self.with(column, Condition::Compare(op, value.into()))
	}

	/// Appends a set-membership condition.
	pub fn one_of<I, V>(self, column: Column, values: I) -> Self
	where
		I: IntoIterator<Item = V>,
		V: Into<JsonValue>,
	{
		self.with(column, Condition::OneOf(values.into_iter().map(Into::into).collect()))
	}

	/// Appends a trusted raw predicate for a column, e.g. `raw(Column::ResponseCode, "!= 200")`.
	pub fn raw(self, column: Column, fragment: impl Into<String>) -> Self {
		self.with(column, Condition::Raw(fragment.into()))
	}

	/// Requires rows issued less than `max_age` ago. A zero age matches every row.
	pub fn max_age(mut self, max_age: Duration) -> Self {
		self.max_age = Some(max_age);

		self
	}

	/// Sets or clears the age bound.
	pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
		self.max_age = max_age;

		self
	}

	/// AND-s a trusted raw predicate onto the filter. A leading `WHERE` is stripped.
	pub fn where_raw(mut self, predicate: impl Into<String>) -> Self {
		self.extra = Some(predicate.into());

		self
	}

	/// Conditions in insertion order.
	pub fn conditions(&self) -> &[(Column, Condition)] {
		&self.conditions
	}

	/// Renders a `SELECT` statement.
	pub fn compose_select(
		&self,
		projection: &Projection,
		window: &Window,
		now: OffsetDateTime,
	) -> Result<ComposedQuery, CacheError> {
		let (predicate, params) = self.render_predicate(now)?;
		let mut statement = format!("SELECT {} FROM {TABLE}{predicate}", projection.render());

		if let Some(order) = window.order {
			let direction = match order.direction {
				Direction::Asc => "ASC",
				Direction::Desc => "DESC",
			};

			statement.push_str(&format!(" ORDER BY {} {direction}", order.column));
		}

		match (window.limit, window.offset) {
			(Some(limit), Some(offset)) if offset > 0 =>
				statement.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
			(Some(limit), _) => statement.push_str(&format!(" LIMIT {limit}")),
			(None, Some(offset)) if offset > 0 =>
				statement.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
			_ => {},
		}

		Ok(ComposedQuery { statement, params })
	}

	/// Renders a `DELETE` statement.
	pub fn compose_delete(&self, now: OffsetDateTime) -> Result<ComposedQuery, CacheError> {
		let (predicate, params) = self.render_predicate(now)?;

		Ok(ComposedQuery { statement: format!("DELETE FROM {TABLE}{predicate}"), params })
	}

	fn render_predicate(&self, now: OffsetDateTime) -> Result<(String, Vec<SqlValue>), CacheError> {
		let mut clauses = Vec::with_capacity(self.conditions.len() + 2);
		let mut params = Vec::new();

		for (column, condition) in &self.conditions {
			match condition {
				Condition::Equals(JsonValue::Null) => clauses.push(format!("{column} IS NULL")),
				Condition::Equals(value) => {
					clauses.push(format!("{column} = ?"));
					params.push(bind(value)?);
				},
				Condition::Compare(op, value) => {
					clauses.push(format!("{column} {} ?", op.as_str()));
					params.push(bind(value)?);
				},
				Condition::OneOf(values) if values.is_empty() => clauses.push("0 = 1".into()),
				Condition::OneOf(values) => {
					let placeholders = vec!["?"; values.len()].join(", ");

					clauses.push(format!("{column} IN ({placeholders})"));

					for value in values {
						params.push(bind(value)?);
					}
				},
				Condition::Raw(fragment) => clauses.push(format!("{column} {}", fragment.trim())),
			}
		}

		if let Some(max_age) = self.max_age {
			let threshold = if max_age.is_positive() {
				exchange::epoch_seconds(now - max_age)
			} else {
				0.0
			};

			clauses.push(format!("{} > ?", Column::CalledAt));
			params.push(SqlValue::Real(threshold));
		}
		if let Some(extra) = &self.extra {
			let trimmed = extra.trim();
			let trimmed = trimmed.strip_prefix("WHERE").unwrap_or(trimmed).trim();

			if !trimmed.is_empty() {
				clauses.push(format!("({trimmed})"));
			}
		}

		if clauses.is_empty() {
			Ok((String::new(), params))
		} else {
			Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
		}
	}
}

/// Converts a JSON condition value into a SQLite parameter.
pub fn bind(value: &JsonValue) -> Result<SqlValue, CacheError> {
	Ok(match value {
		JsonValue::Null => SqlValue::Null,
		JsonValue::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
		JsonValue::Number(number) =>
			if let Some(int) = number.as_i64() {
				SqlValue::Integer(int)
			} else {
				SqlValue::Real(number.as_f64().unwrap_or(f64::MAX))
			},
		JsonValue::String(text) => SqlValue::Text(text.clone()),
		structured @ (JsonValue::Array(_) | JsonValue::Object(_)) =>
			SqlValue::Text(canonical::canonical_text(structured)?),
	})
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const NOW: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

	#[test]
	fn equality_and_null_render_as_expected() {
		let query = Filter::new()
			.eq(Column::Url, "https://api.example.com/athlete")
			.eq(Column::Method, "GET")
			.with(Column::Params, Condition::Equals(JsonValue::Null))
			.compose_select(&Projection::column(Column::ResponseJson), &Window::default(), NOW)
			.expect("Filter should compose.");

		assert_eq!(
			query.statement,
			"SELECT response_json FROM requests WHERE url = ? AND method = ? AND params IS NULL"
		);
		assert_eq!(
			query.params,
			vec![
				SqlValue::Text("https://api.example.com/athlete".into()),
				SqlValue::Text("GET".into())
			]
		);
	}

	#[test]
	fn raw_fragments_and_extra_predicates_are_verbatim() {
		let query = Filter::new()
			.with(Column::ResponseCode, Condition::parse("!= 200"))
			.where_raw("WHERE method = 'POST'")
			.compose_delete(NOW)
			.expect("Filter should compose.");

		assert_eq!(
			query.statement,
			"DELETE FROM requests WHERE response_code != 200 AND (method = 'POST')"
		);
		assert!(query.params.is_empty());
	}

	#[test]
	fn textual_convention_distinguishes_operators() {
		assert_eq!(Condition::parse("> 5"), Condition::Raw("> 5".into()));
		assert_eq!(Condition::parse("IS NOT NULL"), Condition::Raw("IS NOT NULL".into()));
		assert_eq!(Condition::parse("LIKE '%x%'"), Condition::Raw("LIKE '%x%'".into()));
		assert_eq!(Condition::parse("GET"), Condition::Equals(JsonValue::String("GET".into())));
	}

	#[test]
	fn age_bounds_follow_now() {
		let query = Filter::new()
			.max_age(Duration::seconds(10))
			.compose_select(&Projection::Count, &Window::default(), NOW)
			.expect("Filter should compose.");

		assert_eq!(query.statement, "SELECT COUNT(*) FROM requests WHERE called_at > ?");
		assert_eq!(
			query.params,
			vec![SqlValue::Real(exchange::epoch_seconds(NOW - Duration::seconds(10)))]
		);

		let zero = Filter::new()
			.max_age(Duration::ZERO)
			.compose_select(&Projection::Count, &Window::default(), NOW)
			.expect("Zero-age filter should compose.");

		assert_eq!(zero.params, vec![SqlValue::Real(0.0)]);

		let unbounded = Filter::new()
			.compose_select(&Projection::Count, &Window::default(), NOW)
			.expect("Unbounded filter should compose.");

		assert_eq!(unbounded.statement, "SELECT COUNT(*) FROM requests");
	}

	#[test]
	fn structured_values_bind_canonically_and_sets_expand() {
		let query = Filter::new()
			.eq(Column::Params, serde_json::json!({ "page": 2, "after": 10 }))
			.one_of(Column::ResponseCode, [200, 304])
			.compose_select(
				&Projection::All,
				&Window::first(OrderBy::NEWEST_FIRST).offset(3),
				NOW,
			)
			.expect("Filter should compose.");

		assert_eq!(
			query.statement,
			"SELECT * FROM requests WHERE params = ? AND response_code IN (?, ?) \
			 ORDER BY called_at DESC LIMIT 1 OFFSET 3"
		);
		assert_eq!(query.params[0], SqlValue::Text("{\"after\":10,\"page\":2}".into()));
		assert_eq!(query.params[1..], [SqlValue::Integer(200), SqlValue::Integer(304)]);
	}

	#[test]
	fn empty_membership_matches_nothing() {
		let query = Filter::new()
			.one_of(Column::Method, Vec::<String>::new())
			.compose_select(&Projection::Count, &Window::default(), NOW)
			.expect("Filter should compose.");

		assert_eq!(query.statement, "SELECT COUNT(*) FROM requests WHERE 0 = 1");
	}
}
