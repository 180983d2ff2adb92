//! History-driven rate limiting.
//!
//! The governor never talks to the network. It reads the request cache's own timestamps and
//! works out when the next call stops violating each `{limit → window}` rule: a rule whose
//! `limit`-th most recent exchange exists is saturated until that exchange leaves the window.
//! This is a courtesy delay; the server's counters can drift from local history when other
//! processes share the quota or calls bypass the cache.

// self
use crate::{
	_prelude::*,
	cache::{
		CacheError, Column, Filter, OrderBy, Projection, RequestStore, Window, from_epoch_seconds,
	},
};

/// Backoff used after a 429 when no rule is configured at all.
const UNCONFIGURED_BACKOFF: Duration = Duration::minutes(15);

/// At most `limit` calls per `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RateRule {
	/// Maximum number of calls.
	pub limit: u32,
	/// Sliding window length.
	pub window: Duration,
}
impl RateRule {
	/// Creates a rule from a call count and a window in seconds.
	pub fn new(limit: u32, window_secs: u64) -> Self {
		Self { limit, window: Duration::seconds(i64::try_from(window_secs).unwrap_or(i64::MAX)) }
	}
}

/// Why a delay was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayBasis {
	/// No rule is saturated.
	Clear,
	/// The given rule is saturated by recorded history.
	History(RateRule),
	/// Not enough history; the window of the given rule was used as a guess.
	Guess(RateRule),
	/// No rules are configured.
	Unconfigured,
}

/// Delay computed by [`RateGovernor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDelay {
	/// Signed delay; non-positive means the next call is safe now.
	pub delay: Duration,
	/// Instant the next call becomes safe.
	pub safe_at: OffsetDateTime,
	/// Rule the delay was derived from.
	pub basis: DelayBasis,
}
impl RateDelay {
	/// Returns true when no wait is needed.
	pub fn is_safe_now(&self) -> bool {
		!self.delay.is_positive()
	}

	/// Delay clamped to zero, as a sleepable duration.
	pub fn wait(&self) -> std::time::Duration {
		std::time::Duration::try_from(self.delay).unwrap_or_default()
	}
}

/// Computes safe delays from a set of rate rules and the cache's history.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateGovernor {
	rules: Vec<RateRule>,
}
impl RateGovernor {
	/// Creates a governor from explicit rules. Rules with a zero limit are ignored.
	pub fn new(rules: impl IntoIterator<Item = RateRule>) -> Self {
		let mut rules = rules.into_iter().filter(|rule| rule.limit > 0).collect::<Vec<_>>();

		rules.sort();

		Self { rules }
	}

	/// Creates a governor from a `{limit: window_secs}` mapping such as
	/// `{100: 900, 1000: 86400}`.
	pub fn from_limits<I>(limits: I) -> Self
	where
		I: IntoIterator<Item = (u32, u64)>,
	{
		Self::new(limits.into_iter().map(|(limit, window)| RateRule::new(limit, window)))
	}

	/// Configured rules, smallest limit first.
	pub fn rules(&self) -> &[RateRule] {
		&self.rules
	}

	/// Proactive delay before the next call, relative to the current clock.
	pub fn delay(&self, store: &RequestStore) -> Result<RateDelay, CacheError> {
		self.delay_at(store, OffsetDateTime::now_utc())
	}

	/// Proactive delay before the next call, relative to `now`.
	///
	/// The earliest safe instant across rules with enough history wins; it may already lie in
	/// the past, giving a non-positive delay. With no such rule the delay is zero.
	pub fn delay_at(
		&self,
		store: &RequestStore,
		now: OffsetDateTime,
	) -> Result<RateDelay, CacheError> {
		let mut earliest: Option<(OffsetDateTime, RateRule)> = None;

		for rule in &self.rules {
			let Some(oldest) = self.lookback(store, rule, now)? else { continue };
			let safe_at = oldest + rule.window;

			if earliest.is_none_or(|(current, _)| safe_at < current) {
				earliest = Some((safe_at, *rule));
			}
		}

		Ok(match earliest {
			Some((safe_at, rule)) =>
				RateDelay { delay: safe_at - now, safe_at, basis: DelayBasis::History(rule) },
			None => RateDelay { delay: Duration::ZERO, safe_at: now, basis: DelayBasis::Clear },
		})
	}

	/// Reactive delay after the server answered 429, relative to the current clock.
	pub fn backoff(&self, store: &RequestStore) -> Result<RateDelay, CacheError> {
		self.backoff_at(store, OffsetDateTime::now_utc())
	}

	/// Reactive delay after the server answered 429, relative to `now`.
	///
	/// History is consulted first. When it shows no saturated rule, or the saturated rules have
	/// already cleared, local history disagrees with the server and the window of the rule with
	/// the smallest limit is used as a guess. The result is always positive.
	pub fn backoff_at(
		&self,
		store: &RequestStore,
		now: OffsetDateTime,
	) -> Result<RateDelay, CacheError> {
		let proactive = self.delay_at(store, now)?;

		if !proactive.is_safe_now() {
			return Ok(proactive);
		}

		Ok(match self.rules.first() {
			Some(rule) => RateDelay {
				delay: rule.window,
				safe_at: now + rule.window,
				basis: DelayBasis::Guess(*rule),
			},
			None => RateDelay {
				delay: UNCONFIGURED_BACKOFF,
				safe_at: now + UNCONFIGURED_BACKOFF,
				basis: DelayBasis::Unconfigured,
			},
		})
	}

	fn lookback(
		&self,
		store: &RequestStore,
		rule: &RateRule,
		now: OffsetDateTime,
	) -> Result<Option<OffsetDateTime>, CacheError> {
		let window = Window::first(OrderBy::NEWEST_FIRST).offset(u64::from(rule.limit - 1));
		let value = store
			.select_at(&Filter::new(), &Projection::column(Column::CalledAt), &window, now)?
			.into_value();

		value.and_then(|value| value.as_f64()).map(from_epoch_seconds).transpose()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::cache::{NewExchange, StoreConfig};

	const T0: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

	fn store_with_calls(calls: usize, at: OffsetDateTime) -> RequestStore {
		let store = RequestStore::open_in_memory(StoreConfig::default())
			.expect("In-memory store should open.");

		for _ in 0..calls {
			store
				.insert(
					&NewExchange::new("GET", "https://api.example.com/athlete", 200).issued_at(at),
				)
				.expect("Insert should succeed.");
		}

		store
	}

	#[test]
	fn below_limit_is_safe_now() {
		let governor = RateGovernor::from_limits([(100, 900)]);
		let delay = governor
			.delay_at(&store_with_calls(99, T0), T0 + Duration::seconds(1))
			.expect("Delay should compute.");

		assert!(delay.is_safe_now());
		assert_eq!(delay.basis, DelayBasis::Clear);
		assert_eq!(delay.wait(), std::time::Duration::ZERO);
	}

	#[test]
	fn saturated_rule_waits_out_the_window() {
		let governor = RateGovernor::from_limits([(100, 900)]);
		let delay = governor
			.delay_at(&store_with_calls(100, T0), T0 + Duration::seconds(1))
			.expect("Delay should compute.");

		assert_eq!(delay.delay, Duration::seconds(899));
		assert_eq!(delay.safe_at, T0 + Duration::seconds(900));
		assert_eq!(delay.basis, DelayBasis::History(RateRule::new(100, 900)));
	}

	#[test]
	fn earliest_safe_instant_wins_across_rules() {
		let store = store_with_calls(3, T0);
		let governor = RateGovernor::from_limits([(2, 60), (3, 600)]);
		let delay = governor.delay_at(&store, T0).expect("Delay should compute.");

		assert_eq!(delay.delay, Duration::seconds(60));
		assert_eq!(delay.safe_at, T0 + Duration::seconds(60));
		assert_eq!(delay.basis, DelayBasis::History(RateRule::new(2, 60)));

		// Only the smaller rule has enough history here.
		let delay = governor.delay_at(&store_with_calls(2, T0), T0).expect("Delay should compute.");

		assert_eq!(delay.basis, DelayBasis::History(RateRule::new(2, 60)));
	}

	#[test]
	fn backoff_keeps_a_pending_history_delay() {
		let governor = RateGovernor::from_limits([(2, 60)]);
		let delay = governor
			.backoff_at(&store_with_calls(2, T0), T0 + Duration::seconds(20))
			.expect("Backoff should compute.");

		assert_eq!(delay.delay, Duration::seconds(40));
		assert_eq!(delay.basis, DelayBasis::History(RateRule::new(2, 60)));
	}

	#[test]
	fn backoff_guesses_once_history_has_cleared() {
		let governor = RateGovernor::from_limits([(2, 60)]);
		let delay = governor
			.backoff_at(&store_with_calls(2, T0), T0 + Duration::seconds(90))
			.expect("Backoff should compute.");

		assert_eq!(delay.delay, Duration::seconds(60));
		assert_eq!(delay.basis, DelayBasis::Guess(RateRule::new(2, 60)));
	}

	#[test]
	fn elapsed_windows_report_non_positive_delays() {
		let governor = RateGovernor::from_limits([(2, 60)]);
		let delay = governor
			.delay_at(&store_with_calls(2, T0), T0 + Duration::seconds(90))
			.expect("Delay should compute.");

		assert_eq!(delay.delay, Duration::seconds(-30));
		assert!(delay.is_safe_now());
	}

	#[test]
	fn backoff_guesses_from_the_smallest_limit() {
		let governor = RateGovernor::from_limits([(1000, 86_400), (100, 900)]);
		let delay = governor
			.backoff_at(&store_with_calls(5, T0), T0)
			.expect("Backoff should compute.");

		assert_eq!(delay.delay, Duration::seconds(900));
		assert_eq!(delay.basis, DelayBasis::Guess(RateRule::new(100, 900)));

		let unconfigured = RateGovernor::default()
			.backoff_at(&store_with_calls(0, T0), T0)
			.expect("Backoff should compute.");

		assert!(unconfigured.delay.is_positive());
		assert_eq!(unconfigured.basis, DelayBasis::Unconfigured);
	}

	#[test]
	fn zero_limits_are_ignored() {
		let governor = RateGovernor::from_limits([(0, 10), (5, 60)]);

		assert_eq!(governor.rules(), &[RateRule::new(5, 60)]);
	}
}
