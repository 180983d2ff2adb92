//! Observability helpers shared by credential flows and the request gateway.
//!
//! Spans are named `api_cache.flow` and carry `flow` and `stage` fields. With the `metrics`
//! feature enabled every attempt, success, and failure increments `api_cache_flow_total`,
//! labeled by `flow` and `outcome`.

mod tracing;

pub use tracing::*;

// self
use crate::_prelude::*;

/// Flow kinds observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Interactive authorization code grant.
	Authorization,
	/// Refresh token grant.
	Refresh,
	/// Gateway API call.
	Request,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Authorization => "authorization",
			FlowKind::Refresh => "refresh",
			FlowKind::Request => "request",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}

	/// Maps a result onto its terminal outcome.
	pub fn of<T>(result: &Result<T>) -> Self {
		if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure }
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Counts `outcome` for `kind` in `api_cache_flow_total` when the `metrics` feature is on.
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		let (flow, outcome) = (kind.as_str(), outcome.as_str());

		metrics::counter!("api_cache_flow_total", "flow" => flow, "outcome" => outcome)
			.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn outcome_follows_result() {
		assert_eq!(FlowOutcome::of(&Ok::<_, Error>(())), FlowOutcome::Success);
		assert_eq!(FlowOutcome::of::<()>(&Err(Error::Revoked)), FlowOutcome::Failure);
		assert_eq!(FlowKind::Request.to_string(), "request");
	}

	#[test]
	fn outcomes_record_without_a_recorder() {
		record_flow_outcome(FlowKind::Refresh, FlowOutcome::Failure);
	}
}
