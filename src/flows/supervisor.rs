//! Background task that keeps the managed credential fresh.

// crates.io
use tokio::{sync::watch, task::JoinHandle};
// self
use crate::{_prelude::*, flows::CredentialManager};

/// Control handle for a running refresh loop. Dropping it also stops the loop at its next
/// suspension point.
#[derive(Debug)]
pub struct RefreshLoopHandle {
	shutdown: watch::Sender<bool>,
	task: JoinHandle<()>,
}
impl RefreshLoopHandle {
	/// Signals the loop to stop and waits for it to finish its current iteration.
	pub async fn shutdown(self) {
		let _ = self.shutdown.send(true);

		match self.task.await {
			Err(e) if e.is_panic() => tracing::error!(error = %e, "Refresh loop panicked."),
			_ => {},
		}
	}

	/// Returns `true` once the loop task has exited.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}

impl CredentialManager {
	/// Spawns the refresh loop on the current tokio runtime.
	///
	/// Each iteration calls [`ensure_valid`](Self::ensure_valid) and then sleeps until the
	/// access token expires, capped at the configured poll interval. Failures are logged and
	/// retried after a full poll interval. Shutdown is observed before and after every sleep
	/// and also interrupts the sleep itself.
	pub fn spawn_refresh_loop(self: &Arc<Self>) -> RefreshLoopHandle {
		let (shutdown, signal) = watch::channel(false);
		let manager = Arc::clone(self);
		let task = tokio::spawn(async move { manager.run_refresh_loop(signal).await });

		RefreshLoopHandle { shutdown, task }
	}

	/// Sleep the loop takes after a successful iteration observed at `now`.
	pub fn next_pause_at(&self, now: OffsetDateTime) -> Duration {
		let poll = self.config.poll_interval;

		match self.current() {
			Some(credential) => (credential.expires_at - now).clamp(Duration::ZERO, poll),
			None => poll,
		}
	}

	async fn run_refresh_loop(&self, mut shutdown: watch::Receiver<bool>) {
		tracing::info!(
			poll_interval_secs = self.config.poll_interval.whole_seconds(),
			"Refresh loop started."
		);

		let mut iteration = 0_u64;

		loop {
			if *shutdown.borrow() {
				break;
			}

			iteration += 1;

			let pause = match self.ensure_valid().await {
				Ok(credential) => {
					tracing::debug!(
						iteration,
						expires_at = %credential.expires_at,
						"Refresh loop iteration succeeded."
					);

					self.next_pause_at(OffsetDateTime::now_utc())
				},
				Err(e) => {
					tracing::warn!(iteration, error = %e, "Refresh loop iteration failed.");

					self.config.poll_interval
				},
			};

			tokio::select! {
				_ = tokio::time::sleep(pause.unsigned_abs()) => {},
				changed = shutdown.changed() => {
					if changed.is_err() {
						break;
					}
				},
			}

			if *shutdown.borrow() {
				break;
			}
		}

		tracing::info!(iterations = iteration, "Refresh loop stopped.");
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::{Credential, ScopeSet},
	};

	#[tokio::test]
	async fn pause_is_clamped_between_zero_and_the_poll_interval() {
		// Whole seconds, since the secrets document stores epoch seconds.
		let now = OffsetDateTime::from_unix_timestamp(1_767_225_600).expect("Fixture instant.");
		let credential = |expires_in| {
			Credential::builder()
				.access_token("token")
				.refresh_token("refresh")
				.issued_at(now)
				.expires_in(expires_in)
				.granted_scope(ScopeSet::new(["read"]).expect("Scope should parse."))
				.build()
				.expect("Credential fixture should build.")
		};
		let descriptor = test_descriptor("https://example.com");
		let empty = build_test_manager(descriptor.clone(), seeded_memory_store(None).await).await;
		let far = build_test_manager(
			descriptor.clone(),
			seeded_memory_store(Some(credential(Duration::hours(6)))).await,
		)
		.await;
		let near = build_test_manager(
			descriptor.clone(),
			seeded_memory_store(Some(credential(Duration::seconds(30)))).await,
		)
		.await;
		let stale = build_test_manager(
			descriptor,
			seeded_memory_store(Some(credential(Duration::seconds(-30)))).await,
		)
		.await;

		assert_eq!(empty.next_pause_at(now), Duration::seconds(60));
		assert_eq!(far.next_pause_at(now), Duration::seconds(60));
		assert_eq!(near.next_pause_at(now), Duration::seconds(30));
		assert_eq!(stale.next_pause_at(now), Duration::ZERO);
	}
}
