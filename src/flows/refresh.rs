//! Refresh-token redemption for the managed credential.

// self
use crate::{
	_prelude::*,
	auth::Credential,
	error::ConfigError,
	flows::CredentialManager,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl CredentialManager {
	/// Redeems the stored refresh token now, regardless of the current expiry.
	///
	/// Unlike [`ensure_valid`](Self::ensure_valid) this never falls back to interactive
	/// authorization; grant rejections are returned to the caller.
	pub async fn force_refresh(&self) -> Result<Arc<Credential>> {
		let _writer = self.writer.lock().await;
		let current = self.current().ok_or_else(|| Error::AuthorizationRequired {
			reason: "no credential has been issued yet".into(),
		})?;

		self.refresh_locked(&current).await
	}

	pub(super) async fn refresh_locked(&self, current: &Credential) -> Result<Arc<Credential>> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.refresh_metrics.started();

		let result = span
			.instrument(async {
				let _activity = self.begin(KIND);
				let refresh_token =
					current.refresh_token.as_ref().ok_or(ConfigError::MissingRefreshToken)?;
				let refreshed =
					self.token_client.refresh(refresh_token, &current.granted_scope).await?;

				tracing::debug!(
					expires_at = %refreshed.expires_at,
					rotated = refreshed.refresh_token != current.refresh_token,
					"Refresh succeeded."
				);

				self.install(refreshed).await
			})
			.await;

		self.refresh_metrics.finished(&result);
		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}
}
