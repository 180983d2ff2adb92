//! Immutable OAuth credential snapshots and their builder.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
};

/// Lifecycle status of a credential at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
	/// The access token is usable.
	Active,
	/// The expiry instant has passed.
	Expired,
}

/// Errors produced by [`CredentialBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// One OAuth token set. Values are never mutated in place; refreshes build a new
/// credential and swap the shared snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
	/// Bearer token attached to API calls.
	pub access_token: TokenSecret,
	/// Refresh token, if the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Instant the access token stops being accepted.
	pub expires_at: OffsetDateTime,
	/// Scopes the user actually granted.
	pub granted_scope: ScopeSet,
}
impl Credential {
	/// Returns a builder for assembling a credential.
	pub fn builder() -> CredentialBuilder {
		CredentialBuilder::default()
	}

	/// Computes the lifecycle status at the provided instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> CredentialStatus {
		if instant >= self.expires_at {
			CredentialStatus::Expired
		} else {
			CredentialStatus::Active
		}
	}

	/// Returns `true` if the credential has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), CredentialStatus::Expired)
	}

	/// Time left until expiry; negative once expired.
	pub fn expires_in_at(&self, instant: OffsetDateTime) -> Duration {
		self.expires_at - instant
	}

	/// Time left until expiry relative to the current clock.
	pub fn expires_in(&self) -> Duration {
		self.expires_in_at(OffsetDateTime::now_utc())
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("granted_scope", &self.granted_scope)
			.finish()
	}
}

/// Builder for [`Credential`].
#[derive(Clone, Debug, Default)]
pub struct CredentialBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	granted_scope: ScopeSet,
}
impl CredentialBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Keeps an already-wrapped refresh token (or clears it).
	pub fn refresh_secret(mut self, token: Option<TokenSecret>) -> Self {
		self.refresh_token = token;

		self
	}

	/// Sets the instant relative expiries are measured from (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Sets the granted scope.
	pub fn granted_scope(mut self, scope: ScopeSet) -> Self {
		self.granted_scope = scope;

		self
	}

	/// Consumes the builder and produces a [`Credential`].
	pub fn build(self) -> Result<Credential, CredentialBuilderError> {
		let access_token = self.access_token.ok_or(CredentialBuilderError::MissingAccessToken)?;
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => self.issued_at.unwrap_or_else(OffsetDateTime::now_utc) + delta,
			(None, None) => return Err(CredentialBuilderError::MissingExpiry),
		};

		Ok(Credential {
			access_token,
			refresh_token: self.refresh_token,
			expires_at,
			granted_scope: self.granted_scope,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn status_flips_at_expiry() {
		let credential = Credential::builder()
			.access_token("access")
			.refresh_token("refresh")
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC))
			.build()
			.expect("Credential builder should succeed with an absolute expiry.");

		assert_eq!(
			credential.status_at(macros::datetime!(2025-01-01 00:30 UTC)),
			CredentialStatus::Active
		);
		assert_eq!(
			credential.status_at(macros::datetime!(2025-01-01 01:00 UTC)),
			CredentialStatus::Expired
		);
		assert_eq!(
			credential.expires_in_at(macros::datetime!(2025-01-01 00:30 UTC)),
			Duration::minutes(30)
		);
	}

	#[test]
	fn builder_handles_relative_expiry() {
		let credential = Credential::builder()
			.access_token("secret")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::hours(6))
			.build()
			.expect("Credential builder should support relative expiry calculations.");

		assert_eq!(credential.expires_at, macros::datetime!(2025-01-01 06:00 UTC));
		assert!(credential.refresh_token.is_none());
	}

	#[test]
	fn builder_requires_token_and_expiry() {
		assert_eq!(
			Credential::builder().expires_in(Duration::hours(1)).build(),
			Err(CredentialBuilderError::MissingAccessToken)
		);
		assert_eq!(
			Credential::builder().access_token("a").build(),
			Err(CredentialBuilderError::MissingExpiry)
		);
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let credential = Credential::builder()
			.access_token("very-secret")
			.refresh_token("also-secret")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Credential fixture should build.");
		let rendered = format!("{credential:?}");

		assert!(!rendered.contains("very-secret"));
		assert!(!rendered.contains("also-secret"));
	}
}
