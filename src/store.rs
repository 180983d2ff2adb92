//! Persistence contract for the client secrets and the live credential.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{Credential, ScopeSet, TokenSecret},
	error::ConfigError,
};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend for the secrets document.
///
/// The document is always rewritten wholesale; backends never merge fields.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Loads the stored document, if any.
	fn load(&self) -> StoreFuture<'_, Option<SecretsDocument>>;

	/// Replaces the stored document.
	fn save(&self, document: SecretsDocument) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// The document could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// The storage medium failed.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// First-party OAuth client registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSecrets {
	/// Public client identifier.
	pub client_id: String,
	/// Confidential client secret.
	pub client_secret: TokenSecret,
}
impl ClientSecrets {
	/// Wraps a client id and secret.
	pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
		Self { client_id: client_id.into(), client_secret: TokenSecret::new(client_secret) }
	}
}

/// On-disk secrets document: client registration plus the last issued credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsDocument {
	/// Public client identifier.
	#[serde(default)]
	pub client_id: String,
	/// Confidential client secret.
	#[serde(default)]
	pub client_secret: Option<TokenSecret>,
	/// Last access token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_token: Option<TokenSecret>,
	/// Last refresh token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// Access-token expiry in epoch seconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<i64>,
	/// Granted scope, comma-delimited.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
}
impl SecretsDocument {
	/// Builds a document from client secrets and an optional credential.
	pub fn new(secrets: ClientSecrets, credential: Option<&Credential>) -> Self {
		let document = Self {
			client_id: secrets.client_id,
			client_secret: Some(secrets.client_secret),
			..Default::default()
		};

		match credential {
			Some(credential) => document.with_credential(credential),
			None => document,
		}
	}

	/// Replaces the credential fields.
	pub fn with_credential(mut self, credential: &Credential) -> Self {
		self.access_token = Some(credential.access_token.clone());
		self.refresh_token = credential.refresh_token.clone();
		self.expires_at = Some(credential.expires_at.unix_timestamp());
		self.scope = Some(credential.granted_scope.join(','));

		self
	}

	/// Client registration, if both halves are present.
	pub fn client_secrets(&self) -> Result<ClientSecrets, ConfigError> {
		match &self.client_secret {
			Some(secret) if !self.client_id.is_empty() && !secret.expose().is_empty() =>
				Ok(ClientSecrets {
					client_id: self.client_id.clone(),
					client_secret: secret.clone(),
				}),
			_ => Err(ConfigError::MissingClientSecrets),
		}
	}

	/// Stored credential; `None` until the first authorization completes.
	pub fn credential(&self) -> Result<Option<Credential>, ConfigError> {
		let (Some(access_token), Some(expires_at)) = (&self.access_token, self.expires_at) else {
			return Ok(None);
		};
		let expires_at = OffsetDateTime::from_unix_timestamp(expires_at)
			.map_err(|_| ConfigError::ExpiresInOutOfRange)?;
		let granted_scope = match &self.scope {
			Some(scope) => ScopeSet::parse_delimited(scope, ',')?,
			None => ScopeSet::default(),
		};
		let credential = Credential::builder()
			.access_token(access_token.expose())
			.refresh_secret(self.refresh_token.clone())
			.expires_at(expires_at)
			.granted_scope(granted_scope)
			.build()?;

		Ok(Some(credential))
	}
}
