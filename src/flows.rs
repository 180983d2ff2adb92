//! Credential lifecycle: interactive authorization, refresh, and the supervised refresh loop.
//!
//! [`CredentialManager`] owns the only live [`Credential`]. Readers get an immutable
//! `Arc<Credential>` snapshot that is swapped atomically; every write (authorization or
//! refresh) runs behind a single async writer guard, is persisted through the
//! [`CredentialStore`], and only then announced to token listeners.

pub mod authorize;
pub mod prompt;
pub mod refresh;
pub mod supervisor;

pub use authorize::*;
pub use prompt::*;
pub use supervisor::RefreshLoopHandle;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	error::ConfigError,
	http::ReqwestHttpClient,
	oauth::TokenClient,
	obs::FlowKind,
	provider::ProviderDescriptor,
	store::{ClientSecrets, CredentialStore, SecretsDocument},
};

/// Callback invoked with the new credential whenever the access token value changes.
pub type TokenListener = Arc<dyn Fn(&Credential) + Send + Sync>;

/// Observable lifecycle state of the managed credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialState {
	/// No credential has been issued yet.
	Uninitialized,
	/// An interactive authorization is in progress.
	Authorizing,
	/// The access token is usable.
	Valid,
	/// A refresh is in progress.
	Refreshing,
	/// The access token has expired and no flow is running.
	Expired,
}

/// Attempt, success, and failure counts for one kind of credential flow.
#[derive(Debug, Default)]
pub struct FlowMetrics {
	attempts: AtomicU64,
	successes: AtomicU64,
	failures: AtomicU64,
}
impl FlowMetrics {
	/// Flows started.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Flows that installed a credential.
	pub fn successes(&self) -> u64 {
		self.successes.load(Ordering::Relaxed)
	}

	/// Flows that returned an error.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	fn started(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	fn finished<T>(&self, result: &Result<T>) {
		let counter = if result.is_ok() { &self.successes } else { &self.failures };

		counter.fetch_add(1, Ordering::Relaxed);
	}
}

/// Tunables for [`CredentialManager`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
	/// Upper bound on the refresh loop's sleep between iterations.
	pub poll_interval: Duration,
}
impl Default for ManagerConfig {
	fn default() -> Self {
		Self { poll_interval: Duration::seconds(60) }
	}
}

/// Keeps one OAuth credential valid and tells interested parties when it changes.
pub struct CredentialManager {
	store: Arc<dyn CredentialStore>,
	descriptor: ProviderDescriptor,
	secrets: ClientSecrets,
	token_client: TokenClient,
	prompt: Arc<dyn AuthorizationPrompt>,
	config: ManagerConfig,
	snapshot: RwLock<Option<Arc<Credential>>>,
	activity: RwLock<Option<FlowKind>>,
	writer: AsyncMutex<()>,
	listeners: RwLock<Vec<TokenListener>>,
	refresh_metrics: Arc<FlowMetrics>,
	authorization_metrics: Arc<FlowMetrics>,
}
impl CredentialManager {
	/// Loads client secrets and the last credential from `store`.
	///
	/// Missing client secrets are a configuration error; a missing credential is not and
	/// leaves the manager [`CredentialState::Uninitialized`].
	pub async fn load(
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
		prompt: Arc<dyn AuthorizationPrompt>,
		config: ManagerConfig,
	) -> Result<Self> {
		Self::load_with_http_client(store, descriptor, prompt, config, ReqwestHttpClient::default())
			.await
	}

	/// Same as [`load`](Self::load) but reuses a caller-provided HTTP client for token calls.
	pub async fn load_with_http_client(
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
		prompt: Arc<dyn AuthorizationPrompt>,
		config: ManagerConfig,
		http_client: ReqwestHttpClient,
	) -> Result<Self> {
		let document = store.load().await?.ok_or(ConfigError::MissingClientSecrets)?;
		let secrets = document.client_secrets()?;
		let credential = document.credential()?;
		let token_client = TokenClient::from_descriptor(&descriptor, &secrets, http_client)?;

		tracing::debug!(
			has_credential = credential.is_some(),
			token_endpoint = %descriptor.endpoints.token,
			"Credential manager loaded."
		);

		Ok(Self {
			store,
			descriptor,
			secrets,
			token_client,
			prompt,
			config,
			snapshot: RwLock::new(credential.map(Arc::new)),
			activity: RwLock::new(None),
			writer: AsyncMutex::new(()),
			listeners: RwLock::new(Vec::new()),
			refresh_metrics: Default::default(),
			authorization_metrics: Default::default(),
		})
	}

	/// Provider descriptor the manager authorizes against.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// Manager tunables.
	pub fn config(&self) -> &ManagerConfig {
		&self.config
	}

	/// Current credential snapshot.
	pub fn current(&self) -> Option<Arc<Credential>> {
		self.snapshot.read().clone()
	}

	/// Current access token.
	pub fn access_token(&self) -> Option<TokenSecret> {
		self.current().map(|credential| credential.access_token.clone())
	}

	/// Time left on the current access token; negative once expired.
	pub fn expires_in(&self) -> Option<Duration> {
		self.current().map(|credential| credential.expires_in())
	}

	/// Lifecycle state at the current instant.
	pub fn state(&self) -> CredentialState {
		self.state_at(OffsetDateTime::now_utc())
	}

	/// Lifecycle state at `now`.
	pub fn state_at(&self, now: OffsetDateTime) -> CredentialState {
		match *self.activity.read() {
			Some(FlowKind::Authorization) => return CredentialState::Authorizing,
			Some(FlowKind::Refresh) => return CredentialState::Refreshing,
			_ => {},
		}

		match self.current() {
			None => CredentialState::Uninitialized,
			Some(credential) if credential.is_expired_at(now) => CredentialState::Expired,
			Some(_) => CredentialState::Valid,
		}
	}

	/// Registers a callback fired after a new access token has been persisted.
	pub fn on_token_change<F>(&self, listener: F)
	where
		F: 'static + Fn(&Credential) + Send + Sync,
	{
		self.listeners.write().push(Arc::new(listener));
	}

	/// Counters for refresh attempts.
	pub fn refresh_metrics(&self) -> &FlowMetrics {
		&self.refresh_metrics
	}

	/// Counters for interactive authorization attempts.
	pub fn authorization_metrics(&self) -> &FlowMetrics {
		&self.authorization_metrics
	}

	/// Makes sure a usable credential exists.
	///
	/// Without a credential, with an expired one, or when the granted scope no longer covers
	/// the requested scope, this runs interactive authorization. Otherwise it refreshes. A
	/// refresh the provider rejects falls back to authorization; other failures are returned.
	pub async fn ensure_valid(&self) -> Result<Arc<Credential>> {
		let _writer = self.writer.lock().await;
		let now = OffsetDateTime::now_utc();
		let current = match self.current() {
			Some(credential) if credential.is_expired_at(now) => {
				tracing::info!("Credential expired; authorization required.");

				None
			},
			Some(credential) if !credential.granted_scope.covers(&self.descriptor.scopes) => {
				tracing::info!(
					granted = %credential.granted_scope,
					requested = %self.descriptor.scopes,
					"Granted scope does not cover the requested scope; authorization required."
				);

				None
			},
			other => other,
		};
		let Some(current) = current else {
			return self.authorize_locked().await;
		};

		match self.refresh_locked(&current).await {
			Ok(credential) => Ok(credential),
			Err(e) if e.is_grant_rejection() => {
				tracing::warn!(error = %e, "Refresh was rejected; falling back to authorization.");

				self.authorize_locked().await
			},
			Err(e) => Err(e),
		}
	}

	/// Persists `credential`, swaps the snapshot, and notifies listeners when the access token
	/// changed. Callers must hold the writer guard.
	async fn install(&self, credential: Credential) -> Result<Arc<Credential>> {
		let document = SecretsDocument::new(self.secrets.clone(), Some(&credential));

		self.store.save(document).await?;

		let credential = Arc::new(credential);
		let previous = self.snapshot.write().replace(Arc::clone(&credential));
		let changed =
			previous.is_none_or(|previous| previous.access_token != credential.access_token);

		if changed {
			let listeners = self.listeners.read().clone();

			tracing::debug!(listeners = listeners.len(), "Access token changed.");

			for listener in listeners {
				listener(&credential);
			}
		}

		Ok(credential)
	}

	fn begin(&self, kind: FlowKind) -> ActivityGuard<'_> {
		*self.activity.write() = Some(kind);

		ActivityGuard(&self.activity)
	}
}
impl Debug for CredentialManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialManager")
			.field("descriptor", &self.descriptor)
			.field("client_id", &self.secrets.client_id)
			.field("credential", &self.current())
			.field("config", &self.config)
			.finish()
	}
}

struct ActivityGuard<'a>(&'a RwLock<Option<FlowKind>>);
impl Drop for ActivityGuard<'_> {
	fn drop(&mut self) {
		*self.0.write() = None;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, auth::ScopeSet, store::MemoryStore};

	fn credential(access: &str, expires_in: Duration) -> Credential {
		Credential::builder()
			.access_token(access)
			.refresh_token("refresh")
			.expires_in(expires_in)
			.granted_scope(ScopeSet::new(["read", "activity:read"]).expect("Scopes should parse."))
			.build()
			.expect("Credential fixture should build.")
	}

	#[test]
	fn flow_metrics_split_outcomes() {
		let metrics = FlowMetrics::default();

		metrics.started();
		metrics.finished(&Ok::<_, Error>(()));
		metrics.started();
		metrics.finished::<()>(&Err(Error::Revoked));

		assert_eq!((metrics.attempts(), metrics.successes(), metrics.failures()), (2, 1, 1));
	}
	#[tokio::test]
	async fn install_persists_before_notifying_and_skips_unchanged_tokens() {
		let store = seeded_memory_store(None).await;
		let manager =
			build_test_manager(test_descriptor("https://example.com"), store.clone()).await;
		let seen = Arc::new(Mutex::new(Vec::new()));

		{
			let seen = seen.clone();
			let store = store.clone();

			manager.on_token_change(move |credential| {
				let persisted = store
					.snapshot()
					.and_then(|document| document.access_token)
					.map(|token| token.expose().to_owned());

				seen.lock().push((credential.access_token.expose().to_owned(), persisted));
			});
		}

		assert_eq!(manager.state(), CredentialState::Uninitialized);

		manager
			.install(credential("first", Duration::hours(6)))
			.await
			.expect("Install should work.");
		manager
			.install(credential("first", Duration::hours(5)))
			.await
			.expect("Install should work.");
		manager
			.install(credential("second", Duration::hours(6)))
			.await
			.expect("Install should work.");

		assert_eq!(
			*seen.lock(),
			vec![
				("first".to_owned(), Some("first".to_owned())),
				("second".to_owned(), Some("second".to_owned())),
			]
		);
		// One seed plus three installs.
		assert_eq!(store.save_count(), 4);
		assert_eq!(manager.state(), CredentialState::Valid);
		assert_eq!(manager.access_token().map(|t| t.expose().to_owned()), Some("second".into()));
	}

	#[tokio::test]
	async fn state_tracks_expiry_and_activity() {
		let store = seeded_memory_store(Some(credential("stale", Duration::seconds(-5)))).await;
		let manager = build_test_manager(test_descriptor("https://example.com"), store).await;

		assert_eq!(manager.state(), CredentialState::Expired);
		assert!(manager.expires_in().is_some_and(|left| left.is_negative()));

		{
			let _guard = manager.begin(FlowKind::Refresh);

			assert_eq!(manager.state(), CredentialState::Refreshing);
		}

		assert_eq!(manager.state(), CredentialState::Expired);
	}

	#[tokio::test]
	async fn load_requires_client_secrets() {
		let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
		let err = CredentialManager::load(
			store,
			test_descriptor("https://example.com"),
			Arc::new(NonInteractivePrompt),
			ManagerConfig::default(),
		)
		.await
		.expect_err("An empty store has no client secrets.");

		assert!(matches!(err, Error::Config(ConfigError::MissingClientSecrets)));
	}
}
