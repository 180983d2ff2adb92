//! File-based client configuration and the wiring helpers built on it.
//!
//! Every field has a default, so a configuration file only needs the keys it changes. The
//! defaults describe the Strava v3 API.

// std
use std::{
	fs,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	cache::{RequestStore, StoreConfig},
	error::ConfigError,
	flows::{AuthorizationPrompt, CredentialManager, ManagerConfig},
	gateway::{GatewayConfig, RequestGateway},
	governor::RateGovernor,
	http::ReqwestHttpClient,
	provider::ProviderDescriptor,
	store::{CredentialStore, FileStore},
};

/// Client configuration loaded from JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// Base URL every route is appended to.
	pub api_base_url: String,
	/// OAuth authorization endpoint.
	pub authorization_endpoint: String,
	/// OAuth token endpoint.
	pub token_endpoint: String,
	/// Loopback redirect registered with the provider.
	pub redirect_uri: String,
	/// Requested scopes.
	pub scopes: Vec<String>,
	/// Delimiter used to join scopes on the wire.
	pub scope_delimiter: char,
	/// Extra authorize URL parameters.
	pub authorize_params: BTreeMap<String, String>,
	/// Sends a PKCE challenge with the authorization request.
	pub pkce_required: bool,
	/// Permits plain-HTTP OAuth endpoints (local testing only).
	pub allow_insecure_endpoints: bool,
	/// SQLite request cache location.
	pub cache_path: PathBuf,
	/// Records non-200 exchanges too.
	pub cache_failed_requests: bool,
	/// `{limit: window_secs}` rate rules.
	pub rate_limits: BTreeMap<u32, u64>,
	/// Retries after a 429 by default.
	pub retry_on_rate_limit: bool,
	/// Maximum 429 retries per call.
	pub max_rate_limit_retries: Option<u32>,
	/// Maximum seconds spent waiting on 429s per call.
	pub max_rate_limit_wait_secs: Option<u64>,
	/// Refresh loop poll interval in seconds.
	pub poll_interval_secs: u64,
	/// Secrets document location.
	pub secrets_path: PathBuf,
}
impl ClientConfig {
	/// Reads and parses a configuration file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let invalid = |message: String| ConfigError::InvalidConfigFile {
			path: path.display().to_string(),
			message,
		};
		let raw = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;

		Self::from_json(&raw).map_err(|e| invalid(e).into())
	}

	/// Parses configuration JSON; the error names the offending field.
	pub fn from_json(raw: &str) -> Result<Self, String> {
		let mut de = serde_json::Deserializer::from_str(raw);

		serde_path_to_error::deserialize(&mut de)
			.map_err(|e| format!("{} at `{}`", e.inner(), e.path()))
	}

	/// Requested scopes as a normalized set.
	pub fn scope_set(&self) -> Result<ScopeSet> {
		Ok(ScopeSet::new(self.scopes.iter().cloned()).map_err(ConfigError::from)?)
	}

	/// Provider descriptor for the credential manager.
	pub fn descriptor(&self) -> Result<ProviderDescriptor> {
		let mut builder = ProviderDescriptor::builder()
			.authorization_endpoint(parse_url(
				"authorization_endpoint",
				&self.authorization_endpoint,
			)?)
			.token_endpoint(parse_url("token_endpoint", &self.token_endpoint)?)
			.redirect_uri(parse_url("redirect_uri", &self.redirect_uri)?)
			.scopes(self.scope_set()?)
			.scope_delimiter(self.scope_delimiter)
			.pkce_required(self.pkce_required)
			.allow_insecure_endpoints(self.allow_insecure_endpoints);

		for (key, value) in &self.authorize_params {
			builder = builder.authorize_param(key, value);
		}

		Ok(builder.build().map_err(ConfigError::from)?)
	}

	/// Parsed API base URL.
	pub fn base_url(&self) -> Result<Url> {
		parse_url("api_base_url", &self.api_base_url)
	}

	/// Request store policy.
	pub fn store_config(&self) -> StoreConfig {
		StoreConfig { cache_failed_requests: self.cache_failed_requests }
	}

	/// Rate governor built from `rate_limits`.
	pub fn governor(&self) -> RateGovernor {
		RateGovernor::from_limits(self.rate_limits.iter().map(|(limit, window)| (*limit, *window)))
	}

	/// Gateway retry policy.
	pub fn gateway_config(&self) -> GatewayConfig {
		GatewayConfig {
			retry_on_rate_limit: self.retry_on_rate_limit,
			max_rate_limit_retries: self.max_rate_limit_retries,
			max_rate_limit_wait: self.max_rate_limit_wait_secs.map(seconds),
		}
	}

	/// Credential manager tunables.
	pub fn manager_config(&self) -> ManagerConfig {
		ManagerConfig { poll_interval: seconds(self.poll_interval_secs) }
	}

	/// Opens the request cache at `cache_path`.
	pub fn open_request_store(&self) -> Result<Arc<RequestStore>> {
		Ok(Arc::new(RequestStore::open(&self.cache_path, self.store_config())?))
	}

	/// Opens the secrets document at `secrets_path`.
	pub fn open_secrets_store(&self) -> Result<Arc<FileStore>> {
		Ok(Arc::new(FileStore::open(&self.secrets_path)?))
	}

	/// Gateway over `store` using the default reqwest transport.
	pub fn build_gateway(&self, store: Arc<RequestStore>) -> Result<RequestGateway> {
		Ok(RequestGateway::new(
			self.base_url()?,
			store,
			self.governor(),
			ReqwestHttpClient::default(),
			self.gateway_config(),
		))
	}

	/// Credential manager backed by the secrets file.
	pub async fn build_manager(
		&self,
		prompt: Arc<dyn AuthorizationPrompt>,
	) -> Result<CredentialManager> {
		let store: Arc<dyn CredentialStore> = self.open_secrets_store()?;

		CredentialManager::load(store, self.descriptor()?, prompt, self.manager_config()).await
	}
}
impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			api_base_url: "https://www.strava.com/api/v3".into(),
			authorization_endpoint: "https://www.strava.com/oauth/authorize".into(),
			token_endpoint: "https://www.strava.com/oauth/token".into(),
			redirect_uri: "http://localhost:8000/exchange_token".into(),
			scopes: ["read", "read_all", "profile:read_all", "activity:read", "activity:read_all"]
				.map(String::from)
				.to_vec(),
			scope_delimiter: ',',
			authorize_params: BTreeMap::from([("approval_prompt".into(), "force".into())]),
			pkce_required: false,
			allow_insecure_endpoints: false,
			cache_path: PathBuf::from("api_cache.db"),
			cache_failed_requests: true,
			rate_limits: BTreeMap::from([(100, 15 * 60), (1_000, 24 * 60 * 60)]),
			retry_on_rate_limit: true,
			max_rate_limit_retries: None,
			max_rate_limit_wait_secs: None,
			poll_interval_secs: 60,
			secrets_path: PathBuf::from("secrets.json"),
		}
	}
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url> {
	Ok(Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })?)
}

fn seconds(secs: u64) -> Duration {
	Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
	// crates.io
	use tempfile::TempDir;
	// self
	use super::*;
	use crate::governor::RateRule;

	#[test]
	fn partial_file_keeps_defaults() {
		let config = ClientConfig::from_json(
			r#"{"rate_limits": {"100": 900}, "max_rate_limit_retries": 3, "scopes": ["read"]}"#,
		)
		.expect("Partial configuration should parse.");

		assert_eq!(
			config.base_url().expect("Default base URL should parse.").as_str(),
			"https://www.strava.com/api/v3"
		);
		assert_eq!(config.governor().rules(), &[RateRule::new(100, 900)]);
		assert_eq!(config.gateway_config().max_rate_limit_retries, Some(3));
		assert_eq!(config.manager_config().poll_interval, Duration::seconds(60));

		let descriptor = config.descriptor().expect("Default endpoints should validate.");

		assert_eq!(descriptor.scope_param(), "read");
		assert_eq!(
			descriptor.extra_authorize_params,
			vec![("approval_prompt".to_owned(), "force".to_owned())]
		);
	}

	#[test]
	fn load_reports_the_offending_field() {
		let dir = TempDir::new().expect("Temp dir should be created.");
		let path = dir.path().join("config.json");

		fs::write(&path, r#"{"poll_interval_secs": "soon"}"#).expect("Config should be written.");

		let err = ClientConfig::load(&path).expect_err("A string interval should fail.");

		assert!(matches!(
			err,
			Error::Config(ConfigError::InvalidConfigFile { message, .. })
				if message.contains("poll_interval_secs")
		));
	}

	#[test]
	fn insecure_endpoints_need_opt_in() {
		let mut config = ClientConfig {
			token_endpoint: "http://127.0.0.1:9000/oauth/token".into(),
			..Default::default()
		};

		assert!(config.descriptor().is_err());

		config.allow_insecure_endpoints = true;

		assert!(config.descriptor().is_ok());

		config.api_base_url = "not a url".into();

		assert!(matches!(
			config.base_url(),
			Err(Error::Config(ConfigError::InvalidUrl { field: "api_base_url", .. }))
		));
	}
}
