//! Personal HTTP API client that keeps a rate-limited remote API at arm's length: every
//! exchange lands in a SQLite request cache, retries are paced from that cache's own history,
//! and a supervised background loop keeps the OAuth 2.0 bearer token valid.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod flows;
pub mod gateway;
pub mod governor;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod store;
#[cfg(any(test, feature = "test"))]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and fixtures shared by unit and integration tests; enabled via
	//! `cfg(test)` or the `test` feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::{Credential, ScopeSet},
		cache::{RequestStore, StoreConfig},
		flows::{CredentialManager, ManagerConfig, NonInteractivePrompt},
		gateway::{GatewayConfig, RequestGateway},
		governor::RateGovernor,
		http::ReqwestHttpClient,
		provider::ProviderDescriptor,
		store::{ClientSecrets, CredentialStore, MemoryStore, SecretsDocument},
	};

	/// Client identifier used by test fixtures.
	pub const TEST_CLIENT_ID: &str = "client-test";
	/// Client secret used by test fixtures.
	pub const TEST_CLIENT_SECRET: &str = "secret-test";

	/// Builds a descriptor whose endpoints live on the provided mock server base URL.
	pub fn test_descriptor(base: &str) -> ProviderDescriptor {
		let base = base.trim_end_matches('/');

		ProviderDescriptor::builder()
			.authorization_endpoint(
				Url::parse(&format!("{base}/oauth/authorize"))
					.expect("Mock authorize endpoint should parse successfully."),
			)
			.token_endpoint(
				Url::parse(&format!("{base}/oauth/token"))
					.expect("Mock token endpoint should parse successfully."),
			)
			.redirect_uri(
				Url::parse("http://127.0.0.1:8000/exchange_token")
					.expect("Redirect URI fixture should parse successfully."),
			)
			.scopes(
				ScopeSet::new(["read", "activity:read"]).expect("Scope fixture should be valid."),
			)
			.scope_delimiter(',')
			.allow_insecure_endpoints(true)
			.build()
			.expect("Test descriptor should build successfully.")
	}

	/// Opens an in-memory request store that caches failed responses.
	pub fn test_request_store() -> Arc<RequestStore> {
		Arc::new(
			RequestStore::open_in_memory(StoreConfig::default())
				.expect("In-memory request store should open."),
		)
	}

	/// Builds a gateway backed by an in-memory store and the reqwest transport.
	pub fn build_test_gateway(
		base_url: &str,
		governor: RateGovernor,
	) -> (RequestGateway, Arc<RequestStore>) {
		let store = test_request_store();
		let base = Url::parse(base_url).expect("Gateway base URL fixture should parse.");
		let gateway = RequestGateway::new(
			base,
			store.clone(),
			governor,
			ReqwestHttpClient::default(),
			GatewayConfig::default(),
		);

		(gateway, store)
	}

	/// Seeds a memory store with client secrets and, optionally, a credential.
	pub async fn seeded_memory_store(credential: Option<Credential>) -> Arc<MemoryStore> {
		let store = Arc::new(MemoryStore::default());
		let document = SecretsDocument::new(
			ClientSecrets::new(TEST_CLIENT_ID, TEST_CLIENT_SECRET),
			credential.as_ref(),
		);

		store.save(document).await.expect("Failed to seed the secrets store.");

		store
	}

	/// Loads a manager that refuses interactive authorization.
	pub async fn build_test_manager(
		descriptor: ProviderDescriptor,
		store: Arc<MemoryStore>,
	) -> CredentialManager {
		let store: Arc<dyn CredentialStore> = store;

		CredentialManager::load(
			store,
			descriptor,
			Arc::new(NonInteractivePrompt),
			ManagerConfig::default(),
		)
		.await
		.expect("Credential manager should load from the seeded store.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::Value as JsonValue;
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use rusqlite;
pub use url;
#[cfg(test)] use {httpmock as _, tempfile as _};
