//! Interactive authorization: session construction, redirect validation, code exchange.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{Credential, ScopeSet},
	flows::CredentialManager,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::ProviderDescriptor,
};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Supported PKCE challenge methods surfaced via [`AuthorizationSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// One authorization attempt: the URL the user must visit and the secrets needed to finish it.
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Requested scope.
	pub scope: ScopeSet,
	/// Opaque state value that must round-trip via the redirect.
	pub state: String,
	/// Redirect URI the provider sends the user back to.
	pub redirect_uri: Url,
	/// Fully-formed authorize URL.
	pub authorize_url: Url,
	pkce: Option<PkcePair>,
}
impl AuthorizationSession {
	/// Starts a session with a fresh `state` (and PKCE pair when the provider requires it).
	pub fn start(descriptor: &ProviderDescriptor, client_id: &str) -> Self {
		let state = random_string(STATE_LEN);
		let pkce = descriptor.quirks.pkce_required.then(PkcePair::generate);
		let authorize_url = build_authorize_url(descriptor, client_id, &state, pkce.as_ref());

		Self {
			scope: descriptor.scopes.clone(),
			state,
			redirect_uri: descriptor.redirect_uri.clone(),
			authorize_url,
			pkce,
		}
	}

	/// PKCE code challenge, when PKCE is in use.
	pub fn code_challenge(&self) -> Option<&str> {
		self.pkce.as_ref().map(|pkce| pkce.challenge.as_str())
	}

	/// PKCE challenge method, when PKCE is in use.
	pub fn code_challenge_method(&self) -> Option<PkceCodeChallengeMethod> {
		self.pkce.as_ref().map(|pkce| pkce.method)
	}

	/// Validates the returned `state` parameter after the authorization redirect.
	pub fn validate_state(&self, returned_state: &str) -> Result<()> {
		if returned_state == self.state {
			Ok(())
		} else {
			Err(Error::InvalidGrant { reason: "Authorization state mismatch.".into() })
		}
	}

	pub(crate) fn pkce_verifier(&self) -> Option<&str> {
		self.pkce.as_ref().map(|pkce| pkce.verifier.as_str())
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("scope", &self.scope)
			.field("state", &self.state)
			.field("redirect_uri", &self.redirect_uri)
			.field("authorize_url", &self.authorize_url)
			.field("code_challenge", &self.code_challenge())
			.finish()
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}

impl CredentialManager {
	/// Runs interactive authorization unconditionally and installs the resulting credential.
	pub async fn authorize(&self) -> Result<Arc<Credential>> {
		let _writer = self.writer.lock().await;

		self.authorize_locked().await
	}

	pub(super) async fn authorize_locked(&self) -> Result<Arc<Credential>> {
		const KIND: FlowKind = FlowKind::Authorization;

		let span = FlowSpan::new(KIND, "authorize");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.authorization_metrics.started();

		let result = span
			.instrument(async {
				let _activity = self.begin(KIND);
				let session =
					AuthorizationSession::start(&self.descriptor, &self.secrets.client_id);

				tracing::info!(
					authorize_url = %session.authorize_url,
					"Interactive authorization required."
				);

				let grant = self.prompt.authorize(&session).await?;

				session.validate_state(&grant.state)?;

				let credential = self
					.token_client
					.exchange_code(&grant.code, session.pkce_verifier(), grant.scope.as_deref())
					.await?;

				if !credential.granted_scope.covers(&self.descriptor.scopes) {
					tracing::warn!(
						granted = %credential.granted_scope,
						requested = %self.descriptor.scopes,
						"User granted fewer scopes than requested."
					);
				}

				self.install(credential).await
			})
			.await;

		self.authorization_metrics.finished(&result);
		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}
}

fn build_authorize_url(
	descriptor: &ProviderDescriptor,
	client_id: &str,
	state: &str,
	pkce: Option<&PkcePair>,
) -> Url {
	let mut url = descriptor.endpoints.authorization.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("client_id", client_id);
	pairs.append_pair("redirect_uri", descriptor.redirect_uri.as_str());
	pairs.append_pair("response_type", "code");

	for (key, value) in &descriptor.extra_authorize_params {
		pairs.append_pair(key, value);
	}

	if !descriptor.scopes.is_empty() {
		pairs.append_pair("scope", &descriptor.scope_param());
	}

	pairs.append_pair("state", state);

	if let Some(pkce) = pkce {
		pairs.append_pair("code_challenge", &pkce.challenge);
		pairs.append_pair("code_challenge_method", pkce.method.as_str());
	}

	drop(pairs);

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::*;

	fn query(url: &Url) -> HashMap<String, String> {
		url.query_pairs().into_owned().collect()
	}

	#[test]
	fn authorize_url_carries_scope_state_and_extra_params() {
		let descriptor = ProviderDescriptor::builder()
			.authorization_endpoint(
				Url::parse("https://www.example.com/oauth/authorize").expect("URL should parse."),
			)
			.token_endpoint(
				Url::parse("https://www.example.com/oauth/token").expect("URL should parse."),
			)
			.redirect_uri(
				Url::parse("http://localhost:8000/exchange_token").expect("URL should parse."),
			)
			.scopes(ScopeSet::new(["read", "activity:read"]).expect("Scopes should parse."))
			.scope_delimiter(',')
			.authorize_param("approval_prompt", "force")
			.build()
			.expect("Descriptor should build.");
		let session = AuthorizationSession::start(&descriptor, TEST_CLIENT_ID);
		let params = query(&session.authorize_url);

		assert_eq!(params["client_id"], TEST_CLIENT_ID);
		assert_eq!(params["redirect_uri"], "http://localhost:8000/exchange_token");
		assert_eq!(params["response_type"], "code");
		assert_eq!(params["approval_prompt"], "force");
		assert_eq!(params["scope"], "activity:read,read");
		assert_eq!(params["state"], session.state);
		assert_eq!(session.state.len(), STATE_LEN);
		assert!(!params.contains_key("code_challenge"));
		assert!(session.pkce_verifier().is_none());
	}

	#[test]
	fn pkce_is_added_when_required() {
		let mut descriptor = test_descriptor("https://www.example.com");

		descriptor.quirks.pkce_required = true;

		let session = AuthorizationSession::start(&descriptor, TEST_CLIENT_ID);
		let params = query(&session.authorize_url);
		let verifier = session.pkce_verifier().expect("PKCE verifier should exist.");

		assert_eq!(params["code_challenge_method"], "S256");
		assert_eq!(params["code_challenge"], compute_pkce_challenge(verifier));
		assert_eq!(session.code_challenge_method(), Some(PkceCodeChallengeMethod::S256));
	}

	#[test]
	fn state_validation_errors_on_mismatch() {
		let descriptor = test_descriptor("https://www.example.com");
		let session = AuthorizationSession::start(&descriptor, TEST_CLIENT_ID);
		let expected = session.state.clone();

		assert!(session.validate_state(&expected).is_ok());

		let err = session.validate_state("other").expect_err("State mismatch should fail.");

		assert!(matches!(err, Error::InvalidGrant { .. }));
	}
}
