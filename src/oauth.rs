//! Token endpoint client built on the `oauth2` crate.
//!
//! [`TokenClient`] performs the two grants the credential manager needs (authorization code
//! exchange and refresh) and maps every failure onto the crate's [`Error`] taxonomy. The
//! HTTP status of the token response is captured through a [`ResponseMetadataSlot`] so
//! providers that answer a bad refresh token with a non-standard body are still classified
//! as grant rejections.

pub use oauth2;

// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, TokenResponse,
	TokenUrl,
	basic::{
		BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError,
		BasicTokenResponse,
	},
};
// self
use crate::{
	_prelude::*,
	auth::{Credential, ScopeSet, TokenSecret},
	error::{ConfigError, TransientError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
	provider::ProviderDescriptor,
	store::ClientSecrets,
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Grant performed against the token endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenGrant {
	/// `grant_type=authorization_code`.
	AuthorizationCode,
	/// `grant_type=refresh_token`.
	RefreshToken,
}
impl TokenGrant {
	/// Wire name of the grant.
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenGrant::AuthorizationCode => "authorization_code",
			TokenGrant::RefreshToken => "refresh_token",
		}
	}
}

/// Client credentials travel in the request body, which is what the providers this crate
/// targets accept.
pub(crate) struct TokenClient {
	oauth_client: ConfiguredBasicClient,
	http_client: ReqwestHttpClient,
	descriptor: ProviderDescriptor,
}
impl TokenClient {
	pub(crate) fn from_descriptor(
		descriptor: &ProviderDescriptor,
		secrets: &ClientSecrets,
		http_client: ReqwestHttpClient,
	) -> Result<Self> {
		let auth_url = AuthUrl::new(descriptor.endpoints.authorization.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let redirect_url = RedirectUrl::new(descriptor.redirect_uri.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let oauth_client = BasicClient::new(ClientId::new(secrets.client_id.clone()))
			.set_client_secret(ClientSecret::new(secrets.client_secret.expose().to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url)
			.set_redirect_uri(redirect_url)
			.set_auth_type(AuthType::RequestBody);

		Ok(Self { oauth_client, http_client, descriptor: descriptor.clone() })
	}

	/// Exchanges an authorization code for a credential.
	///
	/// `returned_scope` is the scope the redirect reported; it is used when the token
	/// response itself does not carry one.
	pub(crate) async fn exchange_code(
		&self,
		code: &str,
		pkce_verifier: Option<&str>,
		returned_scope: Option<&str>,
	) -> Result<Credential> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.instrumented(meta.clone());
		let mut request = self.oauth_client.exchange_code(AuthorizationCode::new(code.to_owned()));

		if let Some(verifier) = pkce_verifier {
			request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_owned()));
		}

		let response = request
			.request_async(&instrumented)
			.await
			.map_err(|e| map_request_error(TokenGrant::AuthorizationCode, meta.take(), e))?;
		let fallback = match returned_scope {
			Some(raw) => self.descriptor.parse_scope(raw).map_err(ConfigError::from)?,
			None => self.descriptor.scopes.clone(),
		};

		self.credential_from(response, fallback, None)
	}

	/// Redeems a refresh token. The previous refresh token is kept when the provider does
	/// not rotate it.
	pub(crate) async fn refresh(
		&self,
		refresh_token: &TokenSecret,
		previous_scope: &ScopeSet,
	) -> Result<Credential> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.instrumented(meta.clone());
		let secret = RefreshToken::new(refresh_token.expose().to_owned());
		let response = self
			.oauth_client
			.exchange_refresh_token(&secret)
			.request_async(&instrumented)
			.await
			.map_err(|e| map_request_error(TokenGrant::RefreshToken, meta.take(), e))?;

		self.credential_from(response, previous_scope.clone(), Some(refresh_token))
	}

	fn credential_from(
		&self,
		response: BasicTokenResponse,
		fallback_scope: ScopeSet,
		previous_refresh: Option<&TokenSecret>,
	) -> Result<Credential> {
		let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
		let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

		if expires_in <= 0 {
			return Err(ConfigError::NonPositiveExpiresIn.into());
		}

		let granted_scope = match response.scopes() {
			Some(scopes) => {
				let joined =
					scopes.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" ");

				self.descriptor.parse_scope(&joined).map_err(ConfigError::from)?
			},
			None => fallback_scope,
		};
		let refresh_token = response
			.refresh_token()
			.map(|token| TokenSecret::new(token.secret().to_owned()))
			.or_else(|| previous_refresh.cloned());

		Credential::builder()
			.access_token(response.access_token().secret().to_owned())
			.refresh_secret(refresh_token)
			.issued_at(OffsetDateTime::now_utc())
			.expires_in(Duration::seconds(expires_in))
			.granted_scope(granted_scope)
			.build()
			.map_err(|e| ConfigError::from(e).into())
	}
}
impl Debug for TokenClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenClient")
			.field("token_endpoint", &self.descriptor.endpoints.token.as_str())
			.finish()
	}
}

fn map_request_error(
	grant: TokenGrant,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> Error {
	let status = meta.as_ref().and_then(|value| value.status);

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(grant, response, status),
		RequestTokenError::Request(error) => map_transport_error(grant, status, error),
		RequestTokenError::Parse(error, body) => map_parse_error(grant, status, error, &body),
		RequestTokenError::Other(message) => TransientError::TokenEndpoint {
			message: format!("{} grant failed: {message}", grant.as_str()),
			status,
		}
		.into(),
	}
}

fn map_server_response_error(
	grant: TokenGrant,
	response: BasicErrorResponse,
	status: Option<u16>,
) -> Error {
	let message = match response.error_description() {
		Some(description) => description.clone(),
		None => response.error().as_ref().to_owned(),
	};

	tracing::warn!(
		grant = grant.as_str(),
		?status,
		error = response.error().as_ref(),
		"Token endpoint rejected the request."
	);

	match response.error() {
		BasicErrorResponseType::InvalidGrant => Error::InvalidGrant { reason: message },
		BasicErrorResponseType::InvalidClient | BasicErrorResponseType::UnauthorizedClient =>
			Error::InvalidClient { reason: message },
		_ => TransientError::TokenEndpoint { message, status }.into(),
	}
}

// Some providers answer a rejected grant with a provider-specific JSON body that does not
// follow RFC 6749 error responses, so the status decides.
fn map_parse_error(
	grant: TokenGrant,
	status: Option<u16>,
	error: serde_path_to_error::Error<serde_json::Error>,
	body: &[u8],
) -> Error {
	let body = String::from_utf8_lossy(body);

	match status {
		Some(400) => Error::InvalidGrant { reason: format!("{} rejected: {body}", grant.as_str()) },
		Some(401 | 403) =>
			Error::InvalidClient { reason: format!("{} rejected: {body}", grant.as_str()) },
		_ => TransientError::TokenResponseParse { source: error }.into(),
	}
}

fn map_transport_error(
	grant: TokenGrant,
	status: Option<u16>,
	err: HttpClientError<ReqwestError>,
) -> Error {
	match err {
		HttpClientError::Reqwest(inner) => {
			let inner = *inner;

			if inner.is_builder() {
				ConfigError::from(inner).into()
			} else {
				let target = inner.url().map(|url| url.to_string()).unwrap_or_default();

				TransportError::network(target, inner).into()
			}
		},
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::TokenEndpoint {
			message: format!("{} grant failed in the HTTP client: {message}", grant.as_str()),
			status,
		}
		.into(),
		_ => TransientError::TokenEndpoint {
			message: format!("{} grant failed in the HTTP client", grant.as_str()),
			status,
		}
		.into(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn descriptor() -> ProviderDescriptor {
		crate::_preludet::test_descriptor("https://www.example.com")
	}

	#[test]
	fn builds_request_body_client() {
		let secrets = ClientSecrets::new("client-id", "secret");
		let client =
			TokenClient::from_descriptor(&descriptor(), &secrets, ReqwestHttpClient::default())
				.expect("Token client should build from a valid descriptor.");

		assert!(format!("{client:?}").contains("/oauth/token"));
		assert!(!format!("{client:?}").contains("secret"));
	}

	#[test]
	fn parse_failures_are_classified_by_status() {
		let parse_error = || {
			let mut deserializer =
				serde_json::Deserializer::from_str("{\"message\":\"Bad Request\"}");

			serde_path_to_error::deserialize::<_, BasicTokenResponse>(&mut deserializer)
				.expect_err("Body without access_token should fail to parse.")
		};
		let body = b"{\"message\":\"Bad Request\"}";

		assert!(matches!(
			map_parse_error(TokenGrant::RefreshToken, Some(400), parse_error(), body),
			Error::InvalidGrant { .. }
		));
		assert!(matches!(
			map_parse_error(TokenGrant::RefreshToken, Some(401), parse_error(), body),
			Error::InvalidClient { .. }
		));
		assert!(matches!(
			map_parse_error(TokenGrant::RefreshToken, Some(200), parse_error(), body),
			Error::Transient(TransientError::TokenResponseParse { .. })
		));
	}

	#[test]
	fn server_errors_follow_the_oauth_error_code() {
		let response = |kind| BasicErrorResponse::new(kind, Some("nope".into()), None);

		assert!(matches!(
			map_server_response_error(
				TokenGrant::RefreshToken,
				response(BasicErrorResponseType::InvalidGrant),
				Some(400)
			),
			Error::InvalidGrant { reason } if reason == "nope"
		));
		assert!(matches!(
			map_server_response_error(
				TokenGrant::AuthorizationCode,
				response(BasicErrorResponseType::UnauthorizedClient),
				Some(400)
			),
			Error::InvalidClient { .. }
		));
		assert!(matches!(
			map_server_response_error(
				TokenGrant::AuthorizationCode,
				response(BasicErrorResponseType::InvalidScope),
				Some(400)
			),
			Error::Transient(TransientError::TokenEndpoint { status: Some(400), .. })
		));
	}
}
