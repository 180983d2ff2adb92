//! Crate-level error types shared by the cache, governor, credential flows, and gateway.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Request cache failure (query execution, schema, encoding).
	#[error(transparent)]
	Cache(#[from] crate::cache::CacheError),
	/// Secrets file failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Response body could not be decoded as JSON.
	#[error("Response body is not valid JSON.")]
	Decode(#[source] serde_json::Error),

	/// The API answered 429 and retries are disabled or exhausted.
	#[error("Rate limit exceeded after {attempts} attempt(s).")]
	RateLimitExceeded {
		/// Number of network attempts made before giving up.
		attempts: u32,
	},
	/// The API answered with a status other than 200 or 429.
	#[error("Request failed with status {status}: {body}.")]
	RequestFailed {
		/// HTTP status code.
		status: u16,
		/// Raw response body.
		body: String,
	},
	/// Interactive authorization is required but cannot run in this context.
	#[error("Interactive authorization is required: {reason}.")]
	AuthorizationRequired {
		/// Why the authorization step could not proceed.
		reason: String,
	},
	/// Provider rejected the grant (e.g., bad code or refresh token).
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider- or client-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or client-supplied reason string.
		reason: String,
	},
	/// Token has been revoked and must not be reused.
	#[error("Token has been revoked.")]
	Revoked,
}
impl Error {
	/// Returns `true` when the provider refused the stored grant, meaning only a fresh
	/// interactive authorization can recover.
	pub fn is_grant_rejection(&self) -> bool {
		matches!(
			self,
			Self::InvalidGrant { .. }
				| Self::Revoked
				| Self::Config(ConfigError::MissingRefreshToken)
		)
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Provider descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Redirect URI cannot be parsed or bound.
	#[error("Redirect URI is invalid: {reason}.")]
	InvalidRedirect {
		/// Description of the problem.
		reason: String,
	},
	/// Route template still contains placeholders after substitution.
	#[error("Route `{route}` has unresolved parameters.")]
	UnresolvedRoute {
		/// Route after substitution.
		route: String,
	},
	/// Route could not be joined onto the API base URL.
	#[error("Route `{route}` cannot be joined onto the API base URL.")]
	InvalidRoute {
		/// Offending route.
		route: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A configured URL does not parse.
	#[error("Configured {field} is not a valid URL.")]
	InvalidUrl {
		/// Configuration key holding the URL.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Configuration file could not be read or parsed.
	#[error("Configuration file {path} is invalid: {message}.")]
	InvalidConfigFile {
		/// Path of the configuration file.
		path: String,
		/// Human-readable failure.
		message: String,
	},
	/// Secrets file has no client credentials.
	#[error("Secrets file does not contain client credentials.")]
	MissingClientSecrets,
	/// Cached credential is missing a refresh secret.
	#[error("Cached credential is missing a refresh token.")]
	MissingRefreshToken,
	/// Scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Credential builder validation failed.
	#[error("Unable to build credential.")]
	CredentialBuild(#[from] crate::auth::CredentialBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or client-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Endpoint or API URL being called.
		target: String,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(
		target: impl Into<String>,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Network { target: target.into(), source: Box::new(src) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn grant_rejections_are_classified() {
		assert!(Error::InvalidGrant { reason: "bad refresh token".into() }.is_grant_rejection());
		assert!(Error::Revoked.is_grant_rejection());
		assert!(Error::from(ConfigError::MissingRefreshToken).is_grant_rejection());
		assert!(!Error::RateLimitExceeded { attempts: 1 }.is_grant_rejection());
		assert!(
			!Error::from(TransientError::TokenEndpoint { message: "busy".into(), status: None })
				.is_grant_rejection()
		);
	}

	#[test]
	fn request_failure_message_carries_status_and_body() {
		let err = Error::RequestFailed { status: 404, body: "{\"message\":\"Not Found\"}".into() };

		assert_eq!(err.to_string(), "Request failed with status 404: {\"message\":\"Not Found\"}.");
	}
}
