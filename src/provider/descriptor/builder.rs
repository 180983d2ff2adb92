// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	provider::{ProviderDescriptor, ProviderEndpoints, ProviderQuirks},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint is required.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint is required.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Redirect URI is required.
	#[error("Missing redirect URI.")]
	MissingRedirectUri,
	/// Endpoints must use HTTPS unless insecure endpoints are allowed.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Redirect URIs must be absolute HTTP(S) URLs with a host and port the listener can bind.
	#[error("Redirect URI cannot be served locally: {url}.")]
	UnservableRedirect {
		/// Redirect URI that failed validation.
		url: String,
	},
	/// Reject scope delimiters that are control characters.
	#[error("Scope delimiter must be a printable character.")]
	InvalidScopeDelimiter {
		/// Invalid delimiter that was supplied.
		delimiter: char,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug, Default)]
pub struct ProviderDescriptorBuilder {
	/// Authorization endpoint.
	pub authorization_endpoint: Option<Url>,
	/// Token endpoint used for exchanges and refreshes.
	pub token_endpoint: Option<Url>,
	/// Loopback redirect URI.
	pub redirect_uri: Option<Url>,
	/// Requested scope.
	pub scopes: ScopeSet,
	/// Extra authorize parameters, in order.
	pub extra_authorize_params: Vec<(String, String)>,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptorBuilder {
	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the redirect URI.
	pub fn redirect_uri(mut self, url: Url) -> Self {
		self.redirect_uri = Some(url);

		self
	}

	/// Sets the requested scope.
	pub fn scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Sets the delimiter used to join scopes on the wire.
	pub fn scope_delimiter(mut self, delimiter: char) -> Self {
		self.quirks.scope_delimiter = delimiter;

		self
	}

	/// Appends an extra authorize parameter, e.g. `approval_prompt=force`.
	pub fn authorize_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra_authorize_params.push((key.into(), value.into()));

		self
	}

	/// Requires PKCE on the authorization request.
	pub fn pkce_required(mut self, required: bool) -> Self {
		self.quirks.pkce_required = required;

		self
	}

	/// Permits plain-HTTP endpoints.
	pub fn allow_insecure_endpoints(mut self, allow: bool) -> Self {
		self.quirks.allow_insecure_endpoints = allow;

		self
	}

	/// Overrides the provider quirks.
	pub fn quirks(mut self, quirks: ProviderQuirks) -> Self {
		self.quirks = quirks;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let redirect_uri = self.redirect_uri.ok_or(ProviderDescriptorError::MissingRedirectUri)?;
		let descriptor = ProviderDescriptor {
			endpoints: ProviderEndpoints { authorization, token },
			redirect_uri,
			scopes: self.scopes,
			extra_authorize_params: self.extra_authorize_params,
			quirks: self.quirks,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		let allow_insecure = self.quirks.allow_insecure_endpoints;

		validate_endpoint("authorization", &self.endpoints.authorization, allow_insecure)?;
		validate_endpoint("token", &self.endpoints.token, allow_insecure)?;
		validate_redirect(&self.redirect_uri)?;
		validate_scope_delimiter(self.quirks.scope_delimiter)?;

		Ok(())
	}
}

fn validate_endpoint(
	name: &'static str,
	url: &Url,
	allow_insecure: bool,
) -> Result<(), ProviderDescriptorError> {
	match url.scheme() {
		"https" => Ok(()),
		"http" if allow_insecure => Ok(()),
		_ =>
			Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() }),
	}
}

fn validate_redirect(url: &Url) -> Result<(), ProviderDescriptorError> {
	let servable = matches!(url.scheme(), "http" | "https")
		&& url.host_str().is_some()
		&& url.port_or_known_default().is_some();

	if servable {
		Ok(())
	} else {
		Err(ProviderDescriptorError::UnservableRedirect { url: url.to_string() })
	}
}

fn validate_scope_delimiter(delimiter: char) -> Result<(), ProviderDescriptorError> {
	if delimiter.is_control() {
		Err(ProviderDescriptorError::InvalidScopeDelimiter { delimiter })
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(raw: &str) -> Url {
		Url::parse(raw).expect("URL fixture should parse.")
	}

	fn builder() -> ProviderDescriptorBuilder {
		ProviderDescriptor::builder()
			.authorization_endpoint(url("https://www.example.com/oauth/authorize"))
			.token_endpoint(url("https://www.example.com/oauth/token"))
			.redirect_uri(url("http://localhost:8000/exchange_token"))
	}

	#[test]
	fn builds_with_delimiter_and_extra_params() {
		let descriptor = builder()
			.scopes(ScopeSet::from_str("read,activity:read").expect("Scopes should parse."))
			.scope_delimiter(',')
			.authorize_param("approval_prompt", "force")
			.build()
			.expect("Descriptor should build.");

		assert_eq!(descriptor.scope_param(), "activity:read,read");
		assert_eq!(
			descriptor.extra_authorize_params,
			vec![("approval_prompt".to_owned(), "force".to_owned())]
		);
		assert_eq!(
			descriptor.parse_scope("read,activity:read").expect("Scope should parse."),
			descriptor.scopes
		);
	}

	#[test]
	fn insecure_endpoints_need_opt_in() {
		let insecure = builder().token_endpoint(url("http://127.0.0.1:9000/oauth/token"));

		assert!(matches!(
			insecure.build(),
			Err(ProviderDescriptorError::InsecureEndpoint { endpoint: "token", .. })
		));

		let allowed = builder()
			.token_endpoint(url("http://127.0.0.1:9000/oauth/token"))
			.allow_insecure_endpoints(true)
			.build();

		assert!(allowed.is_ok());
	}

	#[test]
	fn redirect_and_delimiter_are_validated() {
		assert!(matches!(
			builder().redirect_uri(url("urn:ietf:wg:oauth:2.0:oob")).build(),
			Err(ProviderDescriptorError::UnservableRedirect { .. })
		));
		assert_eq!(
			builder().scope_delimiter('\n').build(),
			Err(ProviderDescriptorError::InvalidScopeDelimiter { delimiter: '\n' })
		);
		assert_eq!(
			ProviderDescriptor::builder().build(),
			Err(ProviderDescriptorError::MissingAuthorizationEndpoint)
		);
	}
}
