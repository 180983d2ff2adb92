//! Provider descriptor data structures shared by the credential flows.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Provider-specific quirk toggles.
pub mod quirks;

pub use builder::*;
pub use quirks::*;

// self
use crate::{_prelude::*, auth::ScopeSet};

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint the user is sent to.
	pub authorization: Url,
	/// Token endpoint used for code exchanges and refreshes.
	pub token: Url,
}

/// Immutable provider descriptor consumed by flows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Loopback redirect registered with the provider.
	pub redirect_uri: Url,
	/// Scope requested during authorization.
	pub scopes: ScopeSet,
	/// Additional query parameters appended to the authorize URL.
	pub extra_authorize_params: Vec<(String, String)>,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptor {
	/// Creates a new builder.
	pub fn builder() -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::default()
	}

	/// Scope joined with the provider's delimiter, as sent on the wire.
	pub fn scope_param(&self) -> String {
		self.scopes.join(self.quirks.scope_delimiter)
	}

	/// Parses a scope string returned by the provider using its delimiter.
	pub fn parse_scope(&self, raw: &str) -> Result<ScopeSet, crate::auth::ScopeValidationError> {
		ScopeSet::parse_delimited(raw, self.quirks.scope_delimiter)
	}
}
