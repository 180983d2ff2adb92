//! Validated metadata describing the remote OAuth provider.
//!
//! [`ProviderDescriptor`] covers the authorize/token endpoints, the loopback redirect, the
//! requested scope, and the quirks that differ between vendors: the scope delimiter, extra
//! authorize parameters such as `approval_prompt=force`, and whether PKCE is mandatory.

pub mod descriptor;

pub use descriptor::*;
