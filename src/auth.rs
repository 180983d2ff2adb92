//! OAuth credential model: scope sets, redacted secrets, and the immutable credential snapshot.

pub mod credential;
pub mod scope;
pub mod secret;

pub use credential::*;
pub use scope::*;
pub use secret::*;
