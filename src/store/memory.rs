//! In-memory [`CredentialStore`] for tests and short-lived sessions.

// self
use crate::{
	_prelude::*,
	store::{CredentialStore, SecretsDocument, StoreFuture},
};

/// Keeps the secrets document in-process and counts saves.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
	document: Arc<RwLock<Option<SecretsDocument>>>,
	saves: Arc<RwLock<u64>>,
}
impl MemoryStore {
	/// Current document without going through the async contract.
	pub fn snapshot(&self) -> Option<SecretsDocument> {
		self.document.read().clone()
	}

	/// Number of completed saves.
	pub fn save_count(&self) -> u64 {
		*self.saves.read()
	}
}
impl CredentialStore for MemoryStore {
	fn load(&self) -> StoreFuture<'_, Option<SecretsDocument>> {
		let document = self.document.clone();

		Box::pin(async move { Ok(document.read().clone()) })
	}

	fn save(&self, document: SecretsDocument) -> StoreFuture<'_, ()> {
		let slot = self.document.clone();
		let saves = self.saves.clone();

		Box::pin(async move {
			*slot.write() = Some(document);
			*saves.write() += 1;

			Ok(())
		})
	}
}
