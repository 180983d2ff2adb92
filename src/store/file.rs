//! JSON file-backed [`CredentialStore`].

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{CredentialStore, SecretsDocument, StoreError, StoreFuture},
};

/// Persists the secrets document to a JSON file, replacing it atomically on every save.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Option<SecretsDocument>>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the secrets file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Option<SecretsDocument>, StoreError> {
		if !path.exists() {
			return Ok(None);
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.iter().all(u8::is_ascii_whitespace) {
			return Ok(None);
		}

		let mut de = serde_json::Deserializer::from_slice(&bytes);

		serde_path_to_error::deserialize(&mut de).map(Some).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {} at {}: {}", path.display(), e.path(), e.inner()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist(&self, document: &SecretsDocument) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(document).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize secrets document: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CredentialStore for FileStore {
	fn load(&self) -> StoreFuture<'_, Option<SecretsDocument>> {
		Box::pin(async move { Ok(self.inner.read().clone()) })
	}

	fn save(&self, document: SecretsDocument) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			self.persist(&document)?;
			*guard = Some(document);

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::store::ClientSecrets;

	#[test]
	fn save_and_reload_round_trip() {
		let dir = tempfile::tempdir().expect("Failed to create temporary directory.");
		let path = dir.path().join("nested").join("secrets.json");
		let store = FileStore::open(&path).expect("Failed to open file store.");
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let document = SecretsDocument::new(ClientSecrets::new("client", "secret"), None);

		assert_eq!(rt.block_on(store.load()).expect("Empty store should load."), None);

		rt.block_on(store.save(document.clone())).expect("Failed to save secrets document.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store.");
		let loaded = rt
			.block_on(reopened.load())
			.expect("Failed to load secrets document.")
			.expect("File store lost the document after reopen.");

		assert_eq!(loaded, document);
		assert!(!path.with_extension("tmp").exists());
	}

	#[test]
	fn malformed_files_report_the_failing_field() {
		let dir = tempfile::tempdir().expect("Failed to create temporary directory.");
		let path = dir.path().join("secrets.json");

		fs::write(&path, "{\"client_id\":\"id\",\"expires_at\":\"soon\"}")
			.expect("Failed to write malformed fixture.");

		let err = FileStore::open(&path).expect_err("Malformed document must be rejected.");

		assert!(matches!(
			&err,
			StoreError::Serialization { message } if message.contains("expires_at")
		));
	}
}
