//! Artifact store for submitted jobs.
//!
//! Objects live under URIs like `/jobs/abc` and consist of an opaque `data`
//! blob plus a JSON `meta` object. [`FilesystemStorage`] maps each object to a
//! directory holding a `data` and a `meta` file.

pub mod error;
pub mod filesystem;

pub use error::StorageError;
pub use filesystem::FilesystemStorage;

/// Object metadata: always a JSON object.
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Operations every artifact store backend provides.
pub trait StorageSpec: Send + Sync {
    /// Create an object, or replace it when `overwrite_existing` is set.
    fn create_object(
        &self,
        uri: &str,
        data: &[u8],
        meta: &Meta,
        overwrite_existing: bool,
    ) -> Result<(), StorageError>;

    /// Replace the object's meta, or merge `meta` into it when `replace` is false.
    fn update_meta(&self, uri: &str, meta: &Meta, replace: bool) -> Result<(), StorageError>;

    fn update_data(&self, uri: &str, data: &[u8]) -> Result<(), StorageError>;

    /// URIs of the objects directly under `dir_path`, sorted.
    fn list_objects(&self, dir_path: &str) -> Result<Vec<String>, StorageError>;

    fn get_meta(&self, uri: &str) -> Result<Meta, StorageError>;

    fn get_data(&self, uri: &str) -> Result<Vec<u8>, StorageError>;

    fn get_detail(&self, uri: &str) -> Result<(Meta, Vec<u8>), StorageError> {
        Ok((self.get_meta(uri)?, self.get_data(uri)?))
    }

    /// Remove an object and everything below it.
    fn delete_object(&self, uri: &str) -> Result<(), StorageError>;

    /// Prune empty directories left behind by deleted objects.
    fn finalize(&self) -> Result<(), StorageError>;
}
