use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use fleet_core::config::StorageConfig;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::StorageError;
use crate::{Meta, StorageSpec};

const DATA_FILE: &str = "data";
const META_FILE: &str = "meta";
const TMP_SUFFIX: &str = "_tmp";

/// Artifact store on the local filesystem.
///
/// An object at `/jobs/abc` is the directory `{root_dir}/jobs/abc` holding a
/// `data` and a `meta` file; a directory missing either is not an object.
/// Every file is written to a `_tmp` sibling, fsynced, then renamed into place.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root_dir: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root_dir = root_dir.into();
        if !root_dir.is_absolute() {
            return Err(StorageError::RelativeRoot(root_dir.display().to_string()));
        }
        info!(root = %root_dir.display(), "filesystem storage ready");
        Ok(Self { root_dir })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::new(&config.root_dir)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Path segments of `uri` below the root. `..` and non-UTF-8 segments are rejected.
    fn segments(uri: &str) -> Result<Vec<&str>, StorageError> {
        let mut parts = Vec::new();
        for component in Path::new(uri).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => parts.push(
                    part.to_str()
                        .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?,
                ),
                _ => return Err(StorageError::InvalidUri(uri.to_string())),
            }
        }
        Ok(parts)
    }

    fn dir_path(&self, uri: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root_dir.clone();
        path.extend(Self::segments(uri)?);
        Ok(path)
    }

    /// Like `dir_path`, but the root itself cannot be an object.
    fn object_path(&self, uri: &str) -> Result<PathBuf, StorageError> {
        if Self::segments(uri)?.is_empty() {
            return Err(StorageError::InvalidUri(uri.to_string()));
        }
        self.dir_path(uri)
    }

    fn existing_object(&self, uri: &str) -> Result<PathBuf, StorageError> {
        let path = self.object_path(uri)?;
        if !is_object(&path) {
            return Err(StorageError::NotFound(uri.to_string()));
        }
        Ok(path)
    }

    fn write_meta(object_dir: &Path, meta: &Meta) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(meta)?;
        write_atomic(&object_dir.join(META_FILE), &bytes)
    }

    fn read_meta(uri: &str, object_dir: &Path) -> Result<Meta, StorageError> {
        let bytes = fs::read(object_dir.join(META_FILE))?;
        match serde_json::from_slice(&bytes)? {
            serde_json::Value::Object(meta) => Ok(meta),
            _ => Err(StorageError::InvalidMeta(uri.to_string())),
        }
    }
}

fn is_object(path: &Path) -> bool {
    path.is_dir() && path.join(DATA_FILE).is_file() && path.join(META_FILE).is_file()
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = with_suffix(path, TMP_SUFFIX);
    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(content)?;
        file.flush()?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

impl StorageSpec for FilesystemStorage {
    fn create_object(
        &self,
        uri: &str,
        data: &[u8],
        meta: &Meta,
        overwrite_existing: bool,
    ) -> Result<(), StorageError> {
        let full = self.object_path(uri)?;
        let exists = is_object(&full);
        if exists && !overwrite_existing {
            return Err(StorageError::AlreadyExists(uri.to_string()));
        }

        let segments = Self::segments(uri)?;
        for depth in 1..segments.len() {
            let mut parent = self.root_dir.clone();
            parent.extend(&segments[..depth]);
            if is_object(&parent) {
                return Err(StorageError::InsideObject {
                    uri: uri.to_string(),
                    parent: format!("/{}", segments[..depth].join("/")),
                });
            }
        }

        if !exists && full.is_dir() && fs::read_dir(&full)?.next().is_some() {
            return Err(StorageError::NonEmptyDirectory(uri.to_string()));
        }

        // Data is staged until meta is on disk; an object only counts once both exist.
        let data_path = full.join(DATA_FILE);
        let staged = with_suffix(&data_path, TMP_SUFFIX);
        write_atomic(&staged, data)?;
        if let Err(e) = Self::write_meta(&full, meta) {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }
        fs::rename(&staged, &data_path)?;

        debug!(uri = %uri, bytes = data.len(), "created object");
        Ok(())
    }

    fn update_meta(&self, uri: &str, meta: &Meta, replace: bool) -> Result<(), StorageError> {
        let full = self.existing_object(uri)?;

        if replace {
            Self::write_meta(&full, meta)?;
        } else {
            let mut merged = Self::read_meta(uri, &full)?;
            for (key, value) in meta {
                merged.insert(key.clone(), value.clone());
            }
            Self::write_meta(&full, &merged)?;
        }

        debug!(uri = %uri, replace, "updated meta");
        Ok(())
    }

    fn update_data(&self, uri: &str, data: &[u8]) -> Result<(), StorageError> {
        let full = self.existing_object(uri)?;
        write_atomic(&full.join(DATA_FILE), data)?;
        debug!(uri = %uri, bytes = data.len(), "updated data");
        Ok(())
    }

    fn list_objects(&self, dir_path: &str) -> Result<Vec<String>, StorageError> {
        let full = self.dir_path(dir_path)?;
        if !full.is_dir() {
            return Err(StorageError::DirectoryNotFound(dir_path.to_string()));
        }

        let base = dir_path.trim_end_matches('/');
        let mut objects = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            if !is_object(&entry.path()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                objects.push(format!("{base}/{name}"));
            }
        }

        objects.sort();
        Ok(objects)
    }

    fn get_meta(&self, uri: &str) -> Result<Meta, StorageError> {
        let full = self.existing_object(uri)?;
        Self::read_meta(uri, &full)
    }

    fn get_data(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.existing_object(uri)?;
        Ok(fs::read(full.join(DATA_FILE))?)
    }

    fn delete_object(&self, uri: &str) -> Result<(), StorageError> {
        let full = self.existing_object(uri)?;
        fs::remove_dir_all(&full)?;
        debug!(uri = %uri, "deleted object");
        Ok(())
    }

    fn finalize(&self) -> Result<(), StorageError> {
        let mut pruned = 0usize;
        for entry in WalkDir::new(&self.root_dir)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            // Non-empty directories fail to remove and are left alone.
            if entry.file_type().is_dir() && fs::remove_dir(entry.path()).is_ok() {
                pruned += 1;
            }
        }
        debug!(pruned, "finalized storage");
        Ok(())
    }
}
