//! The artifact store capability: a narrow put/get/delete/exists/list
//! interface the core depends on instead of a concrete cloud blob client or
//! database. `FsArtifactStore` is the local reference backend used by the
//! CLI and the test suite; a production deployment would satisfy the same
//! trait against its own cloud image host.

use crate::error::{Result, WatermarkError};
use std::fs;
use std::path::{Path, PathBuf};

/// Injected capability the core depends on for persisting and reading back
/// bytes by opaque locator. The core never parses a locator's structure.
pub trait ArtifactStore {
    fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<String>;
    fn get_bytes(&self, locator: &str) -> Result<Vec<u8>>;
    fn delete(&self, locator: &str) -> Result<bool>;
    fn exists(&self, locator: &str) -> bool;
    /// Lists `(locator, stem)` pairs directly under `directory`.
    fn list(&self, directory: &str) -> Result<Vec<(String, String)>>;
}

/// A directory-rooted `ArtifactStore` backed by `std::fs`. Locators are
/// paths relative to the store's root.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        self.root.join(locator)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(key.to_string())
    }

    fn get_bytes(&self, locator: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(locator)).map_err(|e| {
            WatermarkError::Io(format!("reading artifact '{locator}': {e}"))
        })
    }

    fn delete(&self, locator: &str) -> Result<bool> {
        let path = self.resolve(locator);
        if path.exists() {
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn exists(&self, locator: &str) -> bool {
        self.resolve(locator).exists()
    }

    fn list(&self, directory: &str) -> Result<Vec<(String, String)>> {
        let dir = self.resolve(directory);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let locator = path
                    .strip_prefix(&self.root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                out.push((locator, stem));
            }
        }
        Ok(out)
    }
}
