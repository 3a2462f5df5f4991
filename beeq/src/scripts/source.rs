//! Script sources
//!
//! A source lists and reads raw script files. The registry only depends on
//! this trait, so tests can swap the filesystem out.

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Somewhere script files can be listed and read from
#[async_trait]
pub trait ScriptSource: Send + Sync + 'static {
    /// List entry names (file names, not paths)
    async fn list(&self) -> Result<Vec<String>>;

    /// Read the full text of one entry
    async fn read(&self, entry: &str) -> Result<String>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Scripts stored as files in a directory
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    /// Create a source over the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory scripts are read from
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ScriptSource for DirSource {
    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::script_load(&self.dir, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::script_load(&self.dir, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn read(&self, entry: &str) -> Result<String> {
        let path = self.dir.join(entry);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::script_load(path, e))
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Scripts held in memory, keyed by file name
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: BTreeMap<String, String>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file
    #[must_use]
    pub fn with_file(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.insert(name.into(), source.into());
        self
    }
}

#[async_trait]
impl ScriptSource for MemorySource {
    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    async fn read(&self, entry: &str) -> Result<String> {
        self.files.get(entry).cloned().ok_or_else(|| {
            Error::script_load(
                entry,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such script"),
            )
        })
    }

    fn describe(&self) -> String {
        format!("memory ({} files)", self.files.len())
    }
}
