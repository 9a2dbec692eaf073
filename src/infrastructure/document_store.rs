//! On-disk storage for rendered documents
//!
//! Documents are named deterministically from the job id, so a row's
//! `document_ref` always points at a predictable file. A document is first
//! written to a temporary file in the same directory and only renamed to its
//! final name when the owning status write is ready to commit.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DocumentStore {
    dir: PathBuf,
    prefix: &'static str,
}

/// A fully written document that is not yet visible under its final name
#[derive(Debug)]
pub struct StagedDocument {
    file: NamedTempFile,
    target: PathBuf,
    name: String,
}

impl StagedDocument {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Atomically renames the temporary file to the final document name
    pub fn publish(self) -> Result<()> {
        let target = self.target;
        self.file
            .persist(&target)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to move document into place at {}", target.display()))?;
        debug!(path = %target.display(), "Published document");
        Ok(())
    }
}

impl DocumentStore {
    /// Opens the document directory, creating it if missing
    pub fn open(dir: impl Into<PathBuf>, prefix: &'static str) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create document directory {}", dir.display()))?;
        Ok(Self { dir, prefix })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn document_name(&self, id: i64) -> String {
        format!("{}_{id}.html", self.prefix)
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Writes `content` to a temporary file next to its final location.
    /// Dropping the returned value without publishing removes the file.
    pub fn stage(&self, id: i64, content: &str) -> Result<StagedDocument> {
        let name = self.document_name(id);
        let mut file = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .with_context(|| format!("Failed to create temporary file in {}", self.dir.display()))?;

        file.write_all(content.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .with_context(|| format!("Failed to write document {name}"))?;

        Ok(StagedDocument {
            file,
            target: self.path_of(&name),
            name,
        })
    }

    /// Reads a published document; `None` when the file does not exist
    pub async fn read(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_of(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read document {}", path.display())),
        }
    }
}
