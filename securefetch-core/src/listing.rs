//! Directory listing for the `ls` operation

use crate::error::{Error, Result};
use std::path::Path;

const DIR_TAG: &str = "<dir>";

/// One entry of the served directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes; `None` for directories
    pub size: Option<u64>,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size: Some(size),
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: None,
        }
    }

    /// Wire form: `<name>\t<size>` or `<name>\t<dir>`
    pub fn to_line(&self) -> String {
        match (self.is_dir, self.size) {
            (false, Some(size)) => format!("{}\t{}", self.name, size),
            _ => format!("{}\t{}", self.name, DIR_TAG),
        }
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let (name, tail) = line
            .rsplit_once('\t')
            .ok_or_else(|| Error::Protocol(format!("Malformed directory entry: {:?}", line)))?;
        if name.is_empty() {
            return Err(Error::Protocol("Directory entry without a name".to_string()));
        }

        if tail == DIR_TAG {
            return Ok(Self::directory(name));
        }
        let size = tail
            .parse()
            .map_err(|_| Error::Protocol(format!("Malformed entry size: {:?}", tail)))?;
        Ok(Self::file(name, size))
    }
}

/// List `root` in directory-iteration order.
///
/// Entries whose metadata cannot be read are skipped and logged; only a
/// failure to open the directory itself is an error.
pub async fn list(root: &Path) -> Result<Vec<DirectoryEntry>> {
    let mut dir = tokio::fs::read_dir(root).await.map_err(Error::File)?;
    let mut entries = Vec::new();

    while let Some(entry) = dir.next_entry().await.map_err(Error::File)? {
        let name = entry.file_name().to_string_lossy().into_owned();

        // Follow symlinks like stat(2)
        let metadata = match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(entry = %name, error = %e, "stat failed, skipping entry");
                continue;
            }
        };

        if metadata.is_dir() {
            entries.push(DirectoryEntry::directory(name));
        } else {
            entries.push(DirectoryEntry::file(name, metadata.len()));
        }
    }

    Ok(entries)
}
