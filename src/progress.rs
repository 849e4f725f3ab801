use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{remove_if_exists, write_atomic};

/// Last attempted listing page. Written before the page is fetched, so a
/// restart re-processes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub subject: u32,
    pub page: u32,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            subject: 1,
            page: 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProgressFile {
    path: PathBuf,
}

impl ProgressFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// An unreadable checkpoint counts as none; the crawl restarts from the
    /// first page and the seen set skips what is already stored.
    pub fn load(&self) -> Result<Option<Progress>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match parse_progress(&contents, &self.path) {
                Ok(progress) => Ok(progress),
                Err(err) => {
                    warn!("ignoring checkpoint: {err:#}");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to read progress file at {}", self.path.display())),
        }
    }

    pub fn save(&self, progress: Progress) -> Result<()> {
        let contents = serde_json::to_string(&progress)?;
        write_atomic(&self.path, contents.as_bytes())
            .with_context(|| format!("Failed to write progress file at {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<bool> {
        Ok(remove_if_exists(&self.path)?)
    }
}

fn parse_progress(contents: &str, path: &Path) -> Result<Option<Progress>> {
    if contents.trim().is_empty() {
        return Ok(None);
    }
    let progress = serde_json::from_str(contents)
        .with_context(|| format!("Failed to parse progress file at {}", path.display()))?;
    Ok(Some(progress))
}
