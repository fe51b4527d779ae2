//! Flat JSON result store: one `run_<name>.json` per strategy name.
//!
//! Saving the same name again replaces the previous record. Writes go to a
//! temporary file in the same directory and are renamed into place, so a
//! reader never observes a half-written record. Concurrent writers of the
//! same name still race; the last rename wins.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::types::ResultRecord;

const PREFIX: &str = "run_";
const SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

/// File-name-safe form of a strategy name.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ResultStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}{}", PREFIX, sanitize(name), SUFFIX))
    }

    /// Persist a record under its config name, replacing any previous one.
    pub fn save(&self, record: &ResultRecord) -> Result<PathBuf> {
        let path = self.path_for(record.name());
        let tmp = self.dir.join(format!(
            ".{}{}.{}.tmp",
            PREFIX,
            sanitize(record.name()),
            std::process::id()
        ));

        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, content)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(path = %path.display(), "saved result record");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Option<ResultRecord>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Every readable record, ordered by file name. Unparseable files are skipped.
    pub fn load_all(&self) -> Result<Vec<ResultRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(SUFFIX))
            })
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<ResultRecord>(&s).map_err(|e| e.to_string()));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable result record"),
            }
        }
        Ok(records)
    }
}
