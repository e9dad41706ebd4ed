//! Session counter ("N번째 호흡").
//!
//! A single integer stored as TOML under the data directory. Reading never
//! fails: a missing or unreadable file counts as zero.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    manpa_breath_count: u64,
}

/// Persistent count of started sessions
pub struct SessionCounter {
    path: PathBuf,
    count: u64,
}

impl SessionCounter {
    /// Load from the default location
    pub fn load() -> Self {
        Self::load_from(Self::state_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        let count = read_count(&path);
        Self { path, count }
    }

    pub fn state_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("manpa")
            .join("state.toml")
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count one more session and persist it.
    /// The in-memory count advances even when the write fails.
    pub fn increment(&mut self) -> u64 {
        self.count += 1;
        if let Err(e) = self.save() {
            log::warn!("session counter not saved to {}: {}", self.path.display(), e);
        }
        self.count
    }

    pub fn reset(&mut self) -> Result<()> {
        self.count = 0;
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string(&State {
            manpa_breath_count: self.count,
        })?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

fn read_count(path: &Path) -> u64 {
    let Ok(text) = fs::read_to_string(path) else {
        return 0;
    };
    match toml::from_str::<State>(&text) {
        Ok(state) => state.manpa_breath_count,
        Err(e) => {
            log::warn!("ignoring unreadable session state {}: {}", path.display(), e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let counter = SessionCounter::load_from(dir.path().join("state.toml"));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn increment_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");

        let mut counter = SessionCounter::load_from(path.clone());
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);

        let reloaded = SessionCounter::load_from(path.clone());
        assert_eq!(reloaded.count(), 2);
        assert!(fs::read_to_string(&path).unwrap().contains("manpa_breath_count = 2"));
    }

    #[test]
    fn garbage_state_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "manpa_breath_count = \"lots\"").unwrap();
        assert_eq!(SessionCounter::load_from(path).count(), 0);
    }

    #[test]
    fn reset_writes_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        let mut counter = SessionCounter::load_from(path.clone());
        counter.increment();
        counter.reset().unwrap();
        assert_eq!(SessionCounter::load_from(path).count(), 0);
    }
}
