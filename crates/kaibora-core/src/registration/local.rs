use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Storage file name in the data directory
const STORAGE_FILE: &str = "local_storage.json";

/// Persistent string key-value store, written through on every change.
pub struct LocalStorage {
    dir: PathBuf,
    values: BTreeMap<String, String>,
}

impl LocalStorage {
    /// Open the store in `dir`, loading existing values if any.
    pub fn open(dir: PathBuf) -> Result<Self> {
        let mut storage = Self {
            dir,
            values: BTreeMap::new(),
        };
        let path = storage.storage_path();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .context("Failed to read local storage file")?;
            storage.values = serde_json::from_str(&contents)
                .context("Failed to parse local storage file")?;
        }
        Ok(storage)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }

    fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let contents = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(self.storage_path(), contents)?;
        Ok(())
    }

    fn storage_path(&self) -> PathBuf {
        self.dir.join(STORAGE_FILE)
    }
}
