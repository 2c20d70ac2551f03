//! In-memory log and marker stores.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use super::{AppendLog, MarkerStore};

#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppendLog for MemoryLog {
    fn append(&self, entry: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory log poisoned"))?
            .push(entry.to_string());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<String>> {
        let entries = self.entries.lock().map_err(|_| anyhow!("memory log poisoned"))?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory log poisoned"))?
            .len())
    }
}

#[derive(Debug, Default)]
pub struct MemoryMarkers {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryMarkers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkerStore for MemoryMarkers {
    fn set_marker(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .map_err(|_| anyhow!("marker store poisoned"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn marker(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .lock()
            .map_err(|_| anyhow!("marker store poisoned"))?
            .get(key)
            .cloned())
    }
}
