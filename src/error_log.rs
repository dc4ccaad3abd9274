use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;

/// Append-only JSONL log of fetch and control failures. Polling never stops
/// on a failed fetch; this file is where the skipped cycles end up.
#[derive(Clone, Debug)]
pub struct ErrorLogStore {
    path: PathBuf,
}

impl ErrorLogStore {
    pub fn new(path: PathBuf) -> Self {
        ErrorLogStore { path }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("dashboard_errors.jsonl")
    }

    pub fn record(&self, source: &str, message: impl Into<String>) -> Result<()> {
        let entry = StoredErrorEntry {
            timestamp_ms: Local::now().timestamp_millis(),
            source: source.to_string(),
            message: message.into(),
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[derive(Serialize)]
struct StoredErrorEntry {
    timestamp_ms: i64,
    source: String,
    message: String,
}
