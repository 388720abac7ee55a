use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::record::ExecutionSnapshot;

/// Line-oriented log of finished executions: one JSON object per line,
/// carrying the full snapshot (metadata plus both captured streams).
/// Journaling is a caller convenience; execution correctness never depends
/// on it.
pub struct ExecutionJournal {
    path: PathBuf,
}

impl ExecutionJournal {
    pub fn new() -> Result<Self> {
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cx");
        Self::at(&base_dir)
    }

    pub fn at(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).context("failed to create journal directory")?;
        Ok(Self {
            path: base_dir.join("journal.jsonl"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        let line =
            serde_json::to_string(snapshot).context("failed to serialize execution record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<ExecutionSnapshot>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // Skip lines truncated by a crash or written by another version
            if let Ok(entry) = serde_json::from_str(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub fn export(&self, target: &Path) -> Result<()> {
        if self.path.exists() {
            fs::copy(&self.path, target)
                .with_context(|| format!("failed to export to {}", target.display()))?;
        } else {
            fs::write(target, "")
                .with_context(|| format!("failed to export to {}", target.display()))?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
