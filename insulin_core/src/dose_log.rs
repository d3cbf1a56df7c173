//! Append-only dose log.
//!
//! Dose entries are appended to a JSONL (JSON Lines) file, one interchange
//! record per line, with file locking to ensure safe concurrent access.

use crate::{DoseEntry, Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Destination for recorded dose entries
pub trait DoseSink {
    fn append(&mut self, dose: &DoseEntry) -> Result<()>;
}

/// JSONL-based dose log with file locking
pub struct JsonlDoseLog {
    path: PathBuf,
}

impl JsonlDoseLog {
    /// Create a new dose log for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every entry currently in the log
    pub fn read_all(&self) -> Result<Vec<DoseEntry>> {
        read_doses(&self.path)
    }

    /// Ensure the parent directory exists
    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl DoseSink for JsonlDoseLog {
    fn append(&mut self, dose: &DoseEntry) -> Result<()> {
        dose.validate()?;
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(dose)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Appended {} to dose log", dose);
        Ok(())
    }
}

/// Read all dose entries from a log file
///
/// A missing file is an empty log. A malformed line fails the whole read so
/// that delivered insulin is never silently dropped.
pub fn read_doses(path: &Path) -> Result<Vec<DoseEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    // Acquire shared lock for reading
    file.lock_shared()?;

    let doses = parse_lines(BufReader::new(&file));
    file.unlock()?;

    let doses = doses?;
    tracing::debug!("Read {} doses from {:?}", doses.len(), path);
    Ok(doses)
}

fn parse_lines(reader: impl BufRead) -> Result<Vec<DoseEntry>> {
    let mut doses = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let dose = serde_json::from_str::<DoseEntry>(&line).map_err(|source| {
            Error::DoseRecord {
                line: line_num + 1,
                source,
            }
        })?;
        doses.push(dose);
    }

    Ok(doses)
}
