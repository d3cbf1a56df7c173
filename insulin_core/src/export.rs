//! CSV export of timelines and dose lists.
//!
//! Files are written to a temp file in the destination directory, synced,
//! and then renamed over the target so readers never see a partial export.

use crate::{DoseEntry, Error, InsulinValue, Result};
use fs2::FileExt;
use std::path::Path;
use tempfile::NamedTempFile;

/// A row in the timeline CSV
#[derive(Debug, serde::Serialize)]
struct TimelineRow {
    start_date: String,
    value: f64,
}

impl From<&InsulinValue> for TimelineRow {
    fn from(value: &InsulinValue) -> Self {
        TimelineRow {
            start_date: value.start_date.to_rfc3339(),
            value: value.value,
        }
    }
}

/// A row in the dose CSV
#[derive(Debug, serde::Serialize)]
struct DoseRow {
    dose_entry_type: &'static str,
    start_date: String,
    end_date: String,
    value: Option<f64>,
    unit: &'static str,
    description: Option<String>,
}

impl From<&DoseEntry> for DoseRow {
    fn from(dose: &DoseEntry) -> Self {
        DoseRow {
            dose_entry_type: dose.kind.name(),
            start_date: dose.start_date.to_rfc3339(),
            end_date: dose.end_date.to_rfc3339(),
            value: dose.value,
            unit: dose.unit.name(),
            description: dose.description.clone(),
        }
    }
}

/// Serialize rows to `path`, replacing any previous file atomically
fn write_rows_atomically<R, I>(path: &Path, rows: I) -> Result<usize>
where
    R: serde::Serialize,
    I: IntoIterator<Item = R>,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(temp.as_file());

    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer.flush()?;
    drop(writer);

    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(count)
}

/// Write a timeline as `start_date,value` rows
pub fn write_timeline_csv(path: &Path, timeline: &[InsulinValue]) -> Result<usize> {
    let count = write_rows_atomically(path, timeline.iter().map(TimelineRow::from))?;
    tracing::info!("Wrote {} timeline buckets to {:?}", count, path);
    Ok(count)
}

/// Write dose entries, one row per entry
pub fn write_doses_csv(path: &Path, doses: &[DoseEntry]) -> Result<usize> {
    let count = write_rows_atomically(path, doses.iter().map(DoseRow::from))?;
    tracing::info!("Wrote {} doses to {:?}", count, path);
    Ok(count)
}
