//! Core domain types for insulin delivery history.
//!
//! This module defines the fundamental types used throughout the system:
//! - Dose entries (boluses, temp basals, suspends, resumes) and their units
//! - The interchange record used for persistence
//! - Basal schedule segments
//! - Bucketed insulin values produced by the timeline

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Length of a duration in fractional hours
pub(crate) fn hours(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / MILLIS_PER_HOUR
}

// ============================================================================
// Dose Types
// ============================================================================

/// Kind of delivery event emitted by a pump
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DoseEntryType {
    Bolus,
    Suspend,
    Resume,
    TempBasal,
}

impl DoseEntryType {
    pub fn name(&self) -> &'static str {
        match self {
            DoseEntryType::Bolus => "Bolus",
            DoseEntryType::Suspend => "Suspend",
            DoseEntryType::Resume => "Resume",
            DoseEntryType::TempBasal => "TempBasal",
        }
    }
}

impl std::str::FromStr for DoseEntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "bolus" => Ok(DoseEntryType::Bolus),
            "suspend" => Ok(DoseEntryType::Suspend),
            "resume" => Ok(DoseEntryType::Resume),
            "tempbasal" => Ok(DoseEntryType::TempBasal),
            _ => Err(Error::Validation(format!("Unknown dose type: {}", s))),
        }
    }
}

/// Unit a dose value is expressed in
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DoseUnit {
    #[serde(rename = "U/hour")]
    UnitsPerHour,
    #[serde(rename = "U")]
    Units,
}

impl DoseUnit {
    /// The unit a dose of the given kind is expected to carry
    pub fn conventional_for(kind: DoseEntryType) -> Self {
        match kind {
            DoseEntryType::Bolus => DoseUnit::Units,
            DoseEntryType::Suspend | DoseEntryType::Resume | DoseEntryType::TempBasal => {
                DoseUnit::UnitsPerHour
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DoseUnit::UnitsPerHour => "UnitsPerHour",
            DoseUnit::Units => "Units",
        }
    }
}

/// One delivery interval
///
/// Entries are treated as immutable once built: reconciliation and
/// normalization always produce new entries rather than editing inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "DoseRecord", into = "DoseRecord")]
pub struct DoseEntry {
    pub kind: DoseEntryType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: Option<f64>,
    pub unit: DoseUnit,
    pub description: Option<String>,
}

impl DoseEntry {
    /// Build an entry; a missing end date collapses the span to its start
    pub fn new(
        kind: DoseEntryType,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        value: Option<f64>,
        unit: DoseUnit,
    ) -> Self {
        Self {
            kind,
            start_date,
            end_date: end_date.unwrap_or(start_date),
            value,
            unit,
            description: None,
        }
    }

    pub fn bolus(at: DateTime<Utc>, units: f64) -> Self {
        Self::new(DoseEntryType::Bolus, at, None, Some(units), DoseUnit::Units)
    }

    pub fn temp_basal(start: DateTime<Utc>, end: DateTime<Utc>, rate: f64) -> Self {
        Self::new(
            DoseEntryType::TempBasal,
            start,
            Some(end),
            Some(rate),
            DoseUnit::UnitsPerHour,
        )
    }

    pub fn suspend(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self::new(DoseEntryType::Suspend, start, end, None, DoseUnit::UnitsPerHour)
    }

    pub fn resume(at: DateTime<Utc>) -> Self {
        Self::new(DoseEntryType::Resume, at, None, None, DoseUnit::UnitsPerHour)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Copy of this entry covering a different span
    pub fn with_span(&self, start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            start_date,
            end_date,
            ..self.clone()
        }
    }

    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }

    /// Numeric value of the dose
    ///
    /// Suspends and resumes without a value are zero-rate events; every other
    /// kind must carry one.
    pub fn amount(&self) -> Result<f64> {
        match (self.value, self.kind) {
            (Some(value), _) => Ok(value),
            (None, DoseEntryType::Suspend | DoseEntryType::Resume) => Ok(0.0),
            (None, _) => Err(Error::Validation(format!(
                "{} starting {} has no value",
                self.kind.name(),
                self.start_date.to_rfc3339()
            ))),
        }
    }

    /// Total units delivered by this entry
    pub fn units(&self) -> Result<f64> {
        let value = self.amount()?;
        Ok(match self.unit {
            DoseUnit::UnitsPerHour => value * hours(self.duration()),
            DoseUnit::Units => value,
        })
    }

    /// Units attributable to the window `[start, end]`
    ///
    /// Absolute doses count only when they lie wholly inside the window with a
    /// strict upper bound: a bolus ending exactly at `end` belongs to the next
    /// window. Rate doses contribute in proportion to their overlap.
    pub fn units_delivered_during(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64> {
        let value = self.amount()?;

        if self.unit == DoseUnit::Units {
            if self.start_date >= start && self.end_date < end {
                return Ok(value);
            }
            return Ok(0.0);
        }

        if self.start_date > end || self.end_date < start {
            return Ok(0.0);
        }

        if self.start_date >= start && self.end_date <= end {
            return self.units();
        }

        let overlap = self.end_date.min(end) - self.start_date.max(start);
        if overlap < Duration::zero() {
            Ok(0.0)
        } else {
            Ok(value * hours(overlap))
        }
    }

    /// Check the entry's invariants
    pub fn validate(&self) -> Result<()> {
        if self.end_date < self.start_date {
            return Err(Error::Validation(format!(
                "{} ends ({}) before it starts ({})",
                self.kind.name(),
                self.end_date.to_rfc3339(),
                self.start_date.to_rfc3339()
            )));
        }

        let expected = DoseUnit::conventional_for(self.kind);
        if self.unit != expected {
            return Err(Error::Validation(format!(
                "{} starting {} must be expressed in {}, found {}",
                self.kind.name(),
                self.start_date.to_rfc3339(),
                expected.name(),
                self.unit.name()
            )));
        }

        let value = self.amount()?;
        if !value.is_finite() {
            return Err(Error::Validation(format!(
                "{} starting {} has non-finite value {}",
                self.kind.name(),
                self.start_date.to_rfc3339(),
                value
            )));
        }

        Ok(())
    }
}

impl fmt::Display for DoseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} : {:.3} {} for {} minutes",
            self.kind.name(),
            self.start_date.to_rfc3339(),
            self.value.unwrap_or(0.0),
            self.unit.name(),
            self.duration().num_minutes()
        )
    }
}

// ============================================================================
// Interchange Record
// ============================================================================

/// Serialized form of a dose entry
///
/// Optional fields fall back to the entry defaults: a missing end date means an
/// instantaneous event, and a missing unit means the kind's conventional unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoseRecord {
    pub dose_entry_type: DoseEntryType,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<DoseUnit>,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<DoseRecord> for DoseEntry {
    fn from(record: DoseRecord) -> Self {
        let unit = record
            .unit
            .unwrap_or_else(|| DoseUnit::conventional_for(record.dose_entry_type));
        Self {
            kind: record.dose_entry_type,
            start_date: record.start_date,
            end_date: record.end_date.unwrap_or(record.start_date),
            value: record.value,
            unit,
            description: record.description,
        }
    }
}

impl From<DoseEntry> for DoseRecord {
    fn from(entry: DoseEntry) -> Self {
        Self {
            dose_entry_type: entry.kind,
            start_date: entry.start_date,
            end_date: Some(entry.end_date),
            value: entry.value,
            unit: Some(entry.unit),
            description: entry.description,
        }
    }
}

// ============================================================================
// Schedule and Timeline Types
// ============================================================================

/// One piece of a basal schedule, in effect from `start_date` until the next
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasalScheduleItem {
    pub start_date: DateTime<Utc>,
    /// Scheduled rate in units/hour
    pub value: f64,
}

/// Units delivered in the bucket ending at `start_date`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsulinValue {
    pub start_date: DateTime<Utc>,
    pub value: f64,
}

impl InsulinValue {
    pub fn new(start_date: DateTime<Utc>, value: f64) -> Self {
        Self { start_date, value }
    }
}
