//! Basal schedules and normalization of rate doses against them.
//!
//! A normalized dose is expressed as the *difference* from the scheduled
//! basal rate, split at every schedule breakpoint the dose crosses. Downstream
//! consumers can then treat scheduled basal as the baseline and only model
//! the deviation from it.

use crate::{BasalScheduleItem, DoseEntry, DoseUnit, Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, Timelike, Utc};

/// Query contract for a piecewise-constant basal rate schedule
pub trait BasalSchedule {
    /// Segments in effect at any point of `[start, end]`, in ascending order
    ///
    /// The first segment may start before `start`. Each segment lasts until the
    /// next one begins.
    fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<BasalScheduleItem>;
}

/// Whether a segment `[seg_start, seg_end)` covers part of `[start, end]`
///
/// An instantaneous query matches the segment that contains it.
fn segment_intersects(
    seg_start: DateTime<Utc>,
    seg_end: Option<DateTime<Utc>>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> bool {
    let ends_after = |instant: DateTime<Utc>| seg_end.map_or(true, |e| e > instant);
    if start == end {
        seg_start <= start && ends_after(start)
    } else {
        seg_start < end && ends_after(start)
    }
}

/// A list of absolute segments; the last one stays in effect indefinitely
impl BasalSchedule for [BasalScheduleItem] {
    fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<BasalScheduleItem> {
        self.iter()
            .enumerate()
            .filter(|(index, item)| {
                let seg_end = self.get(index + 1).map(|next| next.start_date);
                segment_intersects(item.start_date, seg_end, start, end)
            })
            .map(|(_, item)| item.clone())
            .collect()
    }
}

// ============================================================================
// Daily Repeating Schedule
// ============================================================================

/// Rate starting at a time of day
#[derive(Clone, Debug, PartialEq)]
pub struct RepeatingScheduleValue {
    pub start_time: NaiveTime,
    /// Units/hour
    pub value: f64,
}

/// A basal schedule that repeats every day in a fixed UTC offset
#[derive(Clone, Debug)]
pub struct RepeatingBasalSchedule {
    items: Vec<RepeatingScheduleValue>,
    utc_offset: FixedOffset,
}

impl RepeatingBasalSchedule {
    /// Build a schedule; items must start at midnight and ascend strictly
    pub fn new(items: Vec<RepeatingScheduleValue>, utc_offset: FixedOffset) -> Result<Self> {
        let first = items
            .first()
            .ok_or_else(|| Error::Configuration("Basal schedule has no entries".into()))?;

        if first.start_time.num_seconds_from_midnight() != 0 {
            return Err(Error::Configuration(format!(
                "Basal schedule must start at 00:00, first entry starts at {}",
                first.start_time.format("%H:%M")
            )));
        }

        for pair in items.windows(2) {
            if pair[1].start_time <= pair[0].start_time {
                return Err(Error::Configuration(format!(
                    "Basal schedule entries out of order: {} follows {}",
                    pair[1].start_time.format("%H:%M"),
                    pair[0].start_time.format("%H:%M")
                )));
            }
        }

        if let Some(bad) = items.iter().find(|i| !i.value.is_finite() || i.value < 0.0) {
            return Err(Error::Configuration(format!(
                "Basal rate at {} must be a non-negative number, found {}",
                bad.start_time.format("%H:%M"),
                bad.value
            )));
        }

        Ok(Self { items, utc_offset })
    }

    pub fn items(&self) -> &[RepeatingScheduleValue] {
        &self.items
    }

    /// Scheduled rate in effect at `date`
    pub fn value_at(&self, date: DateTime<Utc>) -> f64 {
        self.between(date, date)
            .first()
            .map(|item| item.value)
            .unwrap_or(0.0)
    }

    /// Midnight, in UTC, of the schedule-local day containing `date`
    fn day_start(&self, date: DateTime<Utc>) -> DateTime<Utc> {
        let local = date.with_timezone(&self.utc_offset);
        let since_midnight = Duration::seconds(i64::from(local.num_seconds_from_midnight()))
            + Duration::nanoseconds(i64::from(local.nanosecond()));
        (local - since_midnight).with_timezone(&Utc)
    }

    fn offset_of(item: &RepeatingScheduleValue) -> Duration {
        Duration::seconds(i64::from(item.start_time.num_seconds_from_midnight()))
    }
}

impl BasalSchedule for RepeatingBasalSchedule {
    fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<BasalScheduleItem> {
        let mut segments = Vec::new();
        let mut day = self.day_start(start);

        while day <= end {
            for (index, item) in self.items.iter().enumerate() {
                let seg_start = day + Self::offset_of(item);
                let seg_end = match self.items.get(index + 1) {
                    Some(next) => day + Self::offset_of(next),
                    None => day + Duration::days(1),
                };

                if segment_intersects(seg_start, Some(seg_end), start, end) {
                    segments.push(BasalScheduleItem {
                        start_date: seg_start,
                        value: item.value,
                    });
                }
            }
            day += Duration::days(1);
        }

        segments
    }
}

/// Fixed offset from a number of minutes east of UTC
pub fn utc_offset_from_minutes(minutes: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
        Error::Configuration(format!("UTC offset of {} minutes is out of range", minutes))
    })
}

/// Fixed offset used when the schedule is defined in UTC
pub fn utc() -> FixedOffset {
    Utc.fix()
}

// ============================================================================
// Normalization
// ============================================================================

/// Split a rate dose at schedule breakpoints, as deltas from scheduled basal
pub fn normalize_basal_dose<S>(dose: &DoseEntry, schedule: &S) -> Result<Vec<DoseEntry>>
where
    S: BasalSchedule + ?Sized,
{
    dose.validate()?;
    let rate = dose.amount()?;

    let segments = schedule.between(dose.start_date, dose.end_date);
    if segments.is_empty() {
        return Err(Error::ScheduleCoverage(dose.to_string()));
    }

    let last = segments.len() - 1;
    let normalized = segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let start_date = if index == 0 {
                dose.start_date
            } else {
                segment.start_date
            };
            let end_date = if index == last {
                dose.end_date
            } else {
                segments[index + 1].start_date
            };

            DoseEntry {
                kind: dose.kind,
                start_date,
                end_date,
                value: Some(rate - segment.value),
                unit: DoseUnit::UnitsPerHour,
                description: dose.description.clone(),
            }
        })
        .collect();

    Ok(normalized)
}

/// Normalize every rate dose; absolute doses pass through unchanged
pub fn normalize<S>(doses: &[DoseEntry], schedule: &S) -> Result<Vec<DoseEntry>>
where
    S: BasalSchedule + ?Sized,
{
    for dose in doses {
        dose.validate()?;
    }

    let mut normalized = Vec::with_capacity(doses.len());
    for dose in doses {
        match dose.unit {
            DoseUnit::UnitsPerHour => normalized.extend(normalize_basal_dose(dose, schedule)?),
            DoseUnit::Units => normalized.push(dose.clone()),
        }
    }

    tracing::debug!(
        "Normalized {} doses into {} schedule-aligned entries",
        doses.len(),
        normalized.len()
    );
    Ok(normalized)
}
