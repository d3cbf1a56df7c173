//! Discretization of dose entries into fixed-width delivery buckets.
//!
//! The timeline is a dense grid of `delta`-wide buckets starting at `start`.
//! Bucket `i` covers `[start + i·delta, start + (i+1)·delta)` and is stamped
//! with its end. All offsets are whole seconds and are floored toward negative
//! infinity, so doses that begin before the grid line up the same way as
//! doses inside it.

use crate::{DoseEntry, Error, InsulinValue, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Default bucket width
pub const DEFAULT_DELTA_MINUTES: i64 = 5;

/// Window and resolution of a timeline
#[derive(Clone, Debug)]
pub struct TimelineOptions {
    /// First bucket start; defaults to the earliest dose start floored to `delta`
    pub start: Option<DateTime<Utc>>,
    /// End of the grid; defaults to the latest dose end
    pub end: Option<DateTime<Utc>>,
    /// Bucket width, a whole number of seconds and at least one
    pub delta: Duration,
    /// Refuse to build grids larger than this
    pub max_buckets: Option<usize>,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            delta: Duration::minutes(DEFAULT_DELTA_MINUTES),
            max_buckets: None,
        }
    }
}

impl TimelineOptions {
    pub fn with_delta(delta: Duration) -> Self {
        Self {
            delta,
            ..Self::default()
        }
    }

    fn delta_seconds(&self) -> Result<i64> {
        interval_seconds(self.delta)
    }
}

/// Bucket width of `minutes`, rejecting non-positive and out-of-range values
pub fn delta_from_minutes(minutes: i64) -> Result<Duration> {
    if minutes <= 0 {
        return Err(Error::Configuration(format!(
            "Timeline delta must be a positive number of minutes, got {}",
            minutes
        )));
    }
    Duration::try_minutes(minutes).ok_or_else(|| {
        Error::Configuration(format!(
            "Timeline delta of {} minutes is out of range",
            minutes
        ))
    })
}

/// Whole seconds in `duration`, rounded toward negative infinity
fn whole_seconds(duration: Duration) -> i64 {
    let truncated = duration.num_seconds();
    if duration < Duration::seconds(truncated) {
        truncated - 1
    } else {
        truncated
    }
}

fn interval_seconds(interval: Duration) -> Result<i64> {
    let seconds = interval.num_seconds();
    if seconds <= 0 {
        return Err(Error::Configuration(format!(
            "Time interval must be at least one second, got {} ms",
            interval.num_milliseconds()
        )));
    }
    if interval != Duration::seconds(seconds) {
        return Err(Error::Configuration(format!(
            "Time interval must be a whole number of seconds, got {} ms",
            interval.num_milliseconds()
        )));
    }
    Ok(seconds)
}

fn from_timestamp(seconds: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::Configuration(format!("Timestamp {} is out of range", seconds)))
}

/// Latest multiple of `interval` since the Unix epoch at or before `date`
pub fn date_floored_to_time_interval(
    date: DateTime<Utc>,
    interval: Duration,
) -> Result<DateTime<Utc>> {
    let step = interval_seconds(interval)?;
    from_timestamp(date.timestamp().div_euclid(step) * step)
}

/// Earliest multiple of `interval` since the Unix epoch at or after `date`
pub fn date_ceiled_to_time_interval(
    date: DateTime<Utc>,
    interval: Duration,
) -> Result<DateTime<Utc>> {
    let floored = date_floored_to_time_interval(date, interval)?;
    if floored == date {
        Ok(floored)
    } else {
        Ok(floored + Duration::seconds(interval_seconds(interval)?))
    }
}

/// Sum each dose's delivery into fixed-width buckets
///
/// Every dose is validated before any bucket is filled. With no doses and no
/// explicit window the timeline is empty.
pub fn interpolate_doses_to_timeline(
    doses: &[DoseEntry],
    options: &TimelineOptions,
) -> Result<Vec<InsulinValue>> {
    let delta = options.delta_seconds()?;

    for dose in doses {
        dose.validate()?;
    }

    let start = match options.start {
        Some(start) => start,
        None => match doses.iter().map(|d| d.start_date).min() {
            Some(earliest) => date_floored_to_time_interval(earliest, Duration::seconds(delta))?,
            None => return Ok(Vec::new()),
        },
    };

    let end = match options.end {
        Some(end) => end,
        None => match doses.iter().map(|d| d.end_date).max() {
            Some(latest) => latest,
            None => return Ok(Vec::new()),
        },
    };

    let max_offset = whole_seconds(end - start);
    let bucket_count = if max_offset > 0 {
        usize::try_from((max_offset + delta - 1) / delta).map_err(|_| {
            Error::Configuration(format!("Timeline of {} seconds is too large", max_offset))
        })?
    } else {
        0
    };

    if let Some(limit) = options.max_buckets {
        if bucket_count > limit {
            return Err(Error::Configuration(format!(
                "Timeline needs {} buckets, limit is {}",
                bucket_count, limit
            )));
        }
    }

    let step = Duration::seconds(delta);
    let mut buckets: Vec<InsulinValue> = (0..bucket_count)
        .map(|index| InsulinValue::new(start + Duration::seconds((index as i64 + 1) * delta), 0.0))
        .collect();

    for dose in doses {
        let first = whole_seconds(dose.start_date - start).div_euclid(delta);
        let last = whole_seconds(dose.end_date - start).div_euclid(delta) + 1;

        let first = first.max(0);
        let last = last.min(bucket_count as i64);

        for index in first..last {
            let bucket_start = start + Duration::seconds(index * delta);
            let bucket_end = bucket_start + step;
            buckets[index as usize].value += dose.units_delivered_during(bucket_start, bucket_end)?;
        }
    }

    tracing::debug!(
        "Interpolated {} doses into {} buckets of {}s from {}",
        doses.len(),
        buckets.len(),
        delta,
        start
    );

    Ok(buckets)
}
