#![forbid(unsafe_code)]

//! Core domain model and delivery-history logic for dosetl.
//!
//! This crate provides:
//! - Dose entry types and unit conversion
//! - Reconciliation of raw pump events
//! - Normalization against a basal schedule
//! - Interpolation into fixed-width delivery buckets
//! - Persistence (JSONL dose log, CSV export) and configuration

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod reconcile;
pub mod basal;
pub mod timeline;
pub mod dose_log;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use reconcile::{reconcile_doses, Reconciler};
pub use basal::{normalize, normalize_basal_dose, BasalSchedule, RepeatingBasalSchedule};
pub use timeline::{
    date_floored_to_time_interval, interpolate_doses_to_timeline, TimelineOptions,
};
pub use dose_log::{read_doses, DoseSink, JsonlDoseLog};
pub use export::{write_doses_csv, write_timeline_csv};
