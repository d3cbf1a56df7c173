//! Reconciliation of raw pump events into non-overlapping delivery entries.
//!
//! Pumps report temp basals and suspends as intervals that may be cut short
//! by later events. The reconciler walks the stream once, keeping at most one
//! open temp basal and one open suspend:
//! - A new temp basal closes the previous one at its own start
//! - A suspend closes the running temp basal; any remainder waits for a resume
//! - A resume closes the suspend and lets the remaining temp basal continue
//!
//! The input must be sorted by start date. Every entry in the output is a
//! freshly built copy; inputs are never modified.

use crate::{DoseEntry, DoseEntryType, Error, Result};
use chrono::{DateTime, Utc};

/// Single-pass reconciliation state
#[derive(Debug, Default)]
pub struct Reconciler {
    open_suspend: Option<DoseEntry>,
    open_temp_basal: Option<DoseEntry>,
    reconciled: Vec<DoseEntry>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next event in chronological order
    pub fn push(&mut self, dose: &DoseEntry) -> Result<()> {
        if dose.kind != DoseEntryType::Resume {
            self.close_elapsed_suspend(dose);
        }

        match dose.kind {
            DoseEntryType::Bolus => self.reconciled.push(dose.clone()),
            DoseEntryType::TempBasal => self.push_temp_basal(dose),
            DoseEntryType::Resume => self.push_resume(dose),
            DoseEntryType::Suspend => self.push_suspend(dose)?,
        }
        Ok(())
    }

    /// Flush any interval still open and return the reconciled entries
    pub fn finish(mut self) -> Vec<DoseEntry> {
        if let Some(suspend) = self.open_suspend.take() {
            self.reconciled.push(suspend);
        } else if let Some(temp_basal) = self.open_temp_basal.take() {
            if temp_basal.end_date > temp_basal.start_date {
                self.reconciled.push(temp_basal);
            }
        }
        self.reconciled
    }

    /// A suspend that already carries its own end is complete once the stream
    /// has moved past it.
    fn close_elapsed_suspend(&mut self, next: &DoseEntry) {
        let elapsed = self.open_suspend.as_ref().is_some_and(|suspend| {
            suspend.end_date > suspend.start_date && next.start_date >= suspend.end_date
        });
        if elapsed {
            if let Some(suspend) = self.open_suspend.take() {
                tracing::debug!("Suspend starting {} ended on its own", suspend.start_date);
                let resumed_at = suspend.end_date;
                self.reconciled.push(suspend);
                self.continue_temp_basal(resumed_at);
            }
        }
    }

    /// Keep whatever part of the open temp basal runs past `resumed_at`
    fn continue_temp_basal(&mut self, resumed_at: DateTime<Utc>) {
        if let Some(temp_basal) = self.open_temp_basal.take() {
            if temp_basal.end_date > resumed_at {
                self.open_temp_basal = Some(temp_basal.with_span(resumed_at, temp_basal.end_date));
            }
        }
    }

    fn push_temp_basal(&mut self, dose: &DoseEntry) {
        if let Some(previous) = self.open_temp_basal.take() {
            let end_date = previous.end_date.min(dose.start_date);
            if end_date > previous.start_date {
                self.reconciled.push(previous.with_span(previous.start_date, end_date));
            } else {
                tracing::debug!(
                    "Dropping temp basal starting {} superseded before taking effect",
                    previous.start_date
                );
            }
        }

        self.open_temp_basal = Some(dose.clone());
    }

    fn push_resume(&mut self, dose: &DoseEntry) {
        match self.open_suspend.take() {
            Some(suspend) => {
                let description = suspend
                    .description
                    .clone()
                    .or_else(|| dose.description.clone());
                self.reconciled.push(DoseEntry {
                    end_date: dose.end_date,
                    description,
                    ..suspend
                });
            }
            None => tracing::debug!("Resume at {} without an open suspend", dose.start_date),
        }

        self.continue_temp_basal(dose.end_date);
    }

    fn push_suspend(&mut self, dose: &DoseEntry) -> Result<()> {
        if let Some(open) = &self.open_suspend {
            return Err(Error::Overlap(format!(
                "suspend starting {} while the suspend from {} is still open",
                dose.start_date.to_rfc3339(),
                open.start_date.to_rfc3339()
            )));
        }

        if let Some(temp_basal) = self.open_temp_basal.take() {
            let end_date = temp_basal.end_date.min(dose.start_date);
            self.reconciled
                .push(temp_basal.with_span(temp_basal.start_date, end_date));

            if temp_basal.end_date > dose.start_date {
                self.open_temp_basal = Some(temp_basal);
            }
        }

        self.open_suspend = Some(dose.clone());
        Ok(())
    }
}

/// Check entries and their chronological order before any processing
fn validate_stream(doses: &[DoseEntry]) -> Result<()> {
    for dose in doses {
        dose.validate()?;
    }

    for (index, pair) in doses.windows(2).enumerate() {
        if pair[1].start_date < pair[0].start_date {
            return Err(Error::Ordering(format!(
                "entry {} ({}) starts before entry {} ({})",
                index + 1,
                pair[1].start_date.to_rfc3339(),
                index,
                pair[0].start_date.to_rfc3339()
            )));
        }
    }

    Ok(())
}

/// Merge a chronological dose stream into non-overlapping entries
///
/// Entries appear in the order they were closed, which is not necessarily
/// sorted by start date.
pub fn reconcile_doses(doses: &[DoseEntry]) -> Result<Vec<DoseEntry>> {
    validate_stream(doses)?;

    let mut reconciler = Reconciler::new();
    for dose in doses {
        reconciler.push(dose)?;
    }
    let reconciled = reconciler.finish();

    tracing::debug!(
        "Reconciled {} events into {} entries",
        doses.len(),
        reconciled.len()
    );
    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn spans(doses: &[DoseEntry]) -> Vec<(DoseEntryType, DateTime<Utc>, DateTime<Utc>)> {
        doses
            .iter()
            .map(|d| (d.kind, d.start_date, d.end_date))
            .collect()
    }

    #[test]
    fn test_bolus_passes_through() {
        let bolus = DoseEntry::bolus(t(0), 2.0);
        let reconciled = reconcile_doses(&[bolus.clone()]).unwrap();
        assert_eq!(reconciled, vec![bolus]);
    }

    #[test]
    fn test_empty_stream() {
        assert!(reconcile_doses(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_suspend_interrupts_temp_basal() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(30), 1.0),
            DoseEntry::suspend(t(10), Some(t(20))),
            DoseEntry::resume(t(20)).with_description("ok"),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();

        assert_eq!(
            spans(&reconciled),
            vec![
                (DoseEntryType::TempBasal, t(0), t(10)),
                (DoseEntryType::Suspend, t(10), t(20)),
                (DoseEntryType::TempBasal, t(20), t(30)),
            ]
        );
        assert_eq!(reconciled[1].description.as_deref(), Some("ok"));
        assert_eq!(reconciled[0].value, Some(1.0));
        assert_eq!(reconciled[2].value, Some(1.0));

        let temp_minutes: i64 = reconciled
            .iter()
            .filter(|d| d.kind == DoseEntryType::TempBasal)
            .map(|d| d.duration().num_minutes())
            .sum();
        assert_eq!(temp_minutes, 20);
    }

    #[test]
    fn test_suspend_description_wins_over_resume() {
        let doses = vec![
            DoseEntry::suspend(t(0), None).with_description("site change"),
            DoseEntry::resume(t(15)).with_description("ok"),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(reconciled.len(), 1);
        assert_eq!(reconciled[0].end_date, t(15));
        assert_eq!(reconciled[0].description.as_deref(), Some("site change"));
    }

    #[test]
    fn test_new_temp_basal_truncates_previous() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(30), 1.0),
            DoseEntry::temp_basal(t(20), t(50), 2.0),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(
            spans(&reconciled),
            vec![
                (DoseEntryType::TempBasal, t(0), t(20)),
                (DoseEntryType::TempBasal, t(20), t(50)),
            ]
        );
        assert_eq!(reconciled[1].value, Some(2.0));
    }

    #[test]
    fn test_zero_duration_temp_basal_dropped() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(30), 1.0),
            DoseEntry::temp_basal(t(0), t(30), 2.0),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(reconciled.len(), 1);
        assert_eq!(reconciled[0].value, Some(2.0));
    }

    #[test]
    fn test_zero_duration_temp_basal_dropped_at_flush() {
        let doses = vec![DoseEntry::temp_basal(t(0), t(0), 1.0)];
        assert!(reconcile_doses(&doses).unwrap().is_empty());
    }

    #[test]
    fn test_temp_basal_ending_before_suspend_is_cleared() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(10), 1.0),
            DoseEntry::suspend(t(20), None),
            DoseEntry::resume(t(30)),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(
            spans(&reconciled),
            vec![
                (DoseEntryType::TempBasal, t(0), t(10)),
                (DoseEntryType::Suspend, t(20), t(30)),
            ]
        );
    }

    #[test]
    fn test_temp_basal_consumed_by_suspend() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(25), 1.0),
            DoseEntry::suspend(t(10), None),
            DoseEntry::resume(t(40)),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(
            spans(&reconciled),
            vec![
                (DoseEntryType::TempBasal, t(0), t(10)),
                (DoseEntryType::Suspend, t(10), t(40)),
            ]
        );
    }

    #[test]
    fn test_open_suspend_flushed_and_temp_basal_dropped() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(30), 1.0),
            DoseEntry::suspend(t(10), None),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(
            spans(&reconciled),
            vec![
                (DoseEntryType::TempBasal, t(0), t(10)),
                (DoseEntryType::Suspend, t(10), t(10)),
            ]
        );
    }

    #[test]
    fn test_resume_without_suspend_trims_temp_basal() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(30), 1.0),
            DoseEntry::resume(t(10)),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(
            spans(&reconciled),
            vec![(DoseEntryType::TempBasal, t(10), t(30))]
        );
    }

    #[test]
    fn test_boluses_interleaved_keep_discovery_order() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(30), 1.0),
            DoseEntry::bolus(t(5), 1.5),
            DoseEntry::temp_basal(t(15), t(45), 0.5),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(
            spans(&reconciled),
            vec![
                (DoseEntryType::Bolus, t(5), t(5)),
                (DoseEntryType::TempBasal, t(0), t(15)),
                (DoseEntryType::TempBasal, t(15), t(45)),
            ]
        );
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(30), 1.0),
            DoseEntry::suspend(t(10), Some(t(20))),
            DoseEntry::resume(t(20)).with_description("ok"),
            DoseEntry::bolus(t(40), 1.0),
            DoseEntry::temp_basal(t(45), t(60), 0.2),
        ];

        let once = reconcile_doses(&doses).unwrap();
        let mut sorted = once.clone();
        sorted.sort_by_key(|d| d.start_date);
        let mut twice = reconcile_doses(&sorted).unwrap();
        twice.sort_by_key(|d| d.start_date);

        assert_eq!(spans(&twice), spans(&sorted));
        assert_eq!(twice, sorted);
    }

    #[test]
    fn test_self_terminated_suspend_resumes_temp_basal() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(60), 1.0),
            DoseEntry::suspend(t(10), Some(t(20))),
            DoseEntry::temp_basal(t(30), t(40), 2.0),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(
            spans(&reconciled),
            vec![
                (DoseEntryType::TempBasal, t(0), t(10)),
                (DoseEntryType::Suspend, t(10), t(20)),
                (DoseEntryType::TempBasal, t(20), t(30)),
                (DoseEntryType::TempBasal, t(30), t(40)),
            ]
        );
    }

    #[test]
    fn test_no_overlap_between_same_kind() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(60), 1.0),
            DoseEntry::temp_basal(t(10), t(70), 2.0),
            DoseEntry::suspend(t(20), None),
            DoseEntry::resume(t(30)),
            DoseEntry::temp_basal(t(40), t(50), 3.0),
            DoseEntry::suspend(t(45), None),
            DoseEntry::resume(t(55)),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();

        for kind in [DoseEntryType::TempBasal, DoseEntryType::Suspend] {
            let mut same: Vec<_> = reconciled.iter().filter(|d| d.kind == kind).collect();
            same.sort_by_key(|d| d.start_date);
            for pair in same.windows(2) {
                assert!(
                    pair[0].end_date <= pair[1].start_date,
                    "{} overlaps {}",
                    pair[0],
                    pair[1]
                );
            }
        }
    }

    #[test]
    fn test_out_of_order_input_rejected() {
        let doses = vec![DoseEntry::bolus(t(10), 1.0), DoseEntry::bolus(t(5), 1.0)];
        assert!(matches!(reconcile_doses(&doses), Err(Error::Ordering(_))));
    }

    #[test]
    fn test_invalid_entry_rejected_before_processing() {
        let doses = vec![
            DoseEntry::bolus(t(0), 1.0),
            DoseEntry::temp_basal(t(10), t(5), 1.0),
        ];
        assert!(matches!(reconcile_doses(&doses), Err(Error::Validation(_))));
    }

    #[test]
    fn test_second_open_suspend_rejected() {
        let doses = vec![
            DoseEntry::suspend(t(0), None),
            DoseEntry::suspend(t(10), None),
        ];
        assert!(matches!(reconcile_doses(&doses), Err(Error::Overlap(_))));
    }

    #[test]
    fn test_temp_basal_during_suspend_starts_at_resume() {
        let doses = vec![
            DoseEntry::suspend(t(0), None),
            DoseEntry::temp_basal(t(5), t(40), 1.0),
            DoseEntry::resume(t(10)),
        ];

        let reconciled = reconcile_doses(&doses).unwrap();
        assert_eq!(
            spans(&reconciled),
            vec![
                (DoseEntryType::Suspend, t(0), t(10)),
                (DoseEntryType::TempBasal, t(10), t(40)),
            ]
        );
        assert_eq!(reconciled[1].value, Some(1.0));
    }

    #[test]
    fn test_inputs_not_modified() {
        let doses = vec![
            DoseEntry::temp_basal(t(0), t(30), 1.0),
            DoseEntry::suspend(t(10), None),
            DoseEntry::resume(t(20)),
        ];
        let before = doses.clone();
        reconcile_doses(&doses).unwrap();
        assert_eq!(doses, before);
    }
}
