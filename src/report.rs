//! Job report — ordered per-row outcomes of one run
//!
//! All types use camelCase JSON serialization so hosts can export a report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of processing a single input row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RowOutcome {
    /// A key failed validation; the row was not looked up
    Skipped { reason: String },
    /// No catalog entry matched the key pair
    NotFound,
    /// The matched entry was deleted
    Deleted,
    /// The matched entry would have been deleted (dry run)
    WouldDelete,
    /// The directory refused the delete
    DeleteFailed { code: i32, message: String },
    /// An error occurred while processing the row
    RowError { message: String },
}

impl RowOutcome {
    /// Whether the row needs operator attention
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RowOutcome::DeleteFailed { .. } | RowOutcome::RowError { .. }
        )
    }
}

impl fmt::Display for RowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            RowOutcome::NotFound => f.write_str("no catalog entry found"),
            RowOutcome::Deleted => f.write_str("deleted"),
            RowOutcome::WouldDelete => f.write_str("would delete (dry run)"),
            RowOutcome::DeleteFailed { code, message } => {
                write!(f, "delete failed ({}: {})", code, message)
            }
            RowOutcome::RowError { message } => write!(f, "error ({})", message),
        }
    }
}

/// Outcome of one row, keyed by its 1-based index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowRecord {
    pub row: usize,
    pub outcome: RowOutcome,
}

/// Outcome counts grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub skipped: usize,
    pub not_found: usize,
    pub deleted: usize,
    pub would_delete: usize,
    pub delete_failed: usize,
    pub row_errors: usize,
}

/// Accumulated result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    /// Unique job identifier (job-<uuid>)
    pub id: String,

    /// Number of rows handed to the run
    pub total_rows: usize,

    /// Number of rows that received an outcome
    pub processed_count: usize,

    /// Outcomes in input order
    pub outcomes: Vec<RowRecord>,

    /// Whether the run stopped early at a cancellation check
    #[serde(default)]
    pub cancelled: bool,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobReport {
    /// Start an empty report for a run over `total_rows` rows
    pub fn new(total_rows: usize) -> Self {
        Self {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            total_rows,
            processed_count: 0,
            outcomes: Vec::with_capacity(total_rows),
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Append the outcome of the next row
    ///
    /// `processed_count` advances by exactly one per call.
    pub fn record(&mut self, row: usize, outcome: RowOutcome) {
        self.outcomes.push(RowRecord { row, outcome });
        self.processed_count += 1;
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Completion percentage, `floor(processed / total * 100)` clamped to 0..=100
    ///
    /// An empty run reports 100.
    pub fn progress(&self) -> u8 {
        percent(self.processed_count, self.total_rows)
    }

    /// Whether every row received an outcome
    pub fn is_complete(&self) -> bool {
        self.processed_count == self.total_rows
    }

    /// Outcome of a given 1-based row, if processed
    pub fn outcome(&self, row: usize) -> Option<&RowOutcome> {
        self.outcomes
            .iter()
            .find(|r| r.row == row)
            .map(|r| &r.outcome)
    }

    /// Rows that ended in `DeleteFailed` or `RowError`
    pub fn failures(&self) -> Vec<&RowRecord> {
        self.outcomes
            .iter()
            .filter(|r| r.outcome.is_failure())
            .collect()
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for record in &self.outcomes {
            match record.outcome {
                RowOutcome::Skipped { .. } => counts.skipped += 1,
                RowOutcome::NotFound => counts.not_found += 1,
                RowOutcome::Deleted => counts.deleted += 1,
                RowOutcome::WouldDelete => counts.would_delete += 1,
                RowOutcome::DeleteFailed { .. } => counts.delete_failed += 1,
                RowOutcome::RowError { .. } => counts.row_errors += 1,
            }
        }
        counts
    }
}

pub(crate) fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (processed as u128 * 100) / total as u128;
    pct.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_floor_and_clamp() {
        assert_eq!(percent(0, 3), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(5, 3), 100);
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(1, 7), 14);
    }

    #[test]
    fn test_record_advances_processed() {
        let mut report = JobReport::new(2);
        assert!(report.id.starts_with("job-"));
        assert_eq!(report.progress(), 0);

        report.record(1, RowOutcome::Deleted);
        assert_eq!(report.processed_count, 1);
        assert_eq!(report.progress(), 50);
        assert!(!report.is_complete());

        report.record(
            2,
            RowOutcome::RowError {
                message: "boom".to_string(),
            },
        );
        assert!(report.is_complete());
        assert_eq!(report.outcome(1), Some(&RowOutcome::Deleted));
        assert!(report.outcome(3).is_none());
    }

    #[test]
    fn test_counts_and_failures() {
        let mut report = JobReport::new(5);
        report.record(1, RowOutcome::Deleted);
        report.record(
            2,
            RowOutcome::Skipped {
                reason: "invalid or missing key".to_string(),
            },
        );
        report.record(3, RowOutcome::NotFound);
        report.record(
            4,
            RowOutcome::DeleteFailed {
                code: -5002,
                message: "locked".to_string(),
            },
        );
        report.record(
            5,
            RowOutcome::RowError {
                message: "could not retrieve object".to_string(),
            },
        );

        let counts = report.counts();
        assert_eq!(counts.deleted, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.not_found, 1);
        assert_eq!(counts.delete_failed, 1);
        assert_eq!(counts.row_errors, 1);

        let failures: Vec<usize> = report.failures().iter().map(|r| r.row).collect();
        assert_eq!(failures, vec![4, 5]);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let mut report = JobReport::new(1);
        report.record(
            1,
            RowOutcome::DeleteFailed {
                code: -1,
                message: "x".to_string(),
            },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["totalRows"], 1);
        assert_eq!(json["processedCount"], 1);
        assert_eq!(json["outcomes"][0]["outcome"]["type"], "deleteFailed");
        assert!(json.get("finishedAt").is_none());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(RowOutcome::Deleted.to_string(), "deleted");
        assert_eq!(
            RowOutcome::DeleteFailed {
                code: -10,
                message: "denied".to_string()
            }
            .to_string(),
            "delete failed (-10: denied)"
        );
    }
}
