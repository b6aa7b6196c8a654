//! Reconciliation engine — the per-row sanitize/lookup/delete loop
//!
//! A run opens one directory session, acquires one query cursor and one
//! catalog handle, walks the rows in order, and tears the session down
//! exactly once. Two scopes nest:
//!
//! - the **row scope** turns every `Err` from sanitize, lookup, or delete
//!   into a `RowOutcome`, so one bad row never stops the batch;
//! - the **run scope** wraps the whole loop and releases every handle the run
//!   acquired, then closes the session, on every exit path. A panic escaping
//!   the loop is caught just long enough to tear down, then resumed.

use crate::directory::{
    CatalogKey, DirectoryClient, DirectorySession, LookupQuery, ResourceHandle,
};
use crate::error::{ReconError, Result};
use crate::logger::{RunLogger, TracingLogger};
use crate::report::{JobReport, RowOutcome};
use crate::sanitize::{escape_literal, KeySanitizer, SanitizerPolicy};
use crate::types::{ConnectionParams, InputRow};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Level;

/// Reason recorded when either key fails validation
pub const SKIP_REASON: &str = "invalid or missing key";

/// Message recorded when a matched entry cannot be resolved by key
pub const UNRESOLVED_MESSAGE: &str = "could not retrieve object";

/// Per-run engine options
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Sanitizer charset and length limit
    pub policy: SanitizerPolicy,

    /// Resolve matches but skip the delete
    pub dry_run: bool,

    /// Lookup query shape
    pub lookup: LookupQuery,
}

type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Sequential batch reconciliation engine
pub struct ReconciliationEngine {
    sanitizer: KeySanitizer,
    options: EngineOptions,
    logger: Arc<dyn RunLogger>,
    cancel: Option<CancelCheck>,
}

impl ReconciliationEngine {
    /// Create an engine logging through `tracing`
    pub fn new(options: EngineOptions) -> Self {
        Self {
            sanitizer: KeySanitizer::new(options.policy),
            options,
            logger: Arc::new(TracingLogger::new()),
            cancel: None,
        }
    }

    /// Replace the run logger
    pub fn with_logger(mut self, logger: Arc<dyn RunLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Install a cancellation check, polled before every row
    ///
    /// When it returns `true` the run stops, tears down, and returns the
    /// partial report with `cancelled` set.
    pub fn with_cancel_check(mut self, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.cancel = Some(Arc::new(check));
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Open a session with `params` and close it again
    ///
    /// The full rejection detail goes to the run logger under a
    /// `check-<uuid>` id; callers show the returned error's
    /// `user_message()`.
    pub async fn test_connection(
        &self,
        client: &dyn DirectoryClient,
        params: &ConnectionParams,
    ) -> Result<()> {
        let job = format!("check-{}", uuid::Uuid::new_v4());
        self.log(
            &job,
            Level::INFO,
            format!(
                "Testing {} directory connection to {} ({})",
                client.name(),
                params.server,
                params.company_db
            ),
        );

        let mut session = match client.open(params).await {
            Ok(session) => session,
            Err(e) => {
                self.log(&job, Level::ERROR, format!("Connection test failed: {}", e));
                return Err(e);
            }
        };

        if let Err(e) = session.close().await {
            self.log(&job, Level::WARN, format!("Failed to close directory session: {}", e));
            return Err(e);
        }
        self.log(&job, Level::INFO, "Connection test succeeded".to_string());
        Ok(())
    }

    /// Run one job over `rows`
    ///
    /// `on_progress` receives `floor(processed * 100 / total)` after every
    /// row. A session open failure is returned before any row is touched.
    pub async fn run<F>(
        &self,
        rows: &[InputRow],
        client: &dyn DirectoryClient,
        params: &ConnectionParams,
        mut on_progress: F,
    ) -> Result<JobReport>
    where
        F: FnMut(u8) + Send,
    {
        let mut report = JobReport::new(rows.len());
        let job = report.id.clone();
        self.log(
            &job,
            Level::INFO,
            format!(
                "Starting job with {} rows ({} directory{})",
                rows.len(),
                client.name(),
                if self.options.dry_run { ", dry run" } else { "" }
            ),
        );

        let mut session = match client.open(params).await {
            Ok(session) => session,
            Err(e) => {
                self.log(&job, Level::ERROR, format!("Could not open directory session: {}", e));
                return Err(e);
            }
        };
        self.log(&job, Level::INFO, "Connected to directory".to_string());

        let mut ledger = ResourceLedger::default();
        let outcome = AssertUnwindSafe(self.process_rows(
            session.as_mut(),
            &mut ledger,
            rows,
            &mut report,
            &mut on_progress,
        ))
        .catch_unwind()
        .await;

        self.teardown(&job, session.as_mut(), &mut ledger).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.log(
                    &job,
                    Level::ERROR,
                    format!(
                        "Job aborted after {} of {} rows: {}",
                        report.processed_count, report.total_rows, e
                    ),
                );
                return Err(e);
            }
            Err(panic) => {
                self.log(
                    &job,
                    Level::ERROR,
                    format!(
                        "Job aborted by an unexpected fault after {} of {} rows",
                        report.processed_count, report.total_rows
                    ),
                );
                std::panic::resume_unwind(panic);
            }
        }

        report.finish();
        let counts = report.counts();
        let deleted = if self.options.dry_run {
            format!("{} would be deleted", counts.would_delete)
        } else {
            format!("{} deleted", counts.deleted)
        };
        self.log(
            &job,
            Level::INFO,
            format!(
                "Job {}: {}, {} not found, {} skipped, {} delete failures, {} row errors",
                if report.cancelled { "cancelled" } else { "completed" },
                deleted,
                counts.not_found,
                counts.skipped,
                counts.delete_failed,
                counts.row_errors
            ),
        );
        Ok(report)
    }

    async fn process_rows(
        &self,
        session: &mut dyn DirectorySession,
        ledger: &mut ResourceLedger,
        rows: &[InputRow],
        report: &mut JobReport,
        on_progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<()> {
        let job = report.id.clone();
        let cursor = session.open_cursor().await?;
        ledger.track(cursor.clone());
        let catalog = session.open_catalog().await?;
        ledger.track(catalog.clone());

        for row in rows {
            if self.is_cancelled() {
                report.cancelled = true;
                self.log(
                    &job,
                    Level::WARN,
                    format!("Cancellation requested before row {}", row.index),
                );
                break;
            }

            let outcome = match self.process_row(&job, session, &cursor, &catalog, row).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = e.to_string();
                    self.log(
                        &job,
                        Level::ERROR,
                        format!("Row {}: Error processing row. {}", row.index, message),
                    );
                    RowOutcome::RowError { message }
                }
            };

            report.record(row.index, outcome);
            on_progress(report.progress());

            // yield between rows
            tokio::task::yield_now().await;
        }

        Ok(())
    }

    async fn process_row(
        &self,
        job: &str,
        session: &mut dyn DirectorySession,
        cursor: &ResourceHandle,
        catalog: &ResourceHandle,
        row: &InputRow,
    ) -> Result<RowOutcome> {
        let card = self.sanitizer.validate(row.card_key.as_deref());
        let item = self.sanitizer.validate(row.item_key.as_deref());
        let (Some(card), Some(item)) = (card, item) else {
            // raw cells stay out of the log
            self.log(
                job,
                Level::WARN,
                format!("Row {}: Skipped, invalid or missing key", row.index),
            );
            return Ok(RowOutcome::Skipped {
                reason: SKIP_REASON.to_string(),
            });
        };

        let lookup = &self.options.lookup;
        let sql = lookup.render(&escape_literal(&card), &escape_literal(&item));
        let records = session.query(cursor, &sql).await?;

        if records.row_count() == 0 {
            self.log(
                job,
                Level::INFO,
                format!("Row {}: No catalog entry found for {}-{}.", row.index, card, item),
            );
            return Ok(RowOutcome::NotFound);
        }

        let substitute = records
            .field(&lookup.substitute_field)
            .ok_or_else(|| ReconError::Directory {
                code: -1,
                message: format!("Lookup result has no '{}' field", lookup.substitute_field),
            })?;
        let key = CatalogKey {
            item_key: item.to_string(),
            card_key: card.to_string(),
            substitute: substitute.to_string(),
        };

        if !session.find_catalog_entry(catalog, &key).await? {
            self.log(
                job,
                Level::WARN,
                format!(
                    "Row {}: Could not retrieve object for {}-{}",
                    row.index, card, item
                ),
            );
            return Ok(RowOutcome::RowError {
                message: UNRESOLVED_MESSAGE.to_string(),
            });
        }

        if self.options.dry_run {
            self.log(
                job,
                Level::INFO,
                format!("Row {}: Would delete catalog entry for {}-{}.", row.index, card, item),
            );
            return Ok(RowOutcome::WouldDelete);
        }

        let code = session.delete(catalog).await?;
        if code != 0 {
            let fault = session.last_error();
            let code = if fault.code != 0 { fault.code } else { code };
            self.log(
                job,
                Level::ERROR,
                format!(
                    "Row {}: Error deleting catalog entry for {}-{}. Error {}: {}",
                    row.index, card, item, code, fault.message
                ),
            );
            return Ok(RowOutcome::DeleteFailed {
                code,
                message: fault.message,
            });
        }

        self.log(
            job,
            Level::INFO,
            format!(
                "Row {}: Successfully deleted catalog entry for {}-{}.",
                row.index, card, item
            ),
        );
        Ok(RowOutcome::Deleted)
    }

    /// Release every tracked handle, newest first, then close the session
    async fn teardown(
        &self,
        job: &str,
        session: &mut dyn DirectorySession,
        ledger: &mut ResourceLedger,
    ) {
        for handle in ledger.drain() {
            if let Err(e) = session.release(handle.clone()).await {
                self.log(
                    job,
                    Level::WARN,
                    format!("Failed to release {:?} handle {}: {}", handle.kind(), handle.id(), e),
                );
            }
        }

        match session.close().await {
            Ok(()) => self.log(job, Level::INFO, "Disconnected from directory".to_string()),
            Err(e) => self.log(job, Level::WARN, format!("Failed to close directory session: {}", e)),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|check| check())
    }

    fn log(&self, job: &str, level: Level, message: String) {
        self.logger.log(level, job, &message);
    }
}

/// Handles acquired during a run, in acquisition order
#[derive(Debug, Default)]
struct ResourceLedger {
    handles: Vec<ResourceHandle>,
}

impl ResourceLedger {
    fn track(&mut self, handle: ResourceHandle) {
        self.handles.push(handle);
    }

    /// Take all handles, newest first; a second drain yields nothing
    fn drain(&mut self) -> Vec<ResourceHandle> {
        let mut handles = std::mem::take(&mut self.handles);
        handles.reverse();
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::{MemoryDirectory, QueryFault};
    use crate::directory::{DirectoryFault, ResourceKind};
    use crate::logger::MemoryLogger;
    use crate::sanitize::Charset;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn row(index: usize, card: &str, item: &str) -> InputRow {
        InputRow::new(index, Some(card), Some(item))
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(EngineOptions::default())
    }

    #[test]
    fn test_ledger_drains_newest_first_once() {
        let mut ledger = ResourceLedger::default();
        ledger.track(ResourceHandle::new(1, ResourceKind::QueryCursor));
        ledger.track(ResourceHandle::new(2, ResourceKind::Catalog));

        let ids: Vec<u64> = ledger.drain().iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!(ledger.drain().is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_outcomes() {
        let dir = MemoryDirectory::new().with_entry("C1", "I1", "S1");
        let rows = vec![
            row(1, "C1", "I1"),
            InputRow::new(2, Some(""), Some("I2")),
            row(3, "C3", "I3"),
        ];
        let mut progress = Vec::new();

        let report = engine()
            .run(&rows, &dir, &ConnectionParams::default(), |p| progress.push(p))
            .await
            .unwrap();

        let outcomes: Vec<RowOutcome> = report.outcomes.iter().map(|r| r.outcome.clone()).collect();
        assert_eq!(
            outcomes,
            vec![
                RowOutcome::Deleted,
                RowOutcome::Skipped {
                    reason: SKIP_REASON.to_string()
                },
                RowOutcome::NotFound,
            ]
        );
        assert_eq!(report.processed_count, 3);
        assert_eq!(progress, vec![33, 66, 100]);
        assert!(report.finished_at.is_some());
        assert!(dir.entries().is_empty());
    }

    #[tokio::test]
    async fn test_injection_key_is_skipped_and_not_logged() {
        let dir = MemoryDirectory::new().with_entry("C1", "I1", "S1");
        let logger = Arc::new(MemoryLogger::new());
        let engine = engine().with_logger(logger.clone());

        let rows = vec![row(1, "ABC;DROP", "I1")];
        let report = engine
            .run(&rows, &dir, &ConnectionParams::default(), |_| {})
            .await
            .unwrap();

        assert!(matches!(report.outcome(1), Some(RowOutcome::Skipped { .. })));
        assert!(!logger.contains("ABC;DROP"));
        assert!(logger.contains("Row 1: Skipped"));
        assert_eq!(dir.stats().queries, 0);
        assert_eq!(dir.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_row_error_does_not_abort_batch() {
        let mut dir = MemoryDirectory::new();
        for i in 1..=10 {
            dir = dir.with_entry(&format!("C{}", i), &format!("I{}", i), "S");
        }
        let dir = dir.fault_on_query(5, QueryFault::Error(DirectoryFault::new(-10, "Timeout")));
        let rows: Vec<InputRow> = (1..=10)
            .map(|i| row(i, &format!("C{}", i), &format!("I{}", i)))
            .collect();

        let report = engine()
            .run(&rows, &dir, &ConnectionParams::default(), |_| {})
            .await
            .unwrap();

        assert_eq!(report.processed_count, 10);
        for i in (1..=10).filter(|i| *i != 5) {
            assert_eq!(report.outcome(i), Some(&RowOutcome::Deleted), "row {}", i);
        }
        assert!(matches!(
            report.outcome(5),
            Some(RowOutcome::RowError { message }) if message.contains("Timeout")
        ));
        assert_eq!(dir.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_progress_is_floor_and_monotonic() {
        let dir = MemoryDirectory::new();
        let rows: Vec<InputRow> = (1..=7).map(|i| row(i, "C", "I")).collect();
        let mut progress = Vec::new();

        engine()
            .run(&rows, &dir, &ConnectionParams::default(), |p| progress.push(p))
            .await
            .unwrap();

        let expected: Vec<u8> = (1..=7).map(|i| (i * 100 / 7) as u8).collect();
        assert_eq!(progress, expected);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_delete_failure_uses_last_error() {
        let dir = MemoryDirectory::new()
            .with_entry("C1", "I1", "S1")
            .failing_delete("C1", "I1", -5002, "Entry is referenced by a document");
        let report = engine()
            .run(&[row(1, "C1", "I1")], &dir, &ConnectionParams::default(), |_| {})
            .await
            .unwrap();

        assert_eq!(
            report.outcome(1),
            Some(&RowOutcome::DeleteFailed {
                code: -5002,
                message: "Entry is referenced by a document".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_unresolvable_entry_is_row_error() {
        let dir = MemoryDirectory::new()
            .with_entry("C1", "I1", "S1")
            .unresolvable("C1", "I1");
        let report = engine()
            .run(&[row(1, "C1", "I1")], &dir, &ConnectionParams::default(), |_| {})
            .await
            .unwrap();

        assert_eq!(
            report.outcome(1),
            Some(&RowOutcome::RowError {
                message: UNRESOLVED_MESSAGE.to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_fatal_and_surfaced() {
        let dir = MemoryDirectory::new().rejecting_connections(-132, "Error during SBO user authentication");
        let calls = AtomicUsize::new(0);

        let err = engine()
            .run(&[row(1, "C1", "I1")], &dir, &ConnectionParams::default(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ReconError::Connection { code: -132, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dir.stats().close_calls, 0);
    }

    #[tokio::test]
    async fn test_release_exactly_once_on_normal_completion() {
        let dir = MemoryDirectory::new()
            .with_entry("C1", "I1", "S1")
            .with_entry("C2", "I2", "S2");
        let rows = vec![row(1, "C1", "I1"), row(2, "C2", "I2"), row(3, "C9", "I9")];

        engine()
            .run(&rows, &dir, &ConnectionParams::default(), |_| {})
            .await
            .unwrap();

        let stats = dir.stats();
        // one cursor and one catalog handle for the whole run
        assert_eq!(stats.acquired.len(), 2);
        assert!(stats.all_released_once());
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.close_calls, 1);
    }

    #[tokio::test]
    async fn test_release_exactly_once_when_fault_escapes_loop() {
        let dir = MemoryDirectory::new()
            .with_entry("C1", "I1", "S1")
            .with_entry("C2", "I2", "S2")
            .with_entry("C3", "I3", "S3")
            .fault_on_query(3, QueryFault::Panic("adapter crashed".to_string()));
        let rows: Vec<InputRow> = (1..=5)
            .map(|i| row(i, &format!("C{}", i), &format!("I{}", i)))
            .collect();
        let engine = engine();

        let result = AssertUnwindSafe(engine.run(&rows, &dir, &ConnectionParams::default(), |_| {}))
            .catch_unwind()
            .await;

        assert!(result.is_err());
        let stats = dir.stats();
        assert_eq!(stats.acquired.len(), 2);
        assert!(stats.all_released_once());
        assert!(stats.outstanding().is_empty());
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.close_calls, 1);
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_report() {
        let dir = MemoryDirectory::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let engine = engine().with_cancel_check(move || counter.load(Ordering::SeqCst) >= 2);
        let rows: Vec<InputRow> = (1..=5).map(|i| row(i, "C", "I")).collect();

        let report = engine
            .run(&rows, &dir, &ConnectionParams::default(), |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.processed_count, 2);
        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.is_complete());
        assert!(dir.stats().all_released_once());
        assert_eq!(dir.stats().closes, 1);
    }

    #[tokio::test]
    async fn test_dry_run_never_deletes() {
        let dir = MemoryDirectory::new().with_entry("C1", "I1", "S1");
        let engine = ReconciliationEngine::new(EngineOptions {
            dry_run: true,
            ..Default::default()
        });

        let report = engine
            .run(&[row(1, "C1", "I1")], &dir, &ConnectionParams::default(), |_| {})
            .await
            .unwrap();

        assert_eq!(report.outcome(1), Some(&RowOutcome::WouldDelete));
        assert_eq!(dir.entries().len(), 1);
        assert_eq!(dir.stats().deletes, 0);
        assert!(dir.stats().all_released_once());
    }

    #[tokio::test]
    async fn test_dry_run_summary_counts_would_delete_separately() {
        let dir = MemoryDirectory::new()
            .with_entry("C1", "I1", "S1")
            .with_entry("C2", "I2", "S2");
        let logger = Arc::new(MemoryLogger::new());
        let engine = ReconciliationEngine::new(EngineOptions {
            dry_run: true,
            ..Default::default()
        })
        .with_logger(logger.clone());

        engine
            .run(
                &[row(1, "C1", "I1"), row(2, "C2", "I2")],
                &dir,
                &ConnectionParams::default(),
                |_| {},
            )
            .await
            .unwrap();

        assert!(logger.contains("Job completed: 2 would be deleted, 0 not found"));
        assert!(!logger.contains("2 deleted"));
    }

    #[tokio::test]
    async fn test_relaxed_policy_allows_dotted_keys() {
        let dir = MemoryDirectory::new().with_entry("C.1", "ITEM 1", "S1");
        let rows = vec![row(1, "C.1", "ITEM 1")];

        let strict = engine()
            .run(&rows, &dir, &ConnectionParams::default(), |_| {})
            .await
            .unwrap();
        assert!(matches!(strict.outcome(1), Some(RowOutcome::Skipped { .. })));

        let relaxed = ReconciliationEngine::new(EngineOptions {
            policy: SanitizerPolicy {
                charset: Charset::Relaxed,
                ..Default::default()
            },
            ..Default::default()
        });
        let report = relaxed
            .run(&rows, &dir, &ConnectionParams::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(report.outcome(1), Some(&RowOutcome::Deleted));
    }

    #[tokio::test]
    async fn test_empty_table_completes() {
        let dir = MemoryDirectory::new();
        let mut calls = 0;
        let report = engine()
            .run(&[], &dir, &ConnectionParams::default(), |_| calls += 1)
            .await
            .unwrap();

        assert_eq!(calls, 0);
        assert_eq!(report.total_rows, 0);
        assert_eq!(report.progress(), 100);
        assert_eq!(dir.stats().closes, 1);
    }

    #[tokio::test]
    async fn test_live_handles_stay_bounded_across_rows() {
        let mut dir = MemoryDirectory::new();
        for i in 1..=200 {
            dir = dir.with_entry(&format!("C{}", i), &format!("I{}", i), "S");
        }
        let rows: Vec<InputRow> = (1..=200)
            .map(|i| row(i, &format!("C{}", i), &format!("I{}", i)))
            .collect();
        let watch = dir.clone();
        let mut max_live = 0;

        let report = engine()
            .run(&rows, &dir, &ConnectionParams::default(), |_| {
                max_live = max_live.max(watch.stats().outstanding().len());
            })
            .await
            .unwrap();

        assert_eq!(report.counts().deleted, 200);
        assert!(max_live <= 2, "live handles peaked at {}", max_live);
        assert_eq!(dir.stats().acquired.len(), 2);
        assert!(dir.stats().all_released_once());
    }

    #[tokio::test]
    async fn test_custom_lookup_shape_reaches_directory() {
        let lookup = LookupQuery {
            table: "OSCN2".to_string(),
            substitute_field: "Alternate".to_string(),
            card_field: "Partner".to_string(),
            item_field: "Sku".to_string(),
        };
        let dir = MemoryDirectory::new()
            .with_lookup(lookup.clone())
            .with_entry("C1", "I1", "S1");
        let engine = ReconciliationEngine::new(EngineOptions {
            lookup,
            ..Default::default()
        });

        let report = engine
            .run(
                &[row(1, "C1", "I1"), row(2, "C2", "I2")],
                &dir,
                &ConnectionParams::default(),
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(report.outcome(1), Some(&RowOutcome::Deleted));
        assert_eq!(report.outcome(2), Some(&RowOutcome::NotFound));
        assert!(dir.entries().is_empty());
    }

    #[tokio::test]
    async fn test_every_line_carries_the_job_id() {
        let dir = MemoryDirectory::new().with_entry("C1", "I1", "S1");
        let logger = Arc::new(MemoryLogger::new());
        let engine = engine().with_logger(logger.clone());

        let report = engine
            .run(
                &[row(1, "C1", "I1"), InputRow::new(2, None, Some("I2"))],
                &dir,
                &ConnectionParams::default(),
                |_| {},
            )
            .await
            .unwrap();

        let lines = logger.lines();
        assert!(lines.len() >= 4);
        assert!(lines.iter().all(|line| line.job_id == report.id));
    }

    #[tokio::test]
    async fn test_connection_check_opens_and_closes() {
        let dir = MemoryDirectory::new();
        let logger = Arc::new(MemoryLogger::new());
        let engine = engine().with_logger(logger.clone());

        tokio_test::assert_ok!(
            engine
                .test_connection(&dir, &ConnectionParams::default())
                .await
        );

        let stats = dir.stats();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.closes, 1);
        assert!(stats.acquired.is_empty());
        assert!(logger.contains("Connection test succeeded"));
        assert!(logger.lines().iter().all(|l| l.job_id.starts_with("check-")));
    }

    #[tokio::test]
    async fn test_connection_check_rejection_keeps_detail_in_log() {
        let dir = MemoryDirectory::new()
            .rejecting_connections(-4008, "Database server type not supported by host");
        let logger = Arc::new(MemoryLogger::new());
        let engine = engine().with_logger(logger.clone());

        let err = engine
            .test_connection(&dir, &ConnectionParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconError::Connection { code: -4008, .. }));
        assert!(!err.user_message().contains("host"));
        assert!(logger.contains("Database server type not supported by host"));
        assert_eq!(dir.stats().close_calls, 0);
    }
}
