//! Backfill orchestrator - main workflow coordinator.
//!
//! Packages run one after another. Within a package, batches are scheduled in
//! ascending order through a task set capped at `concurrency`; they may finish in
//! any order. The first batch error aborts the rest of the package and fails
//! the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, debug_span, error, info, warn, Instrument};

use crate::config::Config;
use crate::core::{plan_batches, BatchRange};
use crate::drivers::{ClickHouseClient, ClickHouseSink, PgSource};
use crate::error::{BackfillError, Result};
use crate::package::{BackfillPackage, PackageContext, PackageRegistry};
use crate::progress::{CompletionTracker, ProgressStore, ProgressTracker};
use crate::sink::{MetricSink, SinkWriter, DEFAULT_INSERT_BATCH_SIZE};

/// Run parameters. Everything a single invocation can change without
/// touching the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationParams {
    /// Batches in flight per package.
    pub concurrency: usize,
    /// Events per sink insert.
    pub insert_batch_size: usize,
    /// Skip this many leading batches of every selected package. Takes
    /// precedence over saved progress.
    pub start_from: Option<usize>,
    /// Package names to run; `None` runs every registered package.
    pub packages: Option<Vec<String>>,
    /// Log instead of inserting.
    pub dry_run: bool,
    /// Continue from the saved progress file.
    pub auto_resume: bool,
    /// Run at most this many batches per package.
    pub limit_batches: Option<usize>,
}

impl Default for MigrationParams {
    fn default() -> Self {
        Self {
            concurrency: 1,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            start_from: None,
            packages: None,
            dry_run: false,
            auto_resume: false,
            limit_batches: None,
        }
    }
}

impl MigrationParams {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BackfillError::Config("concurrency must be at least 1".into()));
        }
        if self.insert_batch_size == 0 {
            return Err(BackfillError::Config(
                "insert_batch_size must be at least 1".into(),
            ));
        }
        if self.limit_batches == Some(0) {
            return Err(BackfillError::Config("limit_batches must be at least 1".into()));
        }
        Ok(())
    }
}

/// Per-package lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Pending,
    Ranging,
    Skipped,
    Planning,
    Running,
    Completed,
    Failed,
}

/// Outcome of one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageReport {
    pub name: String,
    pub status: PackageStatus,
    /// Batches in the full plan.
    pub batches_total: usize,
    /// Batches completed by this run.
    pub batches_run: usize,
    /// Leading batches skipped because of `start_from` or saved progress.
    pub resume_offset: usize,
    pub metrics_emitted: u64,
    pub duration_seconds: f64,
}

impl PackageReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: PackageStatus::Pending,
            batches_total: 0,
            batches_run: 0,
            resume_offset: 0,
            metrics_emitted: 0,
            duration_seconds: 0.0,
        }
    }

    /// Whether every planned batch has now been run, across this and earlier runs.
    pub fn is_whole(&self) -> bool {
        match self.status {
            PackageStatus::Skipped => true,
            PackageStatus::Completed => self.resume_offset + self.batches_run >= self.batches_total,
            _ => false,
        }
    }
}

/// Result of a backfill run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Whether sink inserts were replaced by log lines.
    pub dry_run: bool,

    /// One report per selected package, in run order.
    pub packages: Vec<PackageReport>,

    /// Total metric events produced.
    pub metrics_emitted: u64,
}

impl BackfillResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

struct BatchOutcome {
    index: usize,
    range: BatchRange,
    metrics: usize,
    elapsed: Duration,
}

/// Backfill orchestrator.
pub struct Orchestrator {
    registry: PackageRegistry,
    ctx: PackageContext,
    sink: Arc<dyn MetricSink>,
    progress: Arc<ProgressStore>,
}

impl Orchestrator {
    pub fn new(
        registry: PackageRegistry,
        ctx: PackageContext,
        sink: Arc<dyn MetricSink>,
        progress: Arc<ProgressStore>,
    ) -> Self {
        Self {
            registry,
            ctx,
            sink,
            progress,
        }
    }

    /// Connect to the stores named in `config`.
    pub async fn connect(config: &Config, registry: PackageRegistry) -> Result<Self> {
        let relational = Arc::new(PgSource::connect(&config.source).await?);

        let timeout = config.backfill.request_timeout();
        let columnar = Arc::new(ClickHouseClient::new(config.columnar.clone(), timeout)?);
        let sink_client = ClickHouseClient::new(config.sink.connection.clone(), timeout)?;
        let sink = Arc::new(ClickHouseSink::new(sink_client, config.sink.table.as_str())?);
        info!(
            "Sink: {} table {}.{}",
            config.sink.connection.url, config.sink.connection.database, config.sink.table
        );

        let ctx = PackageContext::new(relational, columnar, config.backfill.cutoff)
            .with_retry(config.backfill.retry_policy());
        let progress = Arc::new(ProgressStore::new(&config.backfill.progress_file));

        Ok(Self::new(registry, ctx, sink, progress))
    }

    /// Run the backfill.
    pub async fn run(&self, params: &MigrationParams) -> Result<BackfillResult> {
        params.validate()?;
        let selected = self.registry.select(params.packages.as_deref())?;

        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let timer = Instant::now();

        info!(
            "Starting backfill run {} ({} packages, cutoff {}, concurrency {}{})",
            run_id,
            selected.len(),
            self.ctx.cutoff,
            params.concurrency,
            if params.dry_run { ", dry run" } else { "" }
        );

        let saved = self.progress.load().await;
        let saved = if params.auto_resume || saved.is_empty() {
            saved
        } else {
            warn!(
                "Ignoring saved progress in {} (auto resume is off): {:?}",
                self.progress.path().display(),
                saved
            );
            BTreeMap::new()
        };

        let writer = SinkWriter::new(self.sink.clone(), params.insert_batch_size, self.ctx.retry)
            .with_dry_run(params.dry_run);

        let mut reports = Vec::with_capacity(selected.len());
        for package in selected {
            let saved_index = saved.get(package.name()).copied();
            match self.run_package(package.clone(), params, saved_index, &writer).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Package {} failed: {}", package.name(), e);
                    return Err(e);
                }
            }
        }

        if params.dry_run {
            if !self.progress.load().await.is_empty() {
                warn!(
                    "Dry run left progress in {}; a later run with auto resume would skip \
                     batches that were never inserted (use `reset` first)",
                    self.progress.path().display()
                );
            }
        } else if reports.iter().all(PackageReport::is_whole) {
            match self.progress.clear().await {
                Ok(true) => debug!("Removed progress file {}", self.progress.path().display()),
                Ok(false) => {}
                Err(e) => warn!("Failed to remove progress file: {}", e),
            }
        } else {
            info!("Batch limit reached; keeping progress file for the next run");
        }

        let metrics_emitted = reports.iter().map(|r| r.metrics_emitted).sum();
        let result = BackfillResult {
            run_id,
            status: "completed".to_string(),
            started_at,
            completed_at: Utc::now(),
            duration_seconds: timer.elapsed().as_secs_f64(),
            dry_run: params.dry_run,
            packages: reports,
            metrics_emitted,
        };

        info!(
            "Backfill complete: {} metrics in {:.1}s",
            result.metrics_emitted, result.duration_seconds
        );
        Ok(result)
    }

    async fn run_package(
        &self,
        package: Arc<dyn BackfillPackage>,
        params: &MigrationParams,
        saved_index: Option<usize>,
        writer: &SinkWriter,
    ) -> Result<PackageReport> {
        let name = package.name().to_string();
        let timer = Instant::now();
        let mut report = PackageReport::new(&name);

        report.status = PackageStatus::Ranging;
        let range = package.resolve(&self.ctx).await?;
        if range.is_empty() {
            info!("{}: no rows before cutoff, skipping", name);
            report.status = PackageStatus::Skipped;
            report.duration_seconds = timer.elapsed().as_secs_f64();
            return Ok(report);
        }

        report.status = PackageStatus::Planning;
        let plan = plan_batches(range.start, range.end, package.batch_width());
        report.batches_total = plan.len();

        let offset = params.start_from.or(saved_index).unwrap_or(0).min(plan.len());
        let end = match params.limit_batches {
            Some(limit) => offset.saturating_add(limit).min(plan.len()),
            None => plan.len(),
        };
        report.resume_offset = offset;

        info!(
            "{}: range {} in {} batches of {}{}",
            name,
            range,
            plan.len(),
            package.batch_width(),
            if offset > 0 {
                format!(", resuming at batch {}", offset)
            } else {
                String::new()
            }
        );

        report.status = PackageStatus::Running;
        let mut run = PackageRun {
            tracker: ProgressTracker::new(&name, end - offset).with_concurrency(params.concurrency),
            completion: CompletionTracker::new(offset),
            report,
            name,
        };
        let mut tasks: JoinSet<Result<BatchOutcome>> = JoinSet::new();

        for (index, batch) in plan.iter().copied().enumerate().take(end).skip(offset) {
            // A slot frees only once its outcome is in hand, so a failed
            // batch is always seen before the next one is spawned.
            while tasks.len() >= params.concurrency {
                let Some(joined) = tasks.join_next().await else {
                    break;
                };
                match batch_outcome(&run.name, joined) {
                    Ok(outcome) => self.record_batch(&mut run, outcome).await,
                    Err(e) => return Err(self.abort_package(&mut run, &mut tasks, e).await),
                }
            }
            while let Some(joined) = tasks.try_join_next() {
                match batch_outcome(&run.name, joined) {
                    Ok(outcome) => self.record_batch(&mut run, outcome).await,
                    Err(e) => return Err(self.abort_package(&mut run, &mut tasks, e).await),
                }
            }

            let package = package.clone();
            let ctx = self.ctx.clone();
            let writer = writer.clone();
            let span = debug_span!("batch", package = %run.name, index);
            tasks.spawn(
                async move {
                    let started = Instant::now();

                    let emitter = package.run_batch(&ctx, batch).await?;
                    let skipped = emitter.skipped_rows();
                    let events = emitter.into_events();
                    let metrics = writer.flush(&events).await?;

                    if skipped > 0 {
                        debug!("{}: batch {} skipped {} rows", package.name(), batch, skipped);
                    }
                    Ok::<_, BackfillError>(BatchOutcome {
                        index,
                        range: batch,
                        metrics,
                        elapsed: started.elapsed(),
                    })
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match batch_outcome(&run.name, joined) {
                Ok(outcome) => self.record_batch(&mut run, outcome).await,
                Err(e) => return Err(self.abort_package(&mut run, &mut tasks, e).await),
            }
        }

        let mut report = run.report;
        report.status = PackageStatus::Completed;
        report.duration_seconds = timer.elapsed().as_secs_f64();
        info!(
            "{}: completed {} batches, {} metrics in {:.1}s",
            run.name, report.batches_run, report.metrics_emitted, report.duration_seconds
        );
        Ok(report)
    }

    async fn record_batch(&self, run: &mut PackageRun, outcome: BatchOutcome) {
        debug!(
            "{}: batch #{} {} done ({} metrics)",
            run.name, outcome.index, outcome.range, outcome.metrics
        );
        run.tracker.record_batch(outcome.metrics, outcome.elapsed);
        run.tracker.log();
        run.report.batches_run += 1;
        run.report.metrics_emitted += outcome.metrics as u64;

        if let Some(resume_index) = run.completion.complete(outcome.index) {
            self.progress.checkpoint(&run.name, resume_index).await;
        }
    }

    /// Stop the remaining batches after `err`. Batches that already finished
    /// are still recorded so the saved progress covers them.
    async fn abort_package(
        &self,
        run: &mut PackageRun,
        tasks: &mut JoinSet<Result<BatchOutcome>>,
        err: BackfillError,
    ) -> BackfillError {
        error!("{}: batch failed: {}", run.name, err);
        run.report.status = PackageStatus::Failed;
        tasks.abort_all();

        while let Some(joined) = tasks.join_next().await {
            if let Ok(Ok(outcome)) = joined {
                self.record_batch(run, outcome).await;
            }
        }
        if run.completion.out_of_order() > 0 {
            warn!(
                "{}: {} completed batches lie past the first gap and will run again on resume",
                run.name,
                run.completion.out_of_order()
            );
        }
        err
    }
}

struct PackageRun {
    name: String,
    tracker: ProgressTracker,
    completion: CompletionTracker,
    report: PackageReport,
}

fn batch_outcome(
    name: &str,
    joined: std::result::Result<Result<BatchOutcome>, JoinError>,
) -> Result<BatchOutcome> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(BackfillError::package(name, format!("batch task failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityMetricEvent, MetricEmitter};
    use crate::package::MigrationPackage;
    use crate::resolver::testing::{FakeColumnar, FakeRelational};
    use crate::retry::RetryPolicy;
    use crate::sink::testing::MemorySink;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    /// Package over a fixed id range emitting one event per id.
    struct Scripted {
        name: &'static str,
        range: BatchRange,
        width: u64,
        fail_at: Option<i64>,
        slow: Option<Duration>,
        queried: Mutex<Vec<BatchRange>>,
    }

    impl Scripted {
        fn new(name: &'static str, range: BatchRange, width: u64) -> Self {
            Self {
                name,
                range,
                width,
                fail_at: None,
                slow: None,
                queried: Mutex::new(Vec::new()),
            }
        }

        fn queried(&self) -> Vec<BatchRange> {
            let mut ranges = self.queried.lock().unwrap().clone();
            ranges.sort_by_key(|r| r.start);
            ranges.dedup();
            ranges
        }
    }

    #[async_trait]
    impl MigrationPackage for Scripted {
        type Row = i64;

        fn name(&self) -> &str {
            self.name
        }

        fn query_batch_size(&self) -> u64 {
            self.width
        }

        async fn range(&self, _ctx: &PackageContext) -> Result<BatchRange> {
            Ok(self.range)
        }

        async fn query(&self, _ctx: &PackageContext, range: BatchRange) -> Result<Vec<i64>> {
            self.queried.lock().unwrap().push(range);
            if self.fail_at == Some(range.start) {
                tokio::time::sleep(Duration::from_millis(50)).await;
                return Err(BackfillError::Row("canceling statement due to timeout".into()));
            }
            if let Some(delay) = self.slow {
                if range.start != self.range.start {
                    tokio::time::sleep(delay).await;
                }
            }
            Ok((range.start..=range.end).collect())
        }

        async fn process(
            &self,
            ctx: &PackageContext,
            rows: Vec<i64>,
            emitter: &mut MetricEmitter,
        ) -> Result<()> {
            emitter.emit_all(
                rows.into_iter()
                    .map(|id| EntityMetricEvent::count("item", id, 1, "count", ctx.cutoff)),
            );
            Ok(())
        }
    }

    struct Harness {
        _dir: TempDir,
        sink: Arc<MemorySink>,
        progress: Arc<ProgressStore>,
        orchestrator: Orchestrator,
    }

    fn harness(packages: Vec<Arc<Scripted>>) -> Harness {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::default());
        let progress = Arc::new(ProgressStore::new(dir.path().join("progress.json")));

        let mut registry = PackageRegistry::new();
        for package in packages {
            registry.register_arc(package);
        }
        let ctx = PackageContext::new(
            Arc::new(FakeRelational::empty()),
            Arc::new(FakeColumnar::empty()),
            Utc::now(),
        )
        .with_retry(RetryPolicy::immediate(3));

        let orchestrator = Orchestrator::new(registry, ctx, sink.clone(), progress.clone());
        Harness {
            _dir: dir,
            sink,
            progress,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_runs_every_batch_and_clears_progress() {
        let package = Arc::new(Scripted::new("items", BatchRange::new(1, 2500), 1000));
        let h = harness(vec![package.clone()]);

        let params = MigrationParams {
            concurrency: 2,
            insert_batch_size: 300,
            ..MigrationParams::default()
        };
        let result = h.orchestrator.run(&params).await.unwrap();

        assert_eq!(result.status, "completed");
        assert_eq!(result.metrics_emitted, 2500);
        assert_eq!(result.packages[0].status, PackageStatus::Completed);
        assert_eq!(result.packages[0].batches_total, 3);
        assert_eq!(result.packages[0].batches_run, 3);
        assert_eq!(
            package.queried(),
            vec![
                BatchRange::new(1, 1000),
                BatchRange::new(1001, 2000),
                BatchRange::new(2001, 2500)
            ]
        );
        assert_eq!(h.sink.events().len(), 2500);
        assert!(h.sink.chunk_sizes().iter().all(|&n| n <= 300));
        assert!(!h.progress.path().exists());
    }

    #[tokio::test]
    async fn test_sentinel_range_skips_package() {
        let empty = Arc::new(Scripted::new("empty", BatchRange::EMPTY, 1000));
        let h = harness(vec![empty.clone()]);

        let result = h.orchestrator.run(&MigrationParams::default()).await.unwrap();

        let report = &result.packages[0];
        assert_eq!(report.status, PackageStatus::Skipped);
        assert_eq!(report.batches_total, 0);
        assert_eq!(report.metrics_emitted, 0);
        assert!(empty.queried().is_empty());
        assert_eq!(h.sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_dry_run_never_inserts_and_keeps_progress() {
        let package = Arc::new(Scripted::new("items", BatchRange::new(1, 5000), 5000));
        let h = harness(vec![package]);

        let params = MigrationParams {
            dry_run: true,
            insert_batch_size: 500,
            ..MigrationParams::default()
        };
        let result = h.orchestrator.run(&params).await.unwrap();

        assert!(result.dry_run);
        assert_eq!(result.metrics_emitted, 5000);
        assert_eq!(h.sink.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.progress.get("items").await, Some(1));
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("[DRY RUN] Would insert 5000 metrics"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one dry run line, found {}", n)),
            }
        });
        assert!(logs_contain("Dry run left progress"));
    }

    #[tokio::test]
    async fn test_failed_batch_fails_run_and_keeps_completed_prefix() {
        let mut failing = Scripted::new("items", BatchRange::new(1, 50), 10);
        failing.fail_at = Some(11);
        failing.slow = Some(Duration::from_secs(5));
        let failing = Arc::new(failing);
        let h = harness(vec![failing.clone()]);

        let params = MigrationParams {
            concurrency: 3,
            ..MigrationParams::default()
        };
        let started = Instant::now();
        let err = h.orchestrator.run(&params).await.unwrap_err();

        assert!(matches!(err, BackfillError::Row(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        // Only batch #1 finished before #2 gave up; #3 was aborted in flight.
        assert_eq!(h.progress.get("items").await, Some(1));
        assert_eq!(h.sink.events().len(), 10);
        let attempts = failing
            .queried
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.start == 11)
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_batch_starts_after_a_failure() {
        for _ in 0..10 {
            let mut failing = Scripted::new("items", BatchRange::new(1, 50), 10);
            failing.fail_at = Some(1);
            failing.slow = Some(Duration::from_secs(2));
            let failing = Arc::new(failing);
            let h = harness(vec![failing.clone()]);

            let params = MigrationParams {
                concurrency: 2,
                ..MigrationParams::default()
            };
            let started = Instant::now();
            let err = h.orchestrator.run(&params).await.unwrap_err();

            assert!(matches!(err, BackfillError::Row(_)));
            assert!(started.elapsed() < Duration::from_secs(1));
            // Only the two batches spawned before the failure ever ran.
            assert!(failing.queried().iter().all(|r| r.end <= 20));
            assert_eq!(h.progress.get("items").await, None);
            assert!(h.sink.events().is_empty());
        }
    }

    #[tokio::test]
    async fn test_resume_skips_saved_batches() {
        let package = Arc::new(Scripted::new("items", BatchRange::new(1, 50), 10));
        let h = harness(vec![package.clone()]);
        h.progress.save_progress("items", 3).await.unwrap();

        let params = MigrationParams {
            auto_resume: true,
            ..MigrationParams::default()
        };
        let result = h.orchestrator.run(&params).await.unwrap();

        assert_eq!(result.packages[0].resume_offset, 3);
        assert_eq!(result.packages[0].batches_run, 2);
        assert_eq!(
            package.queried(),
            vec![BatchRange::new(31, 40), BatchRange::new(41, 50)]
        );
        assert!(!h.progress.path().exists());
    }

    #[tokio::test]
    async fn test_saved_progress_ignored_without_auto_resume() {
        let package = Arc::new(Scripted::new("items", BatchRange::new(1, 50), 10));
        let h = harness(vec![package.clone()]);
        h.progress.save_progress("items", 3).await.unwrap();

        h.orchestrator.run(&MigrationParams::default()).await.unwrap();

        assert_eq!(package.queried().len(), 5);
    }

    #[tokio::test]
    async fn test_start_from_overrides_saved_progress() {
        let package = Arc::new(Scripted::new("items", BatchRange::new(1, 50), 10));
        let h = harness(vec![package.clone()]);
        h.progress.save_progress("items", 1).await.unwrap();

        let params = MigrationParams {
            auto_resume: true,
            start_from: Some(4),
            ..MigrationParams::default()
        };
        h.orchestrator.run(&params).await.unwrap();

        assert_eq!(package.queried(), vec![BatchRange::new(41, 50)]);
    }

    #[tokio::test]
    async fn test_limit_batches_keeps_progress_for_next_run() {
        let package = Arc::new(Scripted::new("items", BatchRange::new(1, 50), 10));
        let h = harness(vec![package.clone()]);

        let params = MigrationParams {
            limit_batches: Some(2),
            ..MigrationParams::default()
        };
        let result = h.orchestrator.run(&params).await.unwrap();

        assert_eq!(result.packages[0].batches_run, 2);
        assert_eq!(package.queried().len(), 2);
        assert_eq!(h.progress.get("items").await, Some(2));
    }

    #[tokio::test]
    async fn test_packages_run_in_registry_order_with_filter() {
        let a = Arc::new(Scripted::new("a", BatchRange::new(1, 5), 10));
        let b = Arc::new(Scripted::new("b", BatchRange::new(1, 5), 10));
        let c = Arc::new(Scripted::new("c", BatchRange::new(1, 5), 10));
        let h = harness(vec![a.clone(), b.clone(), c.clone()]);

        let params = MigrationParams {
            packages: Some(vec!["c".into(), "a".into()]),
            ..MigrationParams::default()
        };
        let result = h.orchestrator.run(&params).await.unwrap();

        let names: Vec<&str> = result.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(b.queried().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_package_fails_before_work() {
        let a = Arc::new(Scripted::new("a", BatchRange::new(1, 5), 10));
        let h = harness(vec![a.clone()]);

        let params = MigrationParams {
            packages: Some(vec!["a".into(), "zzz".into()]),
            ..MigrationParams::default()
        };
        let err = h.orchestrator.run(&params).await.unwrap_err();

        assert!(matches!(err, BackfillError::UnknownPackage(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(a.queried().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let h = harness(Vec::new());
        let params = MigrationParams {
            concurrency: 0,
            ..MigrationParams::default()
        };
        assert!(matches!(
            h.orchestrator.run(&params).await,
            Err(BackfillError::Config(_))
        ));
    }

    #[test]
    fn test_result_json() {
        let result = BackfillResult {
            run_id: "run".into(),
            status: "completed".into(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_seconds: 1.5,
            dry_run: false,
            packages: vec![PackageReport::new("comments")],
            metrics_emitted: 0,
        };
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["packages"][0]["status"], "pending");
        assert_eq!(json["packages"][0]["name"], "comments");
    }
}
