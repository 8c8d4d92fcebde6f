//! Migration packages: the per-entity extension point.
//!
//! A package bundles three steps for one source entity:
//!
//! - [`MigrationPackage::range`]: the full interval of work before the cutoff
//! - [`MigrationPackage::query`]: the rows of one batch
//! - [`MigrationPackage::process`]: rows to metric events
//!
//! Packages are written against the typed [`MigrationPackage`] trait. Every
//! implementation is also a [`BackfillPackage`], the object-safe form the
//! [`PackageRegistry`] stores and the orchestrator drives.

pub mod builtin;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::{BatchRange, MetricEmitter};
use crate::error::{BackfillError, Result};
use crate::retry::{retryable, RetryPolicy};
use crate::source::{ColumnarSource, RelationalSource};

/// Default batch width when a package does not choose one.
pub const DEFAULT_QUERY_BATCH_SIZE: u64 = 1000;

/// Everything a package may read from. Shared by all concurrent batches.
#[derive(Clone)]
pub struct PackageContext {
    pub relational: Arc<dyn RelationalSource>,
    pub columnar: Arc<dyn ColumnarSource>,
    /// Only rows created strictly before this instant are replayed.
    pub cutoff: DateTime<Utc>,
    /// Policy applied around range resolution and batch queries.
    pub retry: RetryPolicy,
}

impl PackageContext {
    pub fn new(
        relational: Arc<dyn RelationalSource>,
        columnar: Arc<dyn ColumnarSource>,
        cutoff: DateTime<Utc>,
    ) -> Self {
        Self {
            relational,
            columnar,
            cutoff,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Range, query and processor for one entity type.
///
/// `range` must be idempotent and `query` must return only rows whose key
/// lies inside the given range, otherwise batches overlap or leave gaps.
/// `process` must not write anywhere; its output goes through the emitter.
#[async_trait]
pub trait MigrationPackage: Send + Sync + 'static {
    /// Decoded row shape handed from `query` to `process`.
    type Row: Send + 'static;

    /// Registry key and `--packages` filter name.
    fn name(&self) -> &str;

    /// Batch width, in ids or seconds depending on the range strategy.
    fn query_batch_size(&self) -> u64 {
        DEFAULT_QUERY_BATCH_SIZE
    }

    async fn range(&self, ctx: &PackageContext) -> Result<BatchRange>;

    async fn query(&self, ctx: &PackageContext, range: BatchRange) -> Result<Vec<Self::Row>>;

    async fn process(
        &self,
        ctx: &PackageContext,
        rows: Vec<Self::Row>,
        emitter: &mut MetricEmitter,
    ) -> Result<()>;
}

/// Type-erased package as seen by the orchestrator.
#[async_trait]
pub trait BackfillPackage: Send + Sync {
    fn name(&self) -> &str;

    fn batch_width(&self) -> u64;

    /// Resolve the package range, retried.
    async fn resolve(&self, ctx: &PackageContext) -> Result<BatchRange>;

    /// Query (retried) and process one batch.
    async fn run_batch(&self, ctx: &PackageContext, range: BatchRange) -> Result<MetricEmitter>;
}

#[async_trait]
impl<P: MigrationPackage> BackfillPackage for P {
    fn name(&self) -> &str {
        MigrationPackage::name(self)
    }

    fn batch_width(&self) -> u64 {
        self.query_batch_size()
    }

    async fn resolve(&self, ctx: &PackageContext) -> Result<BatchRange> {
        let label = format!("{} range", MigrationPackage::name(self));
        retryable(ctx.retry, &label, || self.range(ctx)).await
    }

    async fn run_batch(&self, ctx: &PackageContext, range: BatchRange) -> Result<MetricEmitter> {
        let label = format!("{} query {}", MigrationPackage::name(self), range);
        let rows = retryable(ctx.retry, &label, || self.query(ctx, range)).await?;

        let mut emitter = MetricEmitter::new();
        self.process(ctx, rows, &mut emitter).await?;
        Ok(emitter)
    }
}

/// Name-keyed package registry. Registration order is the run order.
#[derive(Clone, Default)]
pub struct PackageRegistry {
    packages: Vec<Arc<dyn BackfillPackage>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in package.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(builtin::PostViews)
            .register(builtin::PostReactions)
            .register(builtin::Comments)
            .register(builtin::Follows);
        registry
    }

    /// Add a package. A package with the same name replaces the earlier one
    /// in place.
    pub fn register<P: MigrationPackage>(&mut self, package: P) -> &mut Self {
        self.register_arc(Arc::new(package))
    }

    pub fn register_arc(&mut self, package: Arc<dyn BackfillPackage>) -> &mut Self {
        match self.packages.iter().position(|p| p.name() == package.name()) {
            Some(idx) => self.packages[idx] = package,
            None => self.packages.push(package),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BackfillPackage>> {
        self.packages.iter().find(|p| p.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BackfillPackage>> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Packages to run, in registry order. `None` or an empty filter selects
    /// everything; an unknown name fails before any work starts.
    pub fn select(&self, filter: Option<&[String]>) -> Result<Vec<Arc<dyn BackfillPackage>>> {
        let filter = match filter {
            Some(names) if !names.is_empty() => names,
            _ => return Ok(self.packages.clone()),
        };

        if let Some(unknown) = filter.iter().find(|name| self.get(name).is_none()) {
            return Err(BackfillError::UnknownPackage(unknown.clone()));
        }

        Ok(self
            .packages
            .iter()
            .filter(|p| filter.iter().any(|name| name == p.name()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityMetricEvent;
    use crate::resolver::testing::{FakeColumnar, FakeRelational};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Numbers {
        name: &'static str,
        failures: AtomicUsize,
        queries: AtomicUsize,
    }

    impl Numbers {
        fn new(name: &'static str, failures: usize) -> Self {
            Self {
                name,
                failures: AtomicUsize::new(failures),
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MigrationPackage for Numbers {
        type Row = i64;

        fn name(&self) -> &str {
            self.name
        }

        fn query_batch_size(&self) -> u64 {
            10
        }

        async fn range(&self, _ctx: &PackageContext) -> Result<BatchRange> {
            Ok(BatchRange::new(1, 25))
        }

        async fn query(&self, _ctx: &PackageContext, range: BatchRange) -> Result<Vec<i64>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(BackfillError::Sink("connection reset".into()));
            }
            Ok((range.start..=range.end).collect())
        }

        async fn process(
            &self,
            ctx: &PackageContext,
            rows: Vec<i64>,
            emitter: &mut MetricEmitter,
        ) -> Result<()> {
            for id in rows.into_iter().filter(|id| id % 2 == 0) {
                emitter.emit(EntityMetricEvent::count("number", id, 0, "even", ctx.cutoff));
            }
            Ok(())
        }
    }

    fn ctx() -> PackageContext {
        PackageContext::new(
            Arc::new(FakeRelational::empty()),
            Arc::new(FakeColumnar::empty()),
            Utc::now(),
        )
        .with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_run_batch_queries_then_processes() {
        let package = Numbers::new("numbers", 0);
        let emitter = package.run_batch(&ctx(), BatchRange::new(1, 10)).await.unwrap();
        assert_eq!(emitter.len(), 5);
        assert_eq!(package.batch_width(), 10);
    }

    #[tokio::test]
    async fn test_run_batch_retries_query() {
        let package = Numbers::new("numbers", 2);
        let emitter = package.run_batch(&ctx(), BatchRange::new(1, 4)).await.unwrap();
        assert_eq!(emitter.len(), 2);
        assert_eq!(package.queries.load(Ordering::SeqCst), 3);

        let broken = Numbers::new("numbers", 5);
        assert!(broken.run_batch(&ctx(), BatchRange::new(1, 4)).await.is_err());
        assert_eq!(broken.queries.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_registry_select_preserves_registry_order() {
        let mut registry = PackageRegistry::new();
        registry
            .register(Numbers::new("a", 0))
            .register(Numbers::new("b", 0))
            .register(Numbers::new("c", 0));

        let filter = vec!["c".to_string(), "a".to_string()];
        let selected = registry.select(Some(&filter)).unwrap();
        let names: Vec<&str> = selected.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["a", "c"]);

        assert_eq!(registry.select(None).unwrap().len(), 3);
        assert_eq!(registry.select(Some(&[])).unwrap().len(), 3);
    }

    #[test]
    fn test_registry_rejects_unknown_names() {
        let registry = PackageRegistry::builtin();
        let filter = vec!["comments".to_string(), "likes".to_string()];
        match registry.select(Some(&filter)) {
            Err(BackfillError::UnknownPackage(name)) => assert_eq!(name, "likes"),
            other => panic!("unexpected: {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_registry_replaces_duplicate_names() {
        let mut registry = PackageRegistry::new();
        registry.register(Numbers::new("a", 0)).register(Numbers::new("a", 0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_builtin_registry() {
        let registry = PackageRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec!["post_views", "post_reactions", "comments", "follows"]
        );
        assert!(registry.get("follows").is_some());
        assert!(registry.get("nope").is_none());
    }
}
