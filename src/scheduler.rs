//! Refresh scheduler.
//!
//! Every enabled source type gets its own pipeline task:
//!
//! ```text
//! tick | forced trigger -> fetch -> normalize -> classify -> replace snapshot
//!                            \-> (error) -> update health only
//! ```
//!
//! Pipelines never wait on each other. A forced refresh for a source whose cycle is
//! already running is coalesced into that cycle, so at most one fetch per source
//! type is ever in flight. There is no retry within a cycle and no backoff; the next
//! tick is the retry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::data_sources::{FetchError, SourceAdapter};
use crate::model::{BatchStats, SourceType};
use crate::normalize::normalize_batch;
use crate::region::RegionIndex;
use crate::severity::SeverityRules;
use crate::storage::{Records, SnapshotStore, StoreError};

/// Which sources a forced refresh applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTarget {
    All,
    One(SourceType),
}

/// What happened to a forced refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A new cycle will start immediately.
    Triggered,
    /// A cycle is already running or queued and will satisfy the request.
    Coalesced,
    /// The source is not enabled.
    Disabled,
}

/// Why a cycle produced no new snapshot.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("source type {0} is not enabled")]
    Disabled(SourceType),

    #[error("a cycle for {0} is already in flight")]
    InFlight(SourceType),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Shared dependencies of every pipeline.
#[derive(Clone)]
struct Pipeline {
    store: SnapshotStore,
    regions: Arc<RegionIndex>,
    rules: SeverityRules,
}

/// One source type's adapter and refresh state.
struct SourcePipeline {
    adapter: Arc<dyn SourceAdapter>,
    interval: Duration,
    timeout: Duration,
    in_flight: AtomicBool,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
    shared: Pipeline,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SourcePipeline {
    fn source_type(&self) -> SourceType {
        self.adapter.source_type()
    }

    /// Run one fetch cycle.
    ///
    /// Triggers still queued in `pending` when the cycle ends were sent while it was
    /// starting or running, so they are consumed before the in-flight flag clears.
    async fn cycle(
        &self,
        pending: Option<&mut mpsc::Receiver<()>>,
    ) -> Result<BatchStats, CycleError> {
        let _guard = InFlightGuard::acquire(&self.in_flight)
            .ok_or(CycleError::InFlight(self.source_type()))?;
        let result = self.refresh().await;

        if let Some(pending) = pending {
            while pending.try_recv().is_ok() {
                debug!(source = %self.source_type(), "Queued refresh satisfied by cycle");
            }
        }
        result
    }

    async fn refresh(&self) -> Result<BatchStats, CycleError> {
        let source_type = self.source_type();
        debug!(source = %source_type, adapter = self.adapter.source_name(), "Cycle started");

        let fetched = match tokio::time::timeout(self.timeout, self.adapter.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };
        let completed_at = Utc::now();
        let store = &self.shared.store;
        let health = store.health(source_type);

        let batch = match fetched {
            Ok(batch) => batch,
            Err(e) => {
                let health = health.failed(completed_at, &e);
                warn!(
                    source = %source_type,
                    error = %e,
                    consecutive_failures = health.consecutive_failures,
                    "Fetch failed, keeping previous snapshot"
                );
                store.update_health(source_type, health)?;
                return Err(e.into());
            }
        };

        let normalized = normalize_batch(
            batch.records,
            &self.shared.regions,
            completed_at,
            self.adapter.source_name(),
        );
        let rejected = normalized.rejects.total();
        if rejected > 0 {
            debug!(source = %source_type, rejects = ?normalized.rejects, "Records rejected");
        }

        let records = match source_type {
            SourceType::ReliefCenter => Records::ReliefCenters(normalized.relief_centers),
            _ => Records::Disasters(self.shared.rules.classify_batch(normalized.disasters)),
        };

        let stats = BatchStats {
            stored: records.len(),
            skipped: batch.skipped,
            filtered: batch.filtered,
            rejected,
            rejects: normalized.rejects,
        };
        store.replace(source_type, records, health.succeeded(completed_at, stats.clone()))?;

        info!(
            source = %source_type,
            stored = stats.stored,
            skipped = stats.skipped,
            filtered = stats.filtered,
            rejected = stats.rejected,
            "Snapshot refreshed"
        );
        Ok(stats)
    }

    fn request(&self) -> RefreshOutcome {
        if self.in_flight.load(Ordering::Acquire) {
            return RefreshOutcome::Coalesced;
        }

        match self.trigger_tx.try_send(()) {
            Ok(()) => RefreshOutcome::Triggered,
            Err(mpsc::error::TrySendError::Full(())) => RefreshOutcome::Coalesced,
            Err(mpsc::error::TrySendError::Closed(())) => RefreshOutcome::Disabled,
        }
    }

    async fn run(
        self: Arc<Self>,
        mut trigger_rx: mpsc::Receiver<()>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let source_type = self.source_type();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            source = %source_type,
            interval_secs = self.interval.as_secs(),
            "Refresh loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(()) = trigger_rx.recv() => {
                    ticker.reset();
                }
                _ = shutdown_rx.changed() => break,
            }

            match self.cycle(Some(&mut trigger_rx)).await {
                Ok(_) | Err(CycleError::Fetch(_)) => {}
                Err(e @ CycleError::Store(_)) => {
                    error!(source = %source_type, error = %e, "Snapshot store rejected batch");
                }
                Err(e) => {
                    warn!(source = %source_type, error = %e, "Cycle skipped");
                }
            }
        }

        info!(source = %source_type, "Refresh loop stopped");
    }
}

/// Drives every enabled source adapter on its own interval.
pub struct RefreshScheduler {
    pipelines: BTreeMap<SourceType, Arc<SourcePipeline>>,
    shared: Pipeline,
    shutdown_tx: watch::Sender<bool>,
}

impl RefreshScheduler {
    pub fn new(store: SnapshotStore, regions: Arc<RegionIndex>, rules: SeverityRules) -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            pipelines: BTreeMap::new(),
            shared: Pipeline {
                store,
                regions,
                rules,
            },
            shutdown_tx,
        }
    }

    /// Add an adapter. A second adapter for the same source type replaces the first.
    pub fn register(
        &mut self,
        adapter: Arc<dyn SourceAdapter>,
        interval: Duration,
        timeout: Duration,
    ) -> &mut Self {
        // Capacity 1: one queued trigger is enough to satisfy any number of requests.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let source_type = adapter.source_type();

        self.pipelines.insert(
            source_type,
            Arc::new(SourcePipeline {
                adapter,
                interval,
                timeout,
                in_flight: AtomicBool::new(false),
                trigger_tx,
                trigger_rx: Mutex::new(Some(trigger_rx)),
                shared: self.shared.clone(),
            }),
        );
        self
    }

    /// Enabled source types, in display order.
    pub fn enabled(&self) -> Vec<SourceType> {
        self.pipelines.keys().copied().collect()
    }

    /// Spawn one refresh loop per registered source. The first cycle runs immediately.
    ///
    /// Calling this twice does not start duplicate loops.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for pipeline in self.pipelines.values() {
            let trigger_rx = match pipeline.trigger_rx.lock() {
                Ok(mut slot) => slot.take(),
                Err(_) => None,
            };
            let Some(trigger_rx) = trigger_rx else {
                warn!(source = %pipeline.source_type(), "Refresh loop already started");
                continue;
            };

            handles.push(tokio::spawn(
                Arc::clone(pipeline).run(trigger_rx, self.shutdown_tx.subscribe()),
            ));
        }

        info!(sources = handles.len(), "Scheduler started");
        handles
    }

    /// Stop all refresh loops after their current cycle.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Request an out-of-band refresh.
    ///
    /// Does not wait for the cycle. Requests that arrive while a cycle is in flight
    /// or already queued are coalesced.
    pub fn request_refresh(&self, target: RefreshTarget) -> Vec<(SourceType, RefreshOutcome)> {
        let targets: Vec<SourceType> = match target {
            RefreshTarget::All => self.enabled(),
            RefreshTarget::One(source_type) => vec![source_type],
        };

        targets
            .into_iter()
            .map(|source_type| {
                let outcome = self
                    .pipelines
                    .get(&source_type)
                    .map_or(RefreshOutcome::Disabled, |p| p.request());
                match outcome {
                    RefreshOutcome::Coalesced => {
                        debug!(source = %source_type, "Refresh coalesced with pending cycle")
                    }
                    _ => info!(source = %source_type, ?outcome, "Refresh requested"),
                }
                (source_type, outcome)
            })
            .collect()
    }

    /// Run one cycle for a source type in the calling task.
    pub async fn run_once(&self, source_type: SourceType) -> Result<BatchStats, CycleError> {
        match self.pipelines.get(&source_type) {
            Some(pipeline) => pipeline.cycle(None).await,
            None => Err(CycleError::Disabled(source_type)),
        }
    }

    /// Run one cycle for every registered source type, concurrently.
    pub async fn run_all_once(&self) -> Vec<(SourceType, Result<BatchStats, CycleError>)> {
        let mut cycles = JoinSet::new();
        for (source_type, pipeline) in &self.pipelines {
            let source_type = *source_type;
            let pipeline = Arc::clone(pipeline);
            cycles.spawn(async move { (source_type, pipeline.cycle(None).await) });
        }

        let mut results = Vec::with_capacity(cycles.len());
        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Refresh cycle task failed"),
            }
        }
        results.sort_by_key(|(source_type, _)| *source_type);
        results
    }
}
