//! In-memory snapshot store.
//!
//! # Consistency
//!
//! Each source type owns one slot holding an `Arc<Snapshot>` in an `ArcSwap`. A
//! refresh builds the complete new snapshot off to the side and swaps the pointer in
//! one step, so a reader always sees either the old snapshot or the new one in full:
//!
//! - `read` loads the current `Arc` without taking any lock
//! - writes for one source type are serialized by the slot's `watch` sender, which
//!   also notifies subscribers
//! - different source types never contend with each other
//!
//! A failed cycle does not replace records. It only publishes a new snapshot that
//! shares the previous records and carries updated health, so `as_of` keeps pointing
//! at the last successful refresh.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::model::{DisasterRecord, ReliefCenterRecord, SourceHealth, SourceType};

/// Records of one source type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Records {
    Disasters(Vec<DisasterRecord>),
    ReliefCenters(Vec<ReliefCenterRecord>),
}

impl Records {
    /// An empty record set of the right shape for `source_type`.
    pub fn empty(source_type: SourceType) -> Self {
        match source_type {
            SourceType::ReliefCenter => Records::ReliefCenters(Vec::new()),
            _ => Records::Disasters(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Records::Disasters(records) => records.len(),
            Records::ReliefCenters(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disaster records, or an empty slice for relief centers.
    pub fn disasters(&self) -> &[DisasterRecord] {
        match self {
            Records::Disasters(records) => records,
            Records::ReliefCenters(_) => &[],
        }
    }

    /// Relief center records, or an empty slice for disasters.
    pub fn relief_centers(&self) -> &[ReliefCenterRecord] {
        match self {
            Records::ReliefCenters(records) => records,
            Records::Disasters(_) => &[],
        }
    }
}

/// The complete, committed state of one source type.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub source_type: SourceType,

    /// Shared with later snapshots that only changed health.
    pub records: Arc<Records>,

    pub health: SourceHealth,

    /// Completion time of the refresh that produced `records`. `None` until the first success.
    pub as_of: Option<DateTime<Utc>>,
}

impl Snapshot {
    fn empty(source_type: SourceType, source_name: &str) -> Self {
        Self {
            source_type,
            records: Arc::new(Records::empty(source_type)),
            health: SourceHealth::new(source_type, source_name),
            as_of: None,
        }
    }
}

/// Rejected writes. These indicate a bug upstream of the store, never bad source data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("source type {0} is not registered")]
    UnknownSource(SourceType),

    #[error("record set of the wrong kind for source type {0}")]
    KindMismatch(SourceType),

    #[error("record {id} does not belong to source type {source_type}")]
    ForeignRecord { source_type: SourceType, id: String },

    #[error("health for {health} passed with records for {source_type}")]
    HealthMismatch {
        source_type: SourceType,
        health: SourceType,
    },
}

/// The published snapshot of one source type.
struct Slot {
    current: ArcSwap<Snapshot>,
    published: watch::Sender<Arc<Snapshot>>,
}

impl Slot {
    fn new(snapshot: Snapshot) -> Self {
        let snapshot = Arc::new(snapshot);
        let (published, _rx) = watch::channel(Arc::clone(&snapshot));
        Self {
            current: ArcSwap::new(snapshot),
            published,
        }
    }

    /// Swap in the snapshot built from the current one, then notify subscribers.
    fn publish(&self, next: impl FnOnce(&Snapshot) -> Snapshot) {
        self.published.send_modify(|published| {
            let snapshot = Arc::new(next(&self.current.load()));
            self.current.store(Arc::clone(&snapshot));
            *published = snapshot;
        });
    }
}

/// Holds the latest snapshot for every source type.
#[derive(Clone)]
pub struct SnapshotStore {
    slots: Arc<BTreeMap<SourceType, Slot>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// A store with an empty snapshot for each of the four source types.
    pub fn new() -> Self {
        Self::with_sources(SourceType::ALL.map(|s| (s, s.as_str())))
    }

    /// A store with empty snapshots named after the given upstream services.
    pub fn with_sources<'a>(sources: impl IntoIterator<Item = (SourceType, &'a str)>) -> Self {
        let slots = sources
            .into_iter()
            .map(|(source_type, name)| {
                (source_type, Slot::new(Snapshot::empty(source_type, name)))
            })
            .collect();

        Self {
            slots: Arc::new(slots),
        }
    }

    fn slot(&self, source_type: SourceType) -> Result<&Slot, StoreError> {
        self.slots
            .get(&source_type)
            .ok_or(StoreError::UnknownSource(source_type))
    }

    /// Atomically replace the records and health of one source type.
    ///
    /// `as_of` is taken from `health.last_success_at`.
    pub fn replace(
        &self,
        source_type: SourceType,
        records: Records,
        health: SourceHealth,
    ) -> Result<(), StoreError> {
        validate(source_type, &records, &health)?;
        let slot = self.slot(source_type)?;

        let snapshot = Snapshot {
            source_type,
            records: Arc::new(records),
            as_of: health.last_success_at.or_else(|| Some(Utc::now())),
            health,
        };
        slot.publish(|_| snapshot);
        Ok(())
    }

    /// Publish new health for a source type, keeping its records and `as_of`.
    pub fn update_health(
        &self,
        source_type: SourceType,
        health: SourceHealth,
    ) -> Result<(), StoreError> {
        if health.source_type != source_type {
            return Err(StoreError::HealthMismatch {
                source_type,
                health: health.source_type,
            });
        }

        self.slot(source_type)?.publish(|current| Snapshot {
            health,
            ..current.clone()
        });
        Ok(())
    }

    /// The last committed snapshot. Unregistered source types read as empty.
    pub fn read(&self, source_type: SourceType) -> Arc<Snapshot> {
        match self.slots.get(&source_type) {
            Some(slot) => slot.current.load_full(),
            None => Arc::new(Snapshot::empty(source_type, source_type.as_str())),
        }
    }

    /// Current health of one source type.
    pub fn health(&self, source_type: SourceType) -> SourceHealth {
        self.read(source_type).health.clone()
    }

    /// Snapshots of every registered source type.
    pub fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.slots.keys().map(|s| self.read(*s)).collect()
    }

    /// Watch a source type for new snapshots.
    pub fn subscribe(&self, source_type: SourceType) -> Option<watch::Receiver<Arc<Snapshot>>> {
        self.slots.get(&source_type).map(|slot| slot.published.subscribe())
    }
}

fn validate(
    source_type: SourceType,
    records: &Records,
    health: &SourceHealth,
) -> Result<(), StoreError> {
    if health.source_type != source_type {
        return Err(StoreError::HealthMismatch {
            source_type,
            health: health.source_type,
        });
    }

    match (source_type.disaster_type(), records) {
        (Some(expected), Records::Disasters(disasters)) => {
            match disasters.iter().find(|d| d.disaster_type != expected) {
                Some(foreign) => Err(StoreError::ForeignRecord {
                    source_type,
                    id: foreign.id.clone(),
                }),
                None => Ok(()),
            }
        }
        (None, Records::ReliefCenters(_)) => Ok(()),
        _ => Err(StoreError::KindMismatch(source_type)),
    }
}
