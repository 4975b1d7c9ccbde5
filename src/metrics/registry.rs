use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use super::exposition;
use super::snapshot::Snapshot;
use crate::error::Result;

/// A committed snapshot together with the encoder-ready registry built from it.
pub struct Published {
    pub snapshot: Snapshot,
    registry: prometheus::Registry,
}

impl Published {
    fn build(snapshot: Snapshot) -> Result<Self> {
        let registry = exposition::build_registry(&snapshot)?;
        Ok(Self { snapshot, registry })
    }

    pub fn render(&self) -> Result<String> {
        exposition::encode(&self.registry)
    }
}

/// Holds the metric set scrapers see.
///
/// The refresh cycle builds a complete [`Snapshot`] off to the side and
/// [`commit`](Self::commit)s it in one pointer swap; readers clone the current
/// `Arc` and never observe a half-written cycle.
pub struct MetricRegistry {
    current: RwLock<Arc<Published>>,
    failed_cycles: AtomicU64,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Published {
                snapshot: Snapshot::default(),
                registry: prometheus::Registry::new(),
            })),
            failed_cycles: AtomicU64::new(0),
        }
    }

    /// Replace the visible snapshot.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if the snapshot cannot be loaded into gauge
    /// vectors; the previous snapshot stays visible in that case.
    pub fn commit(&self, snapshot: Snapshot) -> Result<()> {
        let samples = snapshot.len();
        let published = Arc::new(Published::build(snapshot)?);

        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = published;

        debug!("Committed snapshot with {samples} samples");
        Ok(())
    }

    pub fn current(&self) -> Arc<Published> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Exposition text of the committed snapshot.
    pub fn render(&self) -> Result<String> {
        self.current().render()
    }

    pub fn record_failure(&self) {
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Refresh cycles that ended without committing since startup.
    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}
