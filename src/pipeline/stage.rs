//! Frame processing stage: normals -> spatial index -> DBSCAN -> snapshot.
//!
//! `on_frame` is called from the sensor's callback thread. Frames are
//! processed one at a time on that thread:
//!
//! ```text
//! frame ──▶ in flight? ──no──▶ process ──▶ publish ──▶ drain pending slot
//!                │
//!               yes ──▶ park in pending slot (replaces older parked frame)
//! ```
//!
//! The busy flag and the pending slot live under one lock, so a frame is
//! either parked where the in-flight thread will find it or started on the
//! caller's thread. The configuration is cloned once when a frame starts, so
//! a concurrent change only affects the next frame. The handoff lock is the
//! only lock shared with the consumer and is never held during computation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use parking_lot::{Condvar, Mutex, RwLock};
use thiserror::Error;

use super::handoff::SnapshotHandoff;
use super::rate::FrameRateCounter;
use crate::config::{ClusterSpace, ConfigChange, ConfigError, PipelineConfig};
use crate::core::cloud::PointCloud;
use crate::core::snapshot::FrameSnapshot;
use crate::processors::clustering::{ClusterError, DensityClusterer};
use crate::processors::normals::{NormalEstimationError, NormalEstimator};
use crate::processors::spatial_index::{IndexError, SpatialIndex};
use crate::sensor::FrameCallback;

/// Reasons a frame produced no snapshot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("empty frame: {0}")]
    EmptyInput(#[from] IndexError),

    #[error("normal estimation failed: {0}")]
    NormalEstimation(#[from] NormalEstimationError),

    #[error(transparent)]
    InvalidParameter(#[from] ClusterError),

    #[error("pipeline is shutting down")]
    ShuttingDown,
}

/// What happened to a frame handed to [`FramePipeline::on_frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Processed and published under this sequence number.
    Published { sequence: u64 },
    /// Processed but dropped; the previous snapshot stays current.
    Dropped(FrameError),
    /// Another frame was in flight; this one is parked as the next frame.
    Deferred,
    /// The pipeline is shut down.
    Rejected,
}

/// Frame counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub published: u64,
    pub dropped: u64,
    /// Parked frames replaced by a newer frame before processing.
    pub superseded: u64,
    /// Frames refused, or discarded while parked, because of shutdown.
    pub rejected: u64,
}

/// Frame ownership, guarded by a single lock.
///
/// `pending` is only ever `Some` while `busy` is set.
#[derive(Debug, Default)]
struct Slot {
    busy: bool,
    pending: Option<Arc<PointCloud>>,
}

pub struct FramePipeline {
    config: RwLock<PipelineConfig>,
    estimator: Box<dyn NormalEstimator>,
    handoff: Arc<SnapshotHandoff>,
    slot: Mutex<Slot>,
    /// Signalled when `slot.busy` is cleared.
    idle: Condvar,
    /// Written only while `slot` is locked.
    accepting: AtomicBool,
    next_sequence: AtomicU64,
    stats: Mutex<PipelineStats>,
    rate: Mutex<FrameRateCounter>,
}

impl FramePipeline {
    /// Create a pipeline publishing into a fresh handoff.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidParameter`] if `config` fails validation.
    pub fn new(
        config: PipelineConfig,
        estimator: Box<dyn NormalEstimator>,
    ) -> Result<Self, ConfigError> {
        Self::with_handoff(config, estimator, Arc::new(SnapshotHandoff::new()))
    }

    pub fn with_handoff(
        config: PipelineConfig,
        estimator: Box<dyn NormalEstimator>,
        handoff: Arc<SnapshotHandoff>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            estimator,
            handoff,
            slot: Mutex::new(Slot::default()),
            idle: Condvar::new(),
            accepting: AtomicBool::new(true),
            next_sequence: AtomicU64::new(1),
            stats: Mutex::new(PipelineStats::default()),
            rate: Mutex::new(FrameRateCounter::new("computation")),
        })
    }

    /// Consumer side of the pipeline.
    pub fn handoff(&self) -> Arc<SnapshotHandoff> {
        Arc::clone(&self.handoff)
    }

    /// Current configuration.
    pub fn config(&self) -> PipelineConfig {
        self.config.read().clone()
    }

    /// Apply one change; takes effect at the next frame boundary.
    pub fn apply(&self, change: ConfigChange) -> Result<(), ConfigError> {
        self.config.write().apply(change)?;
        log::info!("configuration change applied: {:?}", change);
        Ok(())
    }

    /// Replace the whole configuration; takes effect at the next frame.
    pub fn set_config(&self, config: PipelineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    pub fn stats(&self) -> PipelineStats {
        *self.stats.lock()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Closure suitable for registering with a frame source.
    ///
    /// Per-frame failures are logged by the pipeline and go no further.
    pub fn frame_callback(self: &Arc<Self>) -> FrameCallback {
        let pipeline = Arc::clone(self);
        Arc::new(move |cloud| {
            pipeline.on_frame(cloud);
        })
    }

    /// Frame ingestion entry point.
    ///
    /// Runs the frame to completion on the calling thread unless another
    /// frame is in flight, in which case the frame is parked and processed
    /// by the in-flight thread once it is done.
    pub fn on_frame(&self, cloud: Arc<PointCloud>) -> FrameOutcome {
        self.stats.lock().received += 1;

        {
            let mut slot = self.slot.lock();
            if !self.is_accepting() {
                self.stats.lock().rejected += 1;
                return FrameOutcome::Rejected;
            }
            if slot.busy {
                if slot.pending.replace(cloud).is_some() {
                    self.stats.lock().superseded += 1;
                    log::debug!("parked frame superseded by a newer one");
                }
                return FrameOutcome::Deferred;
            }
            slot.busy = true;
        }

        let outcome = self.run_frame(cloud);
        self.drain_pending();
        outcome
    }

    /// Stop accepting frames, wait for the in-flight frame, close the handoff.
    ///
    /// A frame already running still publishes. A parked frame is discarded.
    pub fn shutdown(&self) {
        let mut slot = self.slot.lock();
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        while slot.busy {
            self.idle.wait(&mut slot);
        }
        drop(slot);

        self.handoff.close();
        let stats = self.stats();
        log::info!(
            "pipeline stopped: {} received, {} published, {} dropped, {} superseded",
            stats.received,
            stats.published,
            stats.dropped,
            stats.superseded
        );
    }

    /// Run the stage on one cloud with a given configuration, without
    /// publishing. Used by `on_frame` and directly by tests and tools.
    pub fn process(
        &self,
        cloud: Arc<PointCloud>,
        config: &PipelineConfig,
    ) -> Result<FrameSnapshot, FrameError> {
        let started = Instant::now();

        let clusterer = DensityClusterer::from_config(&config.clustering)?;

        let normals = self.estimator.estimate(&cloud, &config.normals)?;
        if normals.len() != cloud.len() {
            return Err(NormalEstimationError::LengthMismatch {
                normals: normals.len(),
                points: cloud.len(),
            }
            .into());
        }
        log::debug!(
            "normal estimation ({}): {:.2} ms, {}/{} valid",
            config.normals.method,
            started.elapsed().as_secs_f64() * 1000.0,
            normals.valid_count(),
            normals.len()
        );

        let coords = match config.clustering.space {
            ClusterSpace::Normals => normals.to_coords(),
            ClusterSpace::Positions => cloud.to_coords(),
        };
        let index = SpatialIndex::build(coords)?;
        let labeling = clusterer.cluster(&index);
        log::debug!(
            "clustering: {} clusters, {} noise points",
            labeling.num_clusters(),
            labeling.noise_count()
        );

        Ok(FrameSnapshot {
            sequence: 0,
            cloud,
            normals,
            labeling,
            timestamp: SystemTime::now(),
            method: config.normals.method,
            processing_time: started.elapsed(),
        })
    }

    fn run_frame(&self, cloud: Arc<PointCloud>) -> FrameOutcome {
        let config = self.config.read().clone();
        let result = self.process(cloud, &config).and_then(|mut snapshot| {
            snapshot.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            let sequence = snapshot.sequence;
            self.handoff
                .publish(Arc::new(snapshot))
                .map_err(|_| FrameError::ShuttingDown)?;
            Ok(sequence)
        });

        match result {
            Ok(sequence) => {
                self.stats.lock().published += 1;
                self.rate.lock().tick();
                FrameOutcome::Published { sequence }
            }
            Err(e) => {
                log::warn!("frame dropped: {}", e);
                self.stats.lock().dropped += 1;
                FrameOutcome::Dropped(e)
            }
        }
    }

    /// Process parked frames until the slot is empty, then clear `busy`.
    ///
    /// The emptiness check and the release happen under the same lock that
    /// `on_frame` parks under.
    fn drain_pending(&self) {
        loop {
            let next = {
                let mut slot = self.slot.lock();
                match slot.pending.take() {
                    Some(cloud) if self.is_accepting() => cloud,
                    parked => {
                        if parked.is_some() {
                            self.stats.lock().rejected += 1;
                            log::debug!("discarded parked frame on shutdown");
                        }
                        slot.busy = false;
                        self.idle.notify_all();
                        return;
                    }
                }
            };
            let outcome = self.run_frame(next);
            log::trace!("parked frame processed: {:?}", outcome);
        }
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
