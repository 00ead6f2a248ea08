//! Single-slot, latest-wins snapshot mailbox.
//!
//! The producer publishes without waiting for the consumer; the consumer
//! polls and takes whatever is newest. Snapshots that are overwritten before
//! being taken are dropped. The lock is held only for the pointer swap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::core::snapshot::FrameSnapshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandoffError {
    #[error("snapshot handoff is closed")]
    Closed,
}

/// Counters describing handoff traffic.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandoffStats {
    pub published: u64,
    pub taken: u64,
    /// Snapshots replaced before the consumer took them.
    pub overwritten: u64,
}

#[derive(Default)]
pub struct SnapshotHandoff {
    slot: Mutex<Option<Arc<FrameSnapshot>>>,
    closed: AtomicBool,
    published: AtomicU64,
    taken: AtomicU64,
    overwritten: AtomicU64,
}

impl SnapshotHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot`, replacing any snapshot not yet taken.
    pub fn publish(&self, snapshot: Arc<FrameSnapshot>) -> Result<(), HandoffError> {
        let previous = {
            let mut slot = self.slot.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(HandoffError::Closed);
            }
            slot.replace(snapshot)
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = previous {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            log::trace!("snapshot {} dropped before being taken", old.sequence);
        }
        Ok(())
    }

    /// Remove and return the newest snapshot, or `None` if nothing new.
    pub fn take_latest(&self) -> Option<Arc<FrameSnapshot>> {
        let taken = self.slot.lock().take();
        if taken.is_some() {
            self.taken.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    /// True if a snapshot is waiting to be taken.
    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Refuse further publishes. A snapshot already stored stays takeable.
    pub fn close(&self) {
        let _slot = self.slot.lock();
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> HandoffStats {
        HandoffStats {
            published: self.published.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalEstimationMethod;
    use crate::core::cloud::PointCloud;
    use crate::core::normals::NormalField;
    use crate::processors::clustering::ClusterLabeling;
    use std::thread;
    use std::time::{Duration, SystemTime};

    fn snapshot(sequence: u64) -> Arc<FrameSnapshot> {
        Arc::new(FrameSnapshot {
            sequence,
            cloud: Arc::new(PointCloud::new()),
            normals: NormalField::default(),
            labeling: ClusterLabeling::default(),
            timestamp: SystemTime::now(),
            method: NormalEstimationMethod::Simple3DGradient,
            processing_time: Duration::ZERO,
        })
    }

    #[test]
    fn test_empty_take_returns_none() {
        let handoff = SnapshotHandoff::new();
        assert!(handoff.take_latest().is_none());
        assert!(!handoff.has_pending());
    }

    #[test]
    fn test_drop_oldest() {
        let handoff = SnapshotHandoff::new();
        handoff.publish(snapshot(1)).unwrap();
        handoff.publish(snapshot(2)).unwrap();

        assert_eq!(handoff.take_latest().map(|s| s.sequence), Some(2));
        assert!(handoff.take_latest().is_none());

        let stats = handoff.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.taken, 1);
        assert_eq!(stats.overwritten, 1);
    }

    #[test]
    fn test_closed_refuses_publish_but_keeps_stored() {
        let handoff = SnapshotHandoff::new();
        handoff.publish(snapshot(7)).unwrap();
        handoff.close();
        assert!(handoff.is_closed());
        assert_eq!(handoff.publish(snapshot(8)), Err(HandoffError::Closed));
        assert_eq!(handoff.take_latest().map(|s| s.sequence), Some(7));
    }

    #[test]
    fn test_concurrent_consumer_sees_increasing_sequences() {
        let handoff = Arc::new(SnapshotHandoff::new());
        let producer = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || {
                for seq in 1..=500 {
                    handoff.publish(snapshot(seq)).unwrap();
                }
            })
        };

        let mut last = 0;
        let mut seen = 0;
        while !producer.is_finished() || handoff.has_pending() {
            if let Some(s) = handoff.take_latest() {
                assert!(s.sequence > last);
                last = s.sequence;
                seen += 1;
            }
        }
        producer.join().unwrap();
        if let Some(s) = handoff.take_latest() {
            last = s.sequence;
            seen += 1;
        }
        assert_eq!(last, 500);
        assert!(seen >= 1);
    }
}
