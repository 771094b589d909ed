//! [`FrameCache`] – single-slot store for the latest point cloud.
//!
//! The point-cloud handler is the only writer and the localization pass the
//! only reader. Frames are stored as immutable `Arc` snapshots and swapped
//! whole, so a reader holding a snapshot never observes a half-written
//! frame, even if the cache is shared across tasks.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use objloc_types::{LocError, PointCloudFrame};

#[derive(Debug)]
struct CachedFrame {
    frame: Arc<PointCloudFrame>,
    received_at: Instant,
}

/// Most-recent-wins cell holding at most one frame. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct FrameCache {
    slot: Arc<RwLock<Option<CachedFrame>>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached frame unconditionally. Returns the frame it
    /// displaced, if any.
    pub fn store(&self, frame: PointCloudFrame) -> Option<Arc<PointCloudFrame>> {
        let cached = CachedFrame {
            frame: Arc::new(frame),
            received_at: Instant::now(),
        };
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.replace(cached).map(|old| old.frame)
    }

    /// Latest frame and how long ago it was stored.
    pub fn latest(&self) -> Option<(Arc<PointCloudFrame>, Duration)> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .map(|c| (Arc::clone(&c.frame), c.received_at.elapsed()))
    }

    /// Latest frame, provided it is no older than `max_age`.
    ///
    /// # Errors
    ///
    /// * [`LocError::NotReady`] – no frame has been stored yet.
    /// * [`LocError::StaleFrame`] – the frame is older than `max_age`.
    pub fn fresh(&self, max_age: Option<Duration>) -> Result<Arc<PointCloudFrame>, LocError> {
        let (frame, age) = self
            .latest()
            .ok_or_else(|| LocError::NotReady("no point cloud cached yet".into()))?;
        if let Some(limit) = max_age
            && age > limit
        {
            return Err(LocError::StaleFrame {
                age_ms: age.as_millis() as u64,
                max_age_ms: limit.as_millis() as u64,
            });
        }
        Ok(frame)
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub fn clear(&self) {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objloc_types::{CloudPoint, Header};

    fn frame(seq: u32) -> PointCloudFrame {
        let mut header = Header::now("zed2");
        header.seq = seq;
        PointCloudFrame::unorganized(header, vec![CloudPoint::new(0.0, 0.0, 1.0)])
    }

    #[test]
    fn empty_cache_is_not_ready() {
        let cache = FrameCache::new();
        assert!(cache.is_empty());
        assert!(matches!(cache.fresh(None), Err(LocError::NotReady(_))));
    }

    #[test]
    fn most_recent_frame_wins() {
        let cache = FrameCache::new();
        assert!(cache.store(frame(1)).is_none());
        let displaced = cache.store(frame(2)).expect("first frame displaced");
        assert_eq!(displaced.header.seq, 1);
        assert_eq!(cache.fresh(None).unwrap().header.seq, 2);
    }

    #[test]
    fn snapshot_survives_overwrite() {
        let cache = FrameCache::new();
        cache.store(frame(1));
        let snapshot = cache.fresh(None).unwrap();
        cache.store(frame(2));
        assert_eq!(snapshot.header.seq, 1);
    }

    #[test]
    fn clones_share_the_slot() {
        let writer = FrameCache::new();
        let reader = writer.clone();
        writer.store(frame(7));
        assert_eq!(reader.fresh(None).unwrap().header.seq, 7);
        reader.clear();
        assert!(writer.is_empty());
    }

    #[test]
    fn stale_frame_rejected() {
        let cache = FrameCache::new();
        cache.store(frame(1));
        std::thread::sleep(Duration::from_millis(20));
        let err = cache.fresh(Some(Duration::from_millis(1))).unwrap_err();
        assert!(matches!(err, LocError::StaleFrame { max_age_ms: 1, .. }));
        assert!(cache.fresh(Some(Duration::from_secs(60))).is_ok());
    }
}
