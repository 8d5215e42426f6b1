use std::sync::Arc;

use parking_lot::Mutex;
use realsense_viewer_common::frame::PointCloudFrame;

/// Single-slot hand-off between the capture thread and the control loop.
///
/// The producer overwrites whatever is pending; the consumer takes the
/// pending frame if there is one and never waits. Frames the consumer was
/// too slow to pick up are dropped.
#[derive(Debug, Default)]
pub struct FrameSlot {
    pending: Mutex<Option<Arc<PointCloudFrame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` as the pending frame. Returns the frame it replaced.
    pub fn put(&self, frame: Arc<PointCloudFrame>) -> Option<Arc<PointCloudFrame>> {
        self.pending.lock().replace(frame)
    }

    /// Take the pending frame, leaving the slot empty.
    pub fn take(&self) -> Option<Arc<PointCloudFrame>> {
        self.pending.lock().take()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64) -> Arc<PointCloudFrame> {
        Arc::new(PointCloudFrame::unorganized(vec![[0.0, 0.0, 1.0]], seq * 1000, seq))
    }

    #[test]
    fn take_on_empty_slot_is_none() {
        let slot = FrameSlot::new();
        assert!(slot.take().is_none());
    }

    #[test]
    fn latest_frame_wins() {
        let slot = FrameSlot::new();
        assert!(slot.put(frame(1)).is_none());
        let replaced = slot.put(frame(2)).unwrap();
        assert_eq!(replaced.seq, 1);
        assert_eq!(slot.take().unwrap().seq, 2);
        assert!(slot.is_empty());
    }

    #[test]
    fn consumer_never_sees_a_frame_twice() {
        let slot = Arc::new(FrameSlot::new());
        let producer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for seq in 1..=500 {
                    slot.put(frame(seq));
                }
            })
        };
        let mut last = 0;
        while !producer.is_finished() || !slot.is_empty() {
            if let Some(f) = slot.take() {
                assert!(f.seq > last, "frame {} after {}", f.seq, last);
                last = f.seq;
            }
        }
        producer.join().unwrap();
        assert_eq!(last, 500);
    }
}
