use std::sync::Arc;

use realsense_viewer_common::frame::PointCloudFrame;
use realsense_viewer_common::settings::TemporalFilter;

use crate::CaptureError;

/// Invoked on the capture thread for every new frame.
///
/// The callback runs on the device's delivery thread and holds it up until
/// it returns.
pub type FrameCallback = Box<dyn FnMut(Arc<PointCloudFrame>) + Send + 'static>;

/// A depth camera producing point clouds.
///
/// Acquisition controls take `&self`: implementations synchronize them
/// internally so they can be changed while frames are streaming.
pub trait CaptureDevice: Send {
    fn serial_number(&self) -> &str;

    /// Measured delivery rate over the most recent frames.
    fn frames_per_second(&self) -> f32;

    /// Samples with confidence below `threshold` (0-15) are dropped.
    fn set_confidence_threshold(&self, threshold: u8);

    fn enable_temporal_filtering(&self, filter: TemporalFilter, window_size: usize);

    /// Begin streaming; `callback` receives every frame until [`stop`](Self::stop).
    fn start(&mut self, callback: FrameCallback) -> Result<(), CaptureError>;

    /// Stop streaming and drop the callback. A no-op when not running.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
