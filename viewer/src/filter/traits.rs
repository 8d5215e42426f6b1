use realsense_viewer_common::frame::PointCloudFrame;

/// Per-frame post-processing stage run on the capture thread.
///
/// Implementations are stateless between frames: the output depends only
/// on the input frame and the filter's parameters.
pub trait PostFilter: Send {
    /// Produce the filtered replacement for `frame`.
    fn apply(&self, frame: &PointCloudFrame) -> PointCloudFrame;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
