#[cfg(feature = "gui")]
pub mod kiss3d;

use std::sync::Arc;

use realsense_viewer_common::frame::PointCloudFrame;

use crate::overlay::OverlayLine;

/// Interactive point-cloud window driven by the control loop.
///
/// All calls happen on the control loop's thread.
pub trait Display {
    /// True once the operator closed the window.
    fn is_stopped(&self) -> bool;

    /// Replace the shown cloud. Returns false when no cloud is shown yet.
    fn update_cloud(&mut self, frame: &Arc<PointCloudFrame>) -> bool;

    fn add_cloud(&mut self, frame: &Arc<PointCloudFrame>);

    /// Frame the shown cloud.
    fn reset_camera(&mut self);

    fn set_overlay(&mut self, lines: &[OverlayLine]);

    /// Render once and process window events. Returns the characters typed
    /// during this pass; key releases are not reported.
    fn spin_once(&mut self) -> Vec<char>;
}
