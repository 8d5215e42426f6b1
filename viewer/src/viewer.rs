use std::sync::Arc;

use crossbeam_channel::Sender;
use realsense_viewer_capture::{CaptureDevice, CaptureError};
use realsense_viewer_common::frame::PointCloudFrame;
use realsense_viewer_common::pcd::write_pcd_binary_compressed;
use realsense_viewer_common::settings::Settings;
use tracing::{debug, error, info, warn};

use crate::dispatch::{dispatch, Action};
use crate::display::Display;
use crate::handoff::FrameSlot;
use crate::overlay::status_lines;
use crate::processor::{command_channel, FrameProcessor, ProcessorCommand};
use crate::recorder::keys::snapshot_path;
use crate::recorder::{Recorder, RecorderError};

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[cfg(not(feature = "gui"))]
    #[error("built without the `gui` feature, no display available")]
    NoDisplay,
}

/// The control loop: moves frames from the capture side to the display and
/// turns key presses into settings changes.
pub struct Viewer<D: Display> {
    display: D,
    device: Box<dyn CaptureDevice>,
    slot: Arc<FrameSlot>,
    commands: Sender<ProcessorCommand>,
    processor: Option<FrameProcessor>,
    recorder: Recorder,
    settings: Settings,
    last_displayed: Option<Arc<PointCloudFrame>>,
}

impl<D: Display> Viewer<D> {
    pub fn new(display: D, device: Box<dyn CaptureDevice>, recorder: Recorder) -> Self {
        let slot = Arc::new(FrameSlot::new());
        let (commands, receiver) = command_channel();
        let processor = FrameProcessor::new(Arc::clone(&slot), receiver);
        Self {
            display,
            device,
            slot,
            commands,
            processor: Some(processor),
            recorder,
            settings: Settings::default(),
            last_displayed: None,
        }
    }

    #[cfg(test)]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stream until the display is closed. Acquisition is stopped on every
    /// exit path.
    pub fn run(&mut self) -> Result<(), ViewerError> {
        let processor = self.processor.take().ok_or(CaptureError::AlreadyRunning)?;

        self.device.set_confidence_threshold(self.settings.confidence_threshold);
        self.device
            .enable_temporal_filtering(self.settings.temporal_filter, self.settings.window_size);
        self.device.start(processor.into_callback())?;
        info!(serial = self.device.serial_number(), "streaming started");
        self.refresh_overlay();

        let result = self.event_loop();

        self.device.stop();
        info!(serial = self.device.serial_number(), "streaming stopped");
        result
    }

    fn event_loop(&mut self) -> Result<(), ViewerError> {
        while !self.display.is_stopped() {
            self.poll_frame();
            for key in self.display.spin_once() {
                self.handle_key(key)?;
            }
        }
        Ok(())
    }

    /// Show the pending frame, if any. Never waits.
    pub fn poll_frame(&mut self) -> bool {
        let Some(frame) = self.slot.take() else {
            return false;
        };
        if !self.display.update_cloud(&frame) {
            self.display.add_cloud(&frame);
            self.display.reset_camera();
        }
        self.last_displayed = Some(frame);
        self.refresh_overlay();
        true
    }

    /// Apply one key press. Only a failure to start a recording session is
    /// returned as an error.
    pub fn handle_key(&mut self, key: char) -> Result<(), ViewerError> {
        let Some(action) = dispatch(&mut self.settings, key) else {
            return Ok(());
        };
        match action {
            Action::PushTemporal(mode, window) => self.device.enable_temporal_filtering(mode, window),
            Action::PushConfidence(threshold) => self.device.set_confidence_threshold(threshold),
            Action::UpdatePostFilter(params) => self.send(ProcessorCommand::SetBilateral(params)),
            Action::SaveSnapshot => self.save_snapshot(),
            Action::StartRecording => {
                let session = self.recorder.start_session()?;
                self.send(ProcessorCommand::StartRecording(session));
            }
            Action::StopRecording => self.send(ProcessorCommand::StopRecording),
        }
        self.refresh_overlay();
        Ok(())
    }

    fn send(&self, command: ProcessorCommand) {
        // The receiver lives in the device callback, gone once streaming stopped.
        if let Err(e) = self.commands.send(command) {
            debug!(command = ?e.into_inner(), "frame processor is gone, command dropped");
        }
    }

    fn save_snapshot(&self) {
        let Some(frame) = &self.last_displayed else {
            warn!("no frame displayed yet, nothing to save");
            return;
        };
        let path = snapshot_path(self.recorder.root(), self.device.serial_number(), frame.stamp_us);
        match write_pcd_binary_compressed(&path, frame) {
            Ok(encoding) => info!(path = %path.display(), ?encoding, "saved point cloud"),
            Err(e) => error!(path = %path.display(), error = %e, "failed to save point cloud"),
        }
    }

    fn refresh_overlay(&mut self) {
        let lines = status_lines(&self.settings, self.device.frames_per_second());
        self.display.set_overlay(&lines);
    }
}
