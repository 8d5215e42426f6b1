use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use realsense_viewer_capture::FrameCallback;
use realsense_viewer_common::frame::PointCloudFrame;
use realsense_viewer_common::settings::BilateralParams;
use tracing::{debug, error, info};

use crate::filter::{FastBilateralFilter, PostFilter};
use crate::handoff::FrameSlot;
use crate::recorder::RecordingSession;

/// Settings changes sent from the control loop to the capture thread.
#[derive(Debug)]
pub enum ProcessorCommand {
    /// Replace the post-filter; `None` disables it.
    SetBilateral(Option<BilateralParams>),
    StartRecording(RecordingSession),
    StopRecording,
}

pub fn command_channel() -> (Sender<ProcessorCommand>, Receiver<ProcessorCommand>) {
    crossbeam_channel::unbounded()
}

/// Runs on the capture thread for every delivered frame: applies pending
/// settings, post-filters, publishes the frame and records it.
pub struct FrameProcessor {
    slot: Arc<FrameSlot>,
    commands: Receiver<ProcessorCommand>,
    filter: Option<Box<dyn PostFilter>>,
    session: Option<RecordingSession>,
}

impl FrameProcessor {
    pub fn new(slot: Arc<FrameSlot>, commands: Receiver<ProcessorCommand>) -> Self {
        Self {
            slot,
            commands,
            filter: None,
            session: None,
        }
    }

    fn apply_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(ProcessorCommand::SetBilateral(params)) => {
                    self.filter = params.map(|p| Box::new(FastBilateralFilter::new(p)) as Box<dyn PostFilter>);
                    let name = self.filter.as_ref().map(|f| f.name()).unwrap_or("none");
                    debug!(filter = name, ?params, "post-filter updated");
                }
                Ok(ProcessorCommand::StartRecording(session)) => {
                    self.session = Some(session);
                }
                Ok(ProcessorCommand::StopRecording) => {
                    if let Some(session) = self.session.take() {
                        info!(
                            session = session.id(),
                            dir = %session.dir().display(),
                            frames = session.frames_written(),
                            "recording session finished"
                        );
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    pub fn on_frame(&mut self, frame: Arc<PointCloudFrame>) {
        self.apply_commands();

        let frame = match &self.filter {
            Some(filter) => Arc::new(filter.apply(&frame)),
            None => frame,
        };

        if self.slot.put(Arc::clone(&frame)).is_some() {
            debug!(seq = frame.seq, "display fell behind, replaced pending frame");
        }

        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.write_frame(&frame) {
                error!(error = %e, seq = frame.seq, "failed to record frame");
            }
        }
    }

    /// Wrap the processor into a capture callback.
    pub fn into_callback(mut self) -> FrameCallback {
        Box::new(move |frame| self.on_frame(frame))
    }
}
