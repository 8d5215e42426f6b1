use std::path::{Path, PathBuf};

use realsense_viewer_common::frame::PointCloudFrame;
use realsense_viewer_common::pcd::{write_pcd_binary_compressed, PcdError};
use tracing::{debug, info};

use super::keys::{session_dir, session_frame_path};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("failed to create output directory {0}: {1}")]
    CreateRoot(String, std::io::Error),
    #[error("failed to create session directory {0}: {1}")]
    CreateSession(String, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(String, PcdError),
}

/// Allocates recording sessions. Lives on the control loop.
///
/// Session ids grow monotonically for the lifetime of the process,
/// starting at 1, so every activation gets a fresh directory.
#[derive(Debug)]
pub struct Recorder {
    root: PathBuf,
    last_session_id: u32,
}

impl Recorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_session_id: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate the next session id and create its directory.
    ///
    /// Fails if the directory already exists or cannot be created.
    pub fn start_session(&mut self) -> Result<RecordingSession, RecorderError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| RecorderError::CreateRoot(self.root.display().to_string(), e))?;
        self.last_session_id += 1;
        let dir = session_dir(&self.root, self.last_session_id);
        std::fs::create_dir(&dir)
            .map_err(|e| RecorderError::CreateSession(dir.display().to_string(), e))?;
        info!(session = self.last_session_id, dir = %dir.display(), "recording session started");
        Ok(RecordingSession {
            id: self.last_session_id,
            dir,
            next_frame: 0,
        })
    }
}

/// An active recording session. Owned by the capture-side frame processor.
#[derive(Debug)]
pub struct RecordingSession {
    id: u32,
    dir: PathBuf,
    next_frame: u64,
}

impl RecordingSession {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.next_frame
    }

    /// Write `frame` as the next file of the session.
    ///
    /// The frame counter only advances on success, so file indices stay
    /// gap-free.
    pub fn write_frame(&mut self, frame: &PointCloudFrame) -> Result<PathBuf, RecorderError> {
        let path = session_frame_path(&self.dir, self.next_frame);
        write_pcd_binary_compressed(&path, frame)
            .map_err(|e| RecorderError::Write(path.display().to_string(), e))?;
        debug!(session = self.id, frame = self.next_frame, seq = frame.seq, "recorded frame");
        self.next_frame += 1;
        Ok(path)
    }
}
