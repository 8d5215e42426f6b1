pub mod keys;
pub mod state;

pub use state::{Recorder, RecorderError, RecordingSession};
