//! Frame source and face encoder contracts.
//!
//! Camera acquisition and descriptor extraction live outside this crate; the
//! session engine only sees these traits.

use crate::types::Descriptor;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("read: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("encoding failed: {0}")]
    Failed(String),
}

/// A captured frame with its capture time.
#[derive(Debug, Clone)]
pub struct Frame<P> {
    pub payload: P,
    pub captured_at: DateTime<Utc>,
    pub sequence: u64,
}

/// A live, non-restartable sequence of frames.
pub trait FrameSource {
    type Payload;

    /// Next frame, or `Ok(None)` once the source has ended.
    fn next_frame(&mut self) -> Result<Option<Frame<Self::Payload>>, CameraError>;
}

/// Maps a frame to zero or more face descriptors.
pub trait FaceEncoder {
    type Payload;

    fn encode(&mut self, frame: &Frame<Self::Payload>) -> Result<Vec<Descriptor>, EncodeError>;
}
