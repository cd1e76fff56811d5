//! JSON-lines detection feed.
//!
//! An external camera + encoder process writes one line per captured frame:
//!
//! ```text
//! {"at": "2026-03-02T09:00:00Z", "faces": [[0.01, -0.12, ...], ...]}
//! ```
//!
//! `at` is optional; frames without it are stamped when read. A frame with
//! no faces is `{"faces": []}` (or `{}`).

use chrono::{DateTime, Utc};
use rollcall_core::source::{CameraError, EncodeError, FaceEncoder, Frame, FrameSource};
use rollcall_core::Descriptor;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};

#[derive(Debug, Deserialize)]
struct FeedLine {
    #[serde(default)]
    at: Option<DateTime<Utc>>,
    #[serde(default)]
    faces: Vec<Descriptor>,
}

/// Frame source reading a JSON-lines feed.
pub struct JsonlFeed<R> {
    lines: Lines<R>,
    line_no: usize,
    sequence: u64,
}

/// Boxed reader so file and stdin feeds share one type.
pub type FeedReader = Box<dyn BufRead + Send>;

impl<R: BufRead> JsonlFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            sequence: 0,
        }
    }
}

impl JsonlFeed<FeedReader> {
    /// Open a feed from a file path, or stdin for `-`.
    pub fn open(path: &str) -> Result<Self, CameraError> {
        let reader: FeedReader = if path == "-" {
            Box::new(BufReader::new(std::io::stdin()))
        } else {
            let file = File::open(path).map_err(|e| CameraError::DeviceNotFound(format!("{path}: {e}")))?;
            Box::new(BufReader::new(file))
        };
        tracing::info!(feed = path, "detection feed opened");
        Ok(Self::new(reader))
    }
}

impl<R: BufRead> FrameSource for JsonlFeed<R> {
    type Payload = Vec<Descriptor>;

    fn next_frame(&mut self) -> Result<Option<Frame<Self::Payload>>, CameraError> {
        for line in self.lines.by_ref() {
            let line = line?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let parsed: FeedLine = serde_json::from_str(&line).map_err(|e| {
                CameraError::CaptureFailed(format!("feed line {}: {e}", self.line_no))
            })?;
            self.sequence += 1;

            return Ok(Some(Frame {
                payload: parsed.faces,
                captured_at: parsed.at.unwrap_or_else(Utc::now),
                sequence: self.sequence,
            }));
        }
        Ok(None)
    }
}

/// Encoder for feeds whose frames already carry descriptors.
pub struct FeedEncoder;

impl FaceEncoder for FeedEncoder {
    type Payload = Vec<Descriptor>;

    fn encode(&mut self, frame: &Frame<Self::Payload>) -> Result<Vec<Descriptor>, EncodeError> {
        Ok(frame.payload.clone())
    }
}

/// Read frames until one contains a face and return its first descriptor.
pub fn first_face<S, E>(source: &mut S, encoder: &mut E) -> Result<Option<Descriptor>, CameraError>
where
    S: FrameSource,
    E: FaceEncoder<Payload = S::Payload>,
{
    while let Some(frame) = source.next_frame()? {
        match encoder.encode(&frame) {
            Ok(faces) => {
                if let Some(face) = faces.into_iter().next() {
                    tracing::debug!(sequence = frame.sequence, "face captured for enrollment");
                    return Ok(Some(face));
                }
            }
            Err(e) => tracing::warn!(sequence = frame.sequence, error = %e, "skipping frame"),
        }
    }
    Ok(None)
}
