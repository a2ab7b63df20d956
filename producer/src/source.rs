use frame_clarity_common::frame::Frame;
use std::collections::VecDeque;
use std::future::Future;

/// Properties of an opened stream, known before the first frame is read.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    /// Frames per second. Always positive.
    pub frame_rate: f64,
    /// Total frame count if the container reports it.
    pub total_frames: Option<u64>,
    pub width: u32,
    pub height: u32,
    /// Display rotation in degrees (0, 90, 180 or 270) reported by the
    /// container. Frames are delivered in coded orientation regardless.
    pub rotation: u32,
}

/// A frame tagged with its zero-based position in the source sequence.
#[derive(Debug, Clone)]
pub struct IndexedFrame {
    pub index: u64,
    pub frame: Frame,
}

impl IndexedFrame {
    pub fn timestamp_secs(&self, frame_rate: f64) -> f64 {
        self.index as f64 / frame_rate
    }
}

/// Ordered supplier of decoded frames.
///
/// Implementations deliver frames with strictly increasing indices starting
/// at 0. `Ok(None)` marks the end of the stream; a `SourceError::Decode`
/// means the source could not produce the next frame and will not recover.
pub trait FrameSource: Send {
    fn metadata(&self) -> &StreamMetadata;

    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Result<Option<IndexedFrame>, SourceError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open stream {identifier}: {reason}")]
    Open { identifier: String, reason: String },
    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: u64, reason: String },
}

/// Frame source over frames already held in memory.
///
/// Useful for embedding the pipeline where frames arrive from elsewhere,
/// and for exercising it without an external decoder.
pub struct MemorySource {
    frames: VecDeque<Frame>,
    metadata: StreamMetadata,
    next_index: u64,
    failure: Option<String>,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>, frame_rate: f64) -> Self {
        let (width, height) = frames
            .first()
            .map(|f| (f.width(), f.height()))
            .unwrap_or((0, 0));
        let metadata = StreamMetadata {
            frame_rate,
            total_frames: Some(frames.len() as u64),
            width,
            height,
            rotation: 0,
        };
        Self {
            frames: frames.into(),
            metadata,
            next_index: 0,
            failure: None,
        }
    }

    /// After the supplied frames run out, fail with a decode error instead of
    /// ending cleanly.
    pub fn failing_after(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }
}

impl FrameSource for MemorySource {
    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    async fn next_frame(&mut self) -> Result<Option<IndexedFrame>, SourceError> {
        match self.frames.pop_front() {
            Some(frame) => {
                let index = self.next_index;
                self.next_index += 1;
                Ok(Some(IndexedFrame { index, frame }))
            }
            None => match self.failure.take() {
                Some(reason) => Err(SourceError::Decode {
                    index: self.next_index,
                    reason,
                }),
                None => Ok(None),
            },
        }
    }
}
