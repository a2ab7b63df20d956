//! Frame sources for clarity scoring.
//!
//! Two input shapes are supported: an ordered stream of frames behind the
//! [`FrameSource`] trait (decoded by ffmpeg, or held in memory), and an
//! unordered set of static images enumerated by [`ImageDirectory`].

pub mod directory;
pub mod ffmpeg;
pub mod source;

pub use directory::{DirectoryError, ImageDirectory, ImageEntry, ImageReadError};
pub use ffmpeg::{check_ffmpeg_available, FfmpegSource};
pub use source::{FrameSource, IndexedFrame, MemorySource, SourceError, StreamMetadata};
