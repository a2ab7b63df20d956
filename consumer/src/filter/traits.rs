use frame_clarity_common::frame::Frame;

use super::clarity::{ClarityScore, InvalidFrame};

/// Per-frame clarity scoring interface.
///
/// Implementations are pure: the same frame always yields the same score,
/// and scoring never mutates shared state, so one scorer can be shared
/// across worker threads.
pub trait FrameScorer: Send + Sync {
    /// Score one frame. Fails only for frames with no pixels or an
    /// inconsistent buffer.
    fn score(&self, frame: &Frame) -> Result<ClarityScore, InvalidFrame>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
