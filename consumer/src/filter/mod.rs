pub mod bilateral;
pub mod clarity;
pub mod laplacian;
pub mod sampling;
pub mod traits;

pub use clarity::{ClarityLabel, ClarityScore, ClarityScorer, FilterParams, InvalidFrame};
pub use sampling::{selected_count, should_score};
pub use traits::FrameScorer;
