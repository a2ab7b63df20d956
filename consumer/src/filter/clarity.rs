use frame_clarity_common::config::FilterConfig;
use frame_clarity_common::frame::{Frame, PixelFormat};
use serde::Serialize;

use super::bilateral::BilateralKernel;
use super::laplacian::{laplacian, variance};
use super::traits::FrameScorer;

/// Bilateral smoothing parameters applied before the Laplacian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    /// Neighbourhood diameter in pixels.
    pub diameter: u32,
    /// Range sigma: how different an intensity may be and still be averaged.
    pub sigma_color: f64,
    /// Spatial sigma: how quickly weight falls off with distance.
    pub sigma_space: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            diameter: 9,
            sigma_color: 75.0,
            sigma_space: 75.0,
        }
    }
}

impl From<&FilterConfig> for FilterParams {
    fn from(config: &FilterConfig) -> Self {
        Self {
            diameter: config.diameter,
            sigma_color: config.sigma_color,
            sigma_space: config.sigma_space,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClarityLabel {
    Blurry,
    Clear,
}

impl ClarityLabel {
    /// `Clear` iff `score >= threshold`.
    pub fn classify(score: f64, threshold: f64) -> Self {
        if score >= threshold {
            ClarityLabel::Clear
        } else {
            ClarityLabel::Blurry
        }
    }

    /// Numeric label used in tabular output: 0 = blurry, 1 = clear.
    pub fn as_u8(self) -> u8 {
        match self {
            ClarityLabel::Blurry => 0,
            ClarityLabel::Clear => 1,
        }
    }

    pub fn is_clear(self) -> bool {
        self == ClarityLabel::Clear
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClarityScore {
    /// Variance of the Laplacian response. Never negative.
    pub score: f64,
    pub label: ClarityLabel,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidFrame {
    #[error("frame has zero size ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
    #[error("pixel buffer is {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
}

/// Variance-of-Laplacian scorer over a bilateral-filtered intensity image.
///
/// The bilateral kernel is built once and reused for every frame.
pub struct ClarityScorer {
    kernel: BilateralKernel,
    threshold: f64,
}

impl ClarityScorer {
    pub fn new(params: FilterParams, threshold: f64) -> Self {
        Self {
            kernel: BilateralKernel::new(&params),
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl FrameScorer for ClarityScorer {
    fn score(&self, frame: &Frame) -> Result<ClarityScore, InvalidFrame> {
        score_with_kernel(frame, &self.kernel, self.threshold)
    }

    fn name(&self) -> &str {
        "laplacian-variance"
    }
}

/// Score one frame with freshly built filter weights. Equivalent to
/// `ClarityScorer::new(*params, threshold).score(frame)`.
#[allow(dead_code)]
pub fn score(
    frame: &Frame,
    params: &FilterParams,
    threshold: f64,
) -> Result<ClarityScore, InvalidFrame> {
    score_with_kernel(frame, &BilateralKernel::new(params), threshold)
}

fn score_with_kernel(
    frame: &Frame,
    kernel: &BilateralKernel,
    threshold: f64,
) -> Result<ClarityScore, InvalidFrame> {
    if frame.is_empty() {
        return Err(InvalidFrame::ZeroDimension {
            width: frame.width(),
            height: frame.height(),
        });
    }
    let expected = frame.pixel_count() * frame.format().channels();
    if frame.data().len() != expected {
        return Err(InvalidFrame::BufferSize {
            got: frame.data().len(),
            expected,
        });
    }

    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let gray = to_intensity(frame);
    let smoothed = kernel.apply(&gray, width, height);
    let response = laplacian(&smoothed, width, height);
    let score = variance(&response);

    Ok(ClarityScore {
        score,
        label: ClarityLabel::classify(score, threshold),
    })
}

/// Reduce a frame to one 8-bit intensity channel using the standard luma
/// weights (0.299, 0.587, 0.114) in 14-bit fixed point.
pub fn to_intensity(frame: &Frame) -> Vec<u8> {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    match frame.format() {
        PixelFormat::Gray8 => frame.data().to_vec(),
        PixelFormat::Rgb8 => frame
            .data()
            .chunks_exact(3)
            .map(|px| {
                let y = px[0] as u32 * R + px[1] as u32 * G + px[2] as u32 * B;
                ((y + (1 << (SHIFT - 1))) >> SHIFT) as u8
            })
            .collect(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn checkerboard(width: u32, height: u32, square: u32) -> Frame {
        let data = (0..height)
            .flat_map(|y| {
                (0..width).map(move |x| if (x / square + y / square) % 2 == 0 { 0 } else { 255 })
            })
            .collect();
        Frame::gray(width, height, data).unwrap()
    }

    pub(crate) fn flat_gray(width: u32, height: u32, value: u8) -> Frame {
        Frame::gray(width, height, vec![value; (width * height) as usize]).unwrap()
    }

    /// Deterministic pseudo-random RGB texture.
    pub(crate) fn textured_rgb(width: u32, height: u32, seed: u32) -> Frame {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        let data = (0..width * height * 3)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        Frame::rgb(width, height, data).unwrap()
    }

    fn box_blur(frame: &Frame) -> Frame {
        let (w, h) = (frame.width() as i64, frame.height() as i64);
        let src = frame.data();
        let at = |x: i64, y: i64| src[(y.clamp(0, h - 1) * w + x.clamp(0, w - 1)) as usize] as u32;
        let data = (0..h)
            .flat_map(|y| {
                (0..w).map(move |x| {
                    let mut sum = 0;
                    for dy in -3..=3 {
                        for dx in -3..=3 {
                            sum += at(x + dx, y + dy);
                        }
                    }
                    (sum / 49) as u8
                })
            })
            .collect();
        Frame::gray(frame.width(), frame.height(), data).unwrap()
    }

    #[test]
    fn checkerboard_is_clear_and_flat_is_blurry() {
        let params = FilterParams::default();
        let sharp = score(&checkerboard(64, 64, 8), &params, 100.0).unwrap();
        assert_eq!(sharp.label, ClarityLabel::Clear);
        assert_eq!(sharp.label.as_u8(), 1);
        assert!(sharp.score > 1000.0, "score {}", sharp.score);

        let flat = score(&flat_gray(64, 64, 128), &params, 100.0).unwrap();
        assert_eq!(flat.label, ClarityLabel::Blurry);
        assert_eq!(flat.label.as_u8(), 0);
    }

    #[test]
    fn uniform_frames_score_exactly_zero() {
        let params = FilterParams::default();
        for value in [0u8, 1, 128, 255] {
            assert_eq!(score(&flat_gray(17, 9, value), &params, 1.0).unwrap().score, 0.0);
            let rgb = Frame::rgb(5, 7, [value, value / 2, 255 - value].repeat(35)).unwrap();
            assert_eq!(score(&rgb, &params, 1.0).unwrap().score, 0.0);
        }
    }

    #[test]
    fn scores_are_non_negative() {
        let params = FilterParams::default();
        for seed in 1..20 {
            let frame = textured_rgb(23, 11, seed);
            assert!(score(&frame, &params, 0.0).unwrap().score >= 0.0);
        }
    }

    #[test]
    fn scoring_is_bit_reproducible() {
        let frame = textured_rgb(48, 32, 7);
        let scorer = ClarityScorer::new(FilterParams::default(), 50.0);
        let a = scorer.score(&frame).unwrap();
        let b = scorer.score(&frame).unwrap();
        let c = score(&frame, &FilterParams::default(), 50.0).unwrap();
        assert_eq!(a.score.to_bits(), b.score.to_bits());
        assert_eq!(a.score.to_bits(), c.score.to_bits());
    }

    #[test]
    fn classification_is_monotonic_in_threshold() {
        let frame = textured_rgb(32, 32, 3);
        let params = FilterParams::default();
        let base = score(&frame, &params, 0.0).unwrap().score;
        let thresholds = [0.0, base * 0.5, base, base * 1.5, base * 10.0];
        let labels: Vec<ClarityLabel> = thresholds
            .iter()
            .map(|&t| score(&frame, &params, t).unwrap().label)
            .collect();
        assert_eq!(labels[0], ClarityLabel::Clear);
        assert_eq!(labels[2], ClarityLabel::Clear, "score equal to threshold is clear");
        for pair in labels.windows(2) {
            // Once blurry at a lower threshold, never clear at a higher one.
            assert!(!(pair[0] == ClarityLabel::Blurry && pair[1] == ClarityLabel::Clear));
        }
        assert_eq!(labels[4], ClarityLabel::Blurry);
    }

    #[test]
    fn blurred_frame_scores_lower() {
        let params = FilterParams::default();
        let sharp = checkerboard(48, 48, 4);
        let blurred = box_blur(&sharp);
        let sharp_score = score(&sharp, &params, 0.0).unwrap().score;
        let blurred_score = score(&blurred, &params, 0.0).unwrap().score;
        assert!(blurred_score < sharp_score / 4.0, "{blurred_score} vs {sharp_score}");
    }

    #[test]
    fn gray_and_equal_channel_rgb_agree() {
        let gray = checkerboard(20, 20, 3);
        let rgb_data = gray.data().iter().flat_map(|&v| [v, v, v]).collect();
        let rgb = Frame::rgb(20, 20, rgb_data).unwrap();
        assert_eq!(to_intensity(&rgb), gray.data());
        let params = FilterParams::default();
        assert_eq!(
            score(&gray, &params, 1.0).unwrap().score,
            score(&rgb, &params, 1.0).unwrap().score
        );
    }

    #[test]
    fn luma_weights() {
        let frame = Frame::rgb(3, 1, vec![255, 0, 0, 0, 255, 0, 0, 0, 255]).unwrap();
        assert_eq!(to_intensity(&frame), vec![76, 150, 29]);
    }

    #[test]
    fn frames_smaller_than_window_are_scored() {
        let params = FilterParams::default();
        let tiny = Frame::gray(2, 3, vec![0, 255, 255, 0, 0, 255]).unwrap();
        let result = score(&tiny, &params, 100.0).unwrap();
        assert!(result.score.is_finite() && result.score >= 0.0);
        assert_eq!(score(&flat_gray(1, 1, 9), &params, 0.5).unwrap().score, 0.0);
    }

    #[test]
    fn zero_sized_frame_is_invalid() {
        let frame = Frame::gray(0, 5, Vec::new()).unwrap();
        let err = score(&frame, &FilterParams::default(), 1.0).unwrap_err();
        assert!(matches!(err, InvalidFrame::ZeroDimension { width: 0, height: 5 }));
    }
}
