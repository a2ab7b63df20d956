use super::clarity::FilterParams;

/// Precomputed weights for a bilateral filter over 8-bit intensity.
///
/// Each output pixel is the weighted mean of the pixels inside a circular
/// window, where a neighbour's weight is the product of a spatial Gaussian
/// on its distance and a range Gaussian on its intensity difference from
/// the centre. Neighbours across a strong edge get almost no weight, so
/// edges survive while flat-region noise is averaged out.
pub struct BilateralKernel {
    radius: usize,
    /// (dx, dy, spatial weight) for every offset inside the window.
    offsets: Vec<(isize, isize, f64)>,
    /// Range weight indexed by absolute intensity difference.
    color_weights: [f64; 256],
}

impl BilateralKernel {
    pub fn new(params: &FilterParams) -> Self {
        let radius = (params.diameter as usize / 2).max(1);
        let space_coeff = -0.5 / (params.sigma_space * params.sigma_space);
        let color_coeff = -0.5 / (params.sigma_color * params.sigma_color);

        let mut color_weights = [0.0f64; 256];
        for (diff, weight) in color_weights.iter_mut().enumerate() {
            let d = diff as f64;
            *weight = (d * d * color_coeff).exp();
        }

        let r = radius as isize;
        let mut offsets = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                let dist_sq = (dx * dx + dy * dy) as f64;
                if dist_sq.sqrt() > radius as f64 {
                    continue;
                }
                offsets.push((dx, dy, (dist_sq * space_coeff).exp()));
            }
        }

        Self {
            radius,
            offsets,
            color_weights,
        }
    }

    #[cfg(test)]
    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Number of neighbours contributing to each output pixel.
    #[cfg(test)]
    pub fn window_len(&self) -> usize {
        self.offsets.len()
    }

    /// Filter a `width x height` intensity grid. Both dimensions must be
    /// nonzero. Pixels outside the grid take the value of the nearest edge
    /// pixel.
    pub fn apply(&self, src: &[u8], width: usize, height: usize) -> Vec<u8> {
        let r = self.radius;
        let padded = replicate_border(src, width, height, r);
        let stride = width + 2 * r;
        let taps: Vec<(isize, f64)> = self
            .offsets
            .iter()
            .map(|&(dx, dy, w)| (dy * stride as isize + dx, w))
            .collect();

        let mut out = Vec::with_capacity(width * height);
        for y in 0..height {
            let row = (y + r) * stride + r;
            for x in 0..width {
                let centre_idx = row + x;
                let centre = padded[centre_idx];
                let mut sum = 0.0;
                let mut weight_sum = 0.0;
                for &(delta, space_weight) in &taps {
                    let value = padded[(centre_idx as isize + delta) as usize];
                    let weight =
                        space_weight * self.color_weights[value.abs_diff(centre) as usize];
                    sum += weight * value as f64;
                    weight_sum += weight;
                }
                // The centre tap has weight 1, so weight_sum is never zero.
                out.push((sum / weight_sum).round().clamp(0.0, 255.0) as u8);
            }
        }
        out
    }
}

/// Copy `src` into a buffer grown by `pad` pixels on every side, filling
/// the border by repeating the nearest edge pixel. Returns a grid of
/// `(width + 2*pad) x (height + 2*pad)`.
fn replicate_border(src: &[u8], width: usize, height: usize, pad: usize) -> Vec<u8> {
    let stride = width + 2 * pad;
    let mut out = Vec::with_capacity(stride * (height + 2 * pad));
    for py in 0..height + 2 * pad {
        let y = py.saturating_sub(pad).min(height - 1);
        let row = &src[y * width..(y + 1) * width];
        out.extend(std::iter::repeat(row[0]).take(pad));
        out.extend_from_slice(row);
        out.extend(std::iter::repeat(row[width - 1]).take(pad));
    }
    out
}
