/// 4-neighbour discrete Laplacian of a `width x height` intensity grid,
/// one response per pixel. Out-of-range neighbours mirror across the edge
/// without repeating it (`dcb|abcd|cba`), so a flat region always responds
/// with exactly zero.
pub fn laplacian(src: &[u8], width: usize, height: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        let (up, down) = mirrored_neighbours(y, height);
        let (row, row_up, row_down) = (y * width, up * width, down * width);
        for x in 0..width {
            let (left, right) = mirrored_neighbours(x, width);
            let centre = src[row + x] as i32;
            let sum = src[row + left] as i32
                + src[row + right] as i32
                + src[row_up + x] as i32
                + src[row_down + x] as i32;
            out.push((sum - 4 * centre) as f64);
        }
    }
    out
}

/// Previous and next positions of `i` in `0..len`, reflected at the ends
/// without duplicating the edge sample. A single sample is its own
/// neighbour.
fn mirrored_neighbours(i: usize, len: usize) -> (usize, usize) {
    let prev = if i == 0 { 1.min(len - 1) } else { i - 1 };
    let next = if i + 1 == len { i.saturating_sub(1) } else { i + 1 };
    (prev, next)
}

/// Population variance, computed in two passes (mean first) so that large
/// responses do not lose precision to cancellation.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}
