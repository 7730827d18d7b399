//! Per-image standardization applied to face crops before embedding.

/// Mean and standard deviation of every value in `pixels`.
///
/// The deviation uses the sample estimate and is clamped from below at
/// `1 / sqrt(n)`, so flat crops do not blow up when divided. Returns `None`
/// for an empty slice.
pub fn mean_std(pixels: &[f32]) -> Option<(f32, f32)> {
    if pixels.is_empty() {
        return None;
    }
    let count = pixels.len() as f64;
    let mean = pixels.iter().map(|&v| f64::from(v)).sum::<f64>() / count;
    let squares: f64 = pixels
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum();
    let std = (squares / (count - 1.0).max(1.0))
        .sqrt()
        .max(1.0 / count.sqrt());
    Some((mean as f32, std as f32))
}

/// Standardize `pixels` in place, returning the mean and deviation used.
pub fn prewhiten(pixels: &mut [f32]) -> Option<(f32, f32)> {
    let (mean, std) = mean_std(pixels)?;
    let scale = 1.0 / std;
    for value in pixels.iter_mut() {
        *value = (*value - mean) * scale;
    }
    Some((mean, std))
}
