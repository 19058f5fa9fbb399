use ndarray::{Array3, ArrayView3};

const NBINS: usize = 256;

/// Global Otsu threshold over a smoothed frame: 256-bin histogram over the
/// value range, maximizing between-class variance. Returns the upper edge of
/// the value range for constant frames, so thresholding leaves them empty.
pub fn otsu_threshold(frame: ArrayView3<f64>) -> f64 {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &v in frame.iter() {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !(hi > lo) {
        return hi;
    }

    let mut histogram = [0u64; NBINS];
    let scale = NBINS as f64 / (hi - lo);
    for &v in frame.iter() {
        let bin = (((v - lo) * scale) as usize).min(NBINS - 1);
        histogram[bin] += 1;
    }

    let total: f64 = frame.len() as f64;
    let total_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut weight_bg = 0.0;
    let mut sum_bg = 0.0;
    let mut best_variance = f64::NEG_INFINITY;
    let mut best_bin = 0;

    for (i, &count) in histogram.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += i as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (total_sum - sum_bg) / weight_fg;
        let variance = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best_bin = i;
        }
    }

    // threshold at the bin center
    lo + (best_bin as f64 + 0.5) / scale
}

/// Foreground mask: strictly above the threshold.
pub fn binarize(frame: ArrayView3<f64>, threshold: f64) -> Array3<bool> {
    frame.mapv(|v| v > threshold)
}
