use ndarray::{Array1, Array3, ArrayView3, Axis};

// Discrete gaussian kernel, truncated at 4σ and normalized to sum 1.
fn gaussian_kernel(sigma: f64) -> Array1<f64> {
    let radius = (4.0 * sigma).ceil().max(1.0) as usize;
    let mut kernel = Array1::zeros(2 * radius + 1);
    for (i, w) in kernel.iter_mut().enumerate() {
        let x = i as f64 - radius as f64;
        *w = (-0.5 * (x / sigma).powi(2)).exp();
    }
    let total = kernel.sum();
    kernel /= total;
    kernel
}

// Convolve one axis with clamp-to-edge boundary handling.
fn convolve_axis(vol: &Array3<f64>, kernel: &Array1<f64>, axis: Axis) -> Array3<f64> {
    let radius = kernel.len() / 2;
    let n = vol.len_of(axis) as isize;
    let mut out = Array3::zeros(vol.dim());

    for (lane_in, mut lane_out) in vol.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        for i in 0..n {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let j = (i + k as isize - radius as isize).clamp(0, n - 1);
                acc += w * lane_in[j as usize];
            }
            lane_out[i as usize] = acc;
        }
    }
    out
}

/// Gaussian-smooth an intensity frame, separably along z, x, y.
pub fn gaussian_smooth(frame: ArrayView3<u16>, sigma: f64) -> Array3<f64> {
    let kernel = gaussian_kernel(sigma);
    let mut smoothed = frame.mapv(|v| v as f64);
    for axis in [Axis(0), Axis(1), Axis(2)] {
        smoothed = convolve_axis(&smoothed, &kernel, axis);
    }
    smoothed
}
