use ndarray::{Array3, ArrayView3, Axis};

// Lower-envelope-of-parabolas pass for the exact squared distance transform
// (Felzenszwalb & Huttenlocher). `f` is the squared distance so far, output
// replaces it in place via `out`.
fn dt1d(f: &[f64], out: &mut [f64], hull: &mut Vec<usize>, bounds: &mut Vec<f64>) {
    let n = f.len();
    hull.clear();
    bounds.clear();
    hull.push(0);
    bounds.push(f64::NEG_INFINITY);
    bounds.push(f64::INFINITY);

    for q in 1..n {
        let mut k = hull.len() - 1;
        loop {
            let p = hull[k];
            let s = ((f[q] + (q * q) as f64) - (f[p] + (p * p) as f64))
                / (2.0 * (q as f64 - p as f64));
            if s <= bounds[k] && k > 0 {
                hull.pop();
                bounds.pop();
                k -= 1;
            } else {
                bounds.truncate(k + 1);
                hull.truncate(k + 1);
                hull.push(q);
                bounds.push(s);
                bounds.push(f64::INFINITY);
                break;
            }
        }
    }

    let mut k = 0;
    for q in 0..n {
        while bounds[k + 1] < q as f64 {
            k += 1;
        }
        let p = hull[k];
        out[q] = (q as f64 - p as f64).powi(2) + f[p];
    }
}

/// Exact Euclidean distance from every foreground voxel to the nearest
/// background voxel, in voxel units (unit sampling on all axes, as in the
/// reference pipeline).
pub fn distance_transform(mask: ArrayView3<bool>) -> Array3<f64> {
    // finite stand-in for "no background seen yet"; larger than any
    // achievable squared distance, and keeps the parabola intersections
    // out of inf-minus-inf territory
    let (nz, nx, ny) = mask.dim();
    let cap = ((nz * nz + nx * nx + ny * ny) + 1) as f64;
    let mut dist = mask.mapv(|m| if m { cap } else { 0.0 });

    let mut hull = Vec::new();
    let mut bounds = Vec::new();
    let mut lane_in = Vec::new();
    let mut lane_out = Vec::new();

    for axis in [Axis(2), Axis(1), Axis(0)] {
        for mut lane in dist.lanes_mut(axis) {
            lane_in.clear();
            lane_in.extend(lane.iter().copied());
            lane_out.resize(lane_in.len(), 0.0);
            dt1d(&lane_in, &mut lane_out, &mut hull, &mut bounds);
            for (v, &d) in lane.iter_mut().zip(lane_out.iter()) {
                *v = d;
            }
        }
    }

    dist.mapv_inplace(|d| d.sqrt());
    dist
}

// Sliding-window maximum along one axis with a monotonic deque, so the peak
// scan stays linear in the volume size.
fn max_filter_axis(vol: &Array3<f64>, radius: usize, axis: Axis) -> Array3<f64> {
    let n = vol.len_of(axis);
    let mut out = vol.clone();
    let mut deque: std::collections::VecDeque<usize> = std::collections::VecDeque::new();

    for (lane_in, mut lane_out) in vol.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        deque.clear();
        for i in 0..n + radius {
            if i < n {
                while let Some(&back) = deque.back() {
                    if lane_in[back] <= lane_in[i] {
                        deque.pop_back();
                    } else {
                        break;
                    }
                }
                deque.push_back(i);
            }
            if i >= radius {
                let center = i - radius;
                while let Some(&front) = deque.front() {
                    if front + radius < center {
                        deque.pop_front();
                    } else {
                        break;
                    }
                }
                lane_out[center] = lane_in[*deque.front().unwrap()];
            }
        }
    }
    out
}

/// Local maxima of the distance transform over a fixed box footprint,
/// restricted to the foreground. Plateau voxels all qualify; connected
/// plateaus collapse into a single marker when the seed mask is labeled.
pub fn local_maxima(
    dist: &Array3<f64>,
    mask: ArrayView3<bool>,
    footprint: (usize, usize, usize),
) -> Array3<bool> {
    let (fz, fx, fy) = footprint;
    let mut windowed = max_filter_axis(dist, fz / 2, Axis(0));
    windowed = max_filter_axis(&windowed, fx / 2, Axis(1));
    windowed = max_filter_axis(&windowed, fy / 2, Axis(2));

    let mut peaks = Array3::from_elem(dist.dim(), false);
    for ((idx, &d), &m) in dist.indexed_iter().zip(mask.iter()) {
        peaks[idx] = m && d > 0.0 && d == windowed[idx];
    }
    peaks
}
