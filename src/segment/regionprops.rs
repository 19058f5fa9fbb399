use std::collections::{BTreeMap, HashSet};

use super::hull::convex_hull_3d;
use super::labels::NEIGHBORS_6;
use crate::classify::FEATURE_LEN;
use crate::volume::{Label, LabelFrameView, BACKGROUND};

/// One labeled object of a single frame: its label and raster-ordered voxel
/// coordinates. Everything else is derived on demand.
pub struct Region {
    pub label: Label,
    pub coords: Vec<[usize; 3]>,
}

/// Gather every labeled object of a frame, ascending label order.
pub fn regions_of(labels: LabelFrameView) -> Vec<Region> {
    let mut by_label: BTreeMap<Label, Vec<[usize; 3]>> = BTreeMap::new();
    for ((z, x, y), &v) in labels.indexed_iter() {
        if v != BACKGROUND {
            by_label.entry(v).or_default().push([z, x, y]);
        }
    }
    by_label
        .into_iter()
        .map(|(label, coords)| Region { label, coords })
        .collect()
}

pub fn centroid(coords: &[[usize; 3]]) -> [f64; 3] {
    let n = coords.len() as f64;
    let mut c = [0.0; 3];
    for &[z, x, y] in coords {
        c[0] += z as f64;
        c[1] += x as f64;
        c[2] += y as f64;
    }
    [c[0] / n, c[1] / n, c[2] / n]
}

// inclusive bounding box
fn bbox(coords: &[[usize; 3]]) -> ([usize; 3], [usize; 3]) {
    let mut lo = [usize::MAX; 3];
    let mut hi = [0usize; 3];
    for &c in coords {
        for d in 0..3 {
            lo[d] = lo[d].min(c[d]);
            hi[d] = hi[d].max(c[d]);
        }
    }
    (lo, hi)
}

// Voxels on the object surface: those with some 6-neighbor outside the
// object. Feeding only these to the hull keeps it cheap on solid blobs.
fn boundary_coords(coords: &[[usize; 3]], members: &HashSet<[usize; 3]>) -> Vec<[f64; 3]> {
    let mut surface = Vec::new();
    for &[z, x, y] in coords {
        let exposed = NEIGHBORS_6.iter().any(|&[dz, dx, dy]| {
            let zn = z as isize + dz;
            let xn = x as isize + dx;
            let yn = y as isize + dy;
            zn < 0
                || xn < 0
                || yn < 0
                || !members.contains(&[zn as usize, xn as usize, yn as usize])
        });
        if exposed {
            surface.push([z as f64, x as f64, y as f64]);
        }
    }
    surface
}

// Voxel count after closing internal cavities: flood the bounding box
// background from its faces (6-connected); anything unreached is a hole.
fn filled_area(coords: &[[usize; 3]], lo: [usize; 3], hi: [usize; 3]) -> f64 {
    let dims = [hi[0] - lo[0] + 1, hi[1] - lo[1] + 1, hi[2] - lo[2] + 1];
    let flat = |c: [usize; 3]| (c[0] * dims[1] + c[1]) * dims[2] + c[2];
    let ncells = dims[0] * dims[1] * dims[2];

    let mut occupied = vec![false; ncells];
    for &[z, x, y] in coords {
        occupied[flat([z - lo[0], x - lo[1], y - lo[2]])] = true;
    }

    let mut reached = vec![false; ncells];
    let mut stack = Vec::new();
    for z in 0..dims[0] {
        for x in 0..dims[1] {
            for y in 0..dims[2] {
                let on_face = z == 0
                    || x == 0
                    || y == 0
                    || z == dims[0] - 1
                    || x == dims[1] - 1
                    || y == dims[2] - 1;
                let i = flat([z, x, y]);
                if on_face && !occupied[i] && !reached[i] {
                    reached[i] = true;
                    stack.push([z, x, y]);
                }
            }
        }
    }
    while let Some([z, x, y]) = stack.pop() {
        for [dz, dx, dy] in NEIGHBORS_6 {
            let zn = z as isize + dz;
            let xn = x as isize + dx;
            let yn = y as isize + dy;
            if zn < 0 || xn < 0 || yn < 0 {
                continue;
            }
            let nb = [zn as usize, xn as usize, yn as usize];
            if nb[0] >= dims[0] || nb[1] >= dims[1] || nb[2] >= dims[2] {
                continue;
            }
            let i = flat(nb);
            if !occupied[i] && !reached[i] {
                reached[i] = true;
                stack.push(nb);
            }
        }
    }

    let open = reached.iter().filter(|&&r| r).count();
    (ncells - open) as f64
}

// Eigenvalues of a symmetric 3x3 matrix, descending (trigonometric method).
fn symmetric_eigenvalues(m: [[f64; 3]; 3]) -> [f64; 3] {
    let p1 = m[0][1].powi(2) + m[0][2].powi(2) + m[1][2].powi(2);
    if p1 == 0.0 {
        let mut eig = [m[0][0], m[1][1], m[2][2]];
        eig.sort_by(|a, b| b.partial_cmp(a).unwrap());
        return eig;
    }

    let q = (m[0][0] + m[1][1] + m[2][2]) / 3.0;
    let p2 = (m[0][0] - q).powi(2) + (m[1][1] - q).powi(2) + (m[2][2] - q).powi(2) + 2.0 * p1;
    let p = (p2 / 6.0).sqrt();

    let b = |i: usize, j: usize| (m[i][j] - if i == j { q } else { 0.0 }) / p;
    let detb = b(0, 0) * (b(1, 1) * b(2, 2) - b(1, 2) * b(2, 1))
        - b(0, 1) * (b(1, 0) * b(2, 2) - b(1, 2) * b(2, 0))
        + b(0, 2) * (b(1, 0) * b(2, 1) - b(1, 1) * b(2, 0));
    let r = (detb / 2.0).clamp(-1.0, 1.0);
    let phi = r.acos() / 3.0;

    let e0 = q + 2.0 * p * phi.cos();
    let e2 = q + 2.0 * p * (phi + 2.0 * std::f64::consts::PI / 3.0).cos();
    let e1 = 3.0 * q - e0 - e2;
    [e0, e1, e2]
}

// Inertia tensor for unit total mass around the centroid:
// T = trace(C) I - C with C the voxel coordinate covariance.
fn inertia_tensor(coords: &[[usize; 3]], c: [f64; 3]) -> [[f64; 3]; 3] {
    let n = coords.len() as f64;
    let mut cov = [[0.0; 3]; 3];
    for &[z, x, y] in coords {
        let r = [z as f64 - c[0], x as f64 - c[1], y as f64 - c[2]];
        for i in 0..3 {
            for j in 0..3 {
                cov[i][j] += r[i] * r[j];
            }
        }
    }
    for row in cov.iter_mut() {
        for v in row.iter_mut() {
            *v /= n;
        }
    }

    let trace = cov[0][0] + cov[1][1] + cov[2][2];
    let mut tensor = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            tensor[i][j] = if i == j { trace - cov[i][j] } else { -cov[i][j] };
        }
    }
    tensor
}

/// The 22-wide shape descriptor row the classifier consumes, in fixed
/// column order: area, bbox volume, convex volume, filled volume, major and
/// minor axis length, equivalent diameter, extent, max Feret diameter, the 3
/// inertia tensor eigenvalues, solidity, then the 3x3 inertia tensor.
pub fn shape_features(coords: &[[usize; 3]]) -> [f64; FEATURE_LEN] {
    let area = coords.len() as f64;
    let (lo, hi) = bbox(coords);
    let area_bbox = ((hi[0] - lo[0] + 1) * (hi[1] - lo[1] + 1) * (hi[2] - lo[2] + 1)) as f64;

    let members: HashSet<[usize; 3]> = coords.iter().copied().collect();
    let hull = convex_hull_3d(&boundary_coords(coords, &members));
    let area_convex = hull.volume;

    let area_filled = filled_area(coords, lo, hi);

    let c = centroid(coords);
    let tensor = inertia_tensor(coords, c);
    let eigvals = symmetric_eigenvalues(tensor);
    let axis_major = (10.0 * (eigvals[0] + eigvals[1] - eigvals[2]).max(0.0)).sqrt();
    let axis_minor = (10.0 * (-eigvals[0] + eigvals[1] + eigvals[2]).max(0.0)).sqrt();

    let equivalent_diameter = (6.0 * area / std::f64::consts::PI).cbrt();
    let extent = area / area_bbox;

    let mut feret_sq: f64 = 0.0;
    for (i, a) in hull.vertices.iter().enumerate() {
        for b in &hull.vertices[i + 1..] {
            let d = (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2);
            feret_sq = feret_sq.max(d);
        }
    }

    // x / 0 is +inf here, which is exactly the degenerate-shape signal the
    // resolver's repair stage keys on
    let solidity = area / area_convex;

    let mut features = [0.0; FEATURE_LEN];
    features[0] = area;
    features[1] = area_bbox;
    features[2] = area_convex;
    features[3] = area_filled;
    features[4] = axis_major;
    features[5] = axis_minor;
    features[6] = equivalent_diameter;
    features[7] = extent;
    features[8] = feret_sq.sqrt();
    features[9..12].copy_from_slice(&eigvals);
    features[12] = solidity;
    for i in 0..3 {
        features[13 + 3 * i..16 + 3 * i].copy_from_slice(&tensor[i]);
    }
    features
}

/// Solidity alone, for the degenerate-fragment scan.
pub fn solidity(coords: &[[usize; 3]]) -> f64 {
    let members: HashSet<[usize; 3]> = coords.iter().copied().collect();
    let hull = convex_hull_3d(&boundary_coords(coords, &members));
    coords.len() as f64 / hull.volume
}
