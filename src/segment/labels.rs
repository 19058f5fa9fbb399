use ndarray::{Array3, ArrayView3};
use petgraph::unionfind::UnionFind;

use crate::volume::{Label, BACKGROUND};

// Offsets to the 13 26-connected neighbors that precede a voxel in raster
// order. Scanning with these is enough to union every adjacent pair once.
const PRIOR_NEIGHBORS_26: [[isize; 3]; 13] = [
    [-1, -1, -1],
    [-1, -1, 0],
    [-1, -1, 1],
    [-1, 0, -1],
    [-1, 0, 0],
    [-1, 0, 1],
    [-1, 1, -1],
    [-1, 1, 0],
    [-1, 1, 1],
    [0, -1, -1],
    [0, -1, 0],
    [0, -1, 1],
    [0, 0, -1],
];

pub const NEIGHBORS_6: [[isize; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

#[inline]
fn offset(
    (z, x, y): (usize, usize, usize),
    [dz, dx, dy]: [isize; 3],
    (nz, nx, ny): (usize, usize, usize),
) -> Option<(usize, usize, usize)> {
    let z = z as isize + dz;
    let x = x as isize + dx;
    let y = y as isize + dy;
    if z < 0 || x < 0 || y < 0 || z >= nz as isize || x >= nx as isize || y >= ny as isize {
        None
    } else {
        Some((z as usize, x as usize, y as usize))
    }
}

/// Label 26-connected components of equal nonzero value, assigning dense
/// labels 1.. in raster order of first encounter. Two touching objects that
/// carry different values stay separate, which is what lets a corrected
/// label volume be relabeled without re-fusing repaired nuclei.
pub fn label_components(values: ArrayView3<Label>) -> Array3<Label> {
    let dims = values.dim();
    let (nz, nx, ny) = dims;
    let flat = |(z, x, y): (usize, usize, usize)| (z * nx + x) * ny + y;

    let mut forest = UnionFind::<usize>::new(nz * nx * ny);
    for ((z, x, y), &v) in values.indexed_iter() {
        if v == BACKGROUND {
            continue;
        }
        for d in PRIOR_NEIGHBORS_26 {
            if let Some(nb) = offset((z, x, y), d, dims) {
                if values[nb] == v {
                    forest.union(flat(nb), flat((z, x, y)));
                }
            }
        }
    }

    let mut out = Array3::from_elem(dims, BACKGROUND);
    let mut next: Label = 0;
    let mut dense: std::collections::HashMap<usize, Label> = std::collections::HashMap::new();
    for ((z, x, y), &v) in values.indexed_iter() {
        if v == BACKGROUND {
            continue;
        }
        let root = forest.find_mut(flat((z, x, y)));
        let id = *dense.entry(root).or_insert_with(|| {
            next += 1;
            next
        });
        out[(z, x, y)] = id;
    }
    out
}

/// Label 26-connected components of a binary mask.
pub fn label_mask(mask: ArrayView3<bool>) -> Array3<Label> {
    let as_values = mask.mapv(|m| m as Label);
    label_components(as_values.view())
}

/// Labels found in the one-ring 6-connected dilation of an object, read from
/// `values`, excluding the object's own label and background. Sorted
/// ascending, deduplicated. This is the expand-and-intersect step both the
/// degenerate repair and the merge search rely on.
pub fn touching_labels(values: ArrayView3<Label>, coords: &[[usize; 3]], own: Label) -> Vec<Label> {
    let dims = values.dim();
    let mut found = Vec::new();
    for &[z, x, y] in coords {
        for d in NEIGHBORS_6 {
            if let Some(nb) = offset((z, x, y), d, dims) {
                let v = values[nb];
                if v != BACKGROUND && v != own {
                    found.push(v);
                }
            }
        }
    }
    found.sort_unstable();
    found.dedup();
    found
}

/// Sorted distinct nonzero values.
pub fn unique_nonzero(values: ArrayView3<Label>) -> Vec<Label> {
    let mut found: Vec<Label> = values.iter().copied().filter(|&v| v != BACKGROUND).collect();
    found.sort_unstable();
    found.dedup();
    found
}
