use ndarray::{Array3, ArrayView3};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::labels::NEIGHBORS_6;
use crate::volume::{Label, BACKGROUND};

/// Marker-controlled watershed: flood `markers` over the cost surface
/// (ascending), restricted to `mask`, 6-connected. Ties resolve first-come,
/// by insertion age, so the result is deterministic. Every masked voxel
/// reachable from a marker ends up with exactly one label.
pub fn watershed(
    cost: &Array3<f64>,
    markers: ArrayView3<Label>,
    mask: ArrayView3<bool>,
) -> Array3<Label> {
    let dims = cost.dim();
    let (nz, nx, ny) = dims;
    let mut out = Array3::from_elem(dims, BACKGROUND);

    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, u64, (usize, usize, usize))>> =
        BinaryHeap::new();
    let mut age: u64 = 0;

    for (idx, &m) in markers.indexed_iter() {
        if m != BACKGROUND && mask[idx] {
            out[idx] = m;
            heap.push(Reverse((OrderedFloat(cost[idx]), age, idx)));
            age += 1;
        }
    }

    while let Some(Reverse((_, _, (z, x, y)))) = heap.pop() {
        let label = out[(z, x, y)];
        for [dz, dx, dy] in NEIGHBORS_6 {
            let zn = z as isize + dz;
            let xn = x as isize + dx;
            let yn = y as isize + dy;
            if zn < 0 || xn < 0 || yn < 0 || zn >= nz as isize || xn >= nx as isize || yn >= ny as isize
            {
                continue;
            }
            let nb = (zn as usize, xn as usize, yn as usize);
            if mask[nb] && out[nb] == BACKGROUND {
                out[nb] = label;
                heap.push(Reverse((OrderedFloat(cost[nb]), age, nb)));
                age += 1;
            }
        }
    }

    out
}
