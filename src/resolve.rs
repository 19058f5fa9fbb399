use itertools::Itertools;
use log::{debug, trace};
use ndarray::Array2;
use std::collections::{HashMap, HashSet};

use crate::classify::{Classify, SegClass, FEATURE_LEN};
use crate::error::Error;
use crate::segment::labels::{label_components, touching_labels};
use crate::segment::regionprops::{regions_of, shape_features, solidity, Region};
use crate::volume::{Label, LabelFrame, BACKGROUND};

fn paint(labels: &mut LabelFrame, coords: &[[usize; 3]], value: Label) {
    for &[z, x, y] in coords {
        labels[[z, x, y]] = value;
    }
}

/// All non-empty subsets of `0..n`, ordered by increasing cardinality and
/// lexicographically within a cardinality. The merge search picks the LAST
/// well-segmented candidate, so this order is load-bearing: it prefers the
/// largest qualifying merge, and among equal sizes the lexicographically
/// latest.
pub fn neighbor_subsets(n: usize) -> Vec<Vec<usize>> {
    (1..=n).flat_map(|k| (0..n).combinations(k)).collect()
}

// Stage A: degenerate fragments (non-finite solidity, flat or near-empty
// shapes the watershed sometimes sheds) get absorbed into the smallest
// touching label. Isolated ones stay as they are.
fn repair_degenerate_fragments(labels: &mut LabelFrame) {
    let regions = regions_of(labels.view());
    let mut repaired = 0;
    for region in &regions {
        if solidity(&region.coords).is_finite() {
            continue;
        }
        let touching = touching_labels(labels.view(), &region.coords, region.label);
        match touching.first() {
            Some(&neighbor) => {
                paint(labels, &region.coords, neighbor);
                repaired += 1;
            }
            None => {
                trace!(
                    "degenerate fragment {} touches nothing, leaving it",
                    region.label
                );
            }
        }
    }
    if repaired > 0 {
        debug!("absorbed {} degenerate fragments", repaired);
    }
}

// Stage B: drop every object with a voxel within `margin` of the x/y frame
// boundary (the z boundary is exempt); clipped nuclei have incomplete
// shapes the classifier cannot judge.
fn remove_border_objects(labels: &mut LabelFrame, margin: usize) {
    let (_, nx, ny) = labels.dim();
    let mut border: Vec<Label> = labels
        .indexed_iter()
        .filter(|&((_, x, y), &v)| {
            v != BACKGROUND
                && (x < margin
                    || x >= nx.saturating_sub(margin)
                    || y < margin
                    || y >= ny.saturating_sub(margin))
        })
        .map(|(_, &v)| v)
        .collect();
    border.sort_unstable();
    border.dedup();

    if !border.is_empty() {
        let doomed: HashSet<Label> = border.iter().copied().collect();
        labels.mapv_inplace(|v| if doomed.contains(&v) { BACKGROUND } else { v });
        debug!("removed {} border objects", doomed.len());
    }
}

fn feature_matrix(candidates: &[Vec<[usize; 3]>]) -> Array2<f64> {
    let mut features = Array2::zeros((candidates.len(), FEATURE_LEN));
    for (i, coords) in candidates.iter().enumerate() {
        let row = shape_features(coords);
        features.row_mut(i).assign(&ndarray::ArrayView1::from(&row[..]));
    }
    features
}

// Stage C: classify every object; each flagged (over-segmented) object in
// ascending label order picks its merge partners from the flagged pool by
// enumerating neighbor subsets and keeping the last candidate the
// classifier accepts. Consumed objects leave the pool immediately, so no
// voxel takes part in two merges.
fn resolve_oversegmented<C: Classify>(
    labels: &mut LabelFrame,
    classifier: &C,
) -> Result<(), Error> {
    let regions = regions_of(labels.view());
    if regions.is_empty() {
        return Ok(());
    }

    let coords_list: Vec<Vec<[usize; 3]>> = regions.iter().map(|r| r.coords.clone()).collect();
    let preds = classifier.classify(feature_matrix(&coords_list).view())?;

    let flagged: Vec<&Region> = regions
        .iter()
        .zip(&preds)
        .filter(|(_, p)| **p == SegClass::OverSegmented)
        .map(|(r, _)| r)
        .collect();
    debug!(
        "{} of {} objects flagged over-segmented",
        flagged.len(),
        regions.len()
    );

    // working pool: the flagged objects only, keyed by label
    let mut pool_volume = LabelFrame::zeros(labels.raw_dim());
    let mut pool: HashMap<Label, &Region> = HashMap::new();
    for region in &flagged {
        paint(&mut pool_volume, &region.coords, region.label);
        pool.insert(region.label, region);
    }

    for region in &flagged {
        if !pool.contains_key(&region.label) {
            continue; // consumed by an earlier merge
        }

        let neighbors = touching_labels(pool_volume.view(), &region.coords, region.label);
        let partners: Vec<Label> = match neighbors.len() {
            0 => {
                trace!(
                    "flagged object {} is isolated, leaving it unmerged",
                    region.label
                );
                Vec::new()
            }
            1 => neighbors,
            n => {
                let subsets = neighbor_subsets(n);
                let candidates: Vec<Vec<[usize; 3]>> = subsets
                    .iter()
                    .map(|subset| {
                        let mut merged = region.coords.clone();
                        for &i in subset {
                            merged.extend_from_slice(&pool[&neighbors[i]].coords);
                        }
                        merged
                    })
                    .collect();
                let verdicts = classifier.classify(feature_matrix(&candidates).view())?;

                match verdicts
                    .iter()
                    .rposition(|&v| v == SegClass::WellSegmented)
                {
                    Some(best) => subsets[best].iter().map(|&i| neighbors[i]).collect(),
                    None => Vec::new(),
                }
            }
        };

        // write the merged nucleus back under the flagged object's label and
        // retire every participant from the pool
        for &partner in &partners {
            let partner_region = pool[&partner];
            paint(labels, &partner_region.coords, region.label);
            paint(&mut pool_volume, &partner_region.coords, BACKGROUND);
            pool.remove(&partner);
        }
        paint(&mut pool_volume, &region.coords, BACKGROUND);
        pool.remove(&region.label);

        if !partners.is_empty() {
            trace!("merged {:?} into {}", partners, region.label);
        }
    }

    Ok(())
}

/// Repair one frame's watershed output: absorb degenerate fragments, drop
/// border-clipped objects, fuse classifier-flagged oversegmentation, and
/// relabel densely.
pub fn resolve_frame<C: Classify>(
    mut labels: LabelFrame,
    classifier: &C,
    border_margin: usize,
) -> Result<LabelFrame, Error> {
    repair_degenerate_fragments(&mut labels);

    remove_border_objects(&mut labels, border_margin);
    labels = label_components(labels.view());

    resolve_oversegmented(&mut labels, classifier)?;

    // final dense relabel; also splits any label left covering two
    // disconnected pieces
    Ok(label_components(labels.view()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::labels::unique_nonzero;
    use ndarray::ArrayView2;

    struct AcceptAll;

    impl Classify for AcceptAll {
        fn classify(&self, features: ArrayView2<f64>) -> Result<Vec<SegClass>, Error> {
            Ok(vec![SegClass::WellSegmented; features.nrows()])
        }
    }

    struct RejectAll;

    impl Classify for RejectAll {
        fn classify(&self, features: ArrayView2<f64>) -> Result<Vec<SegClass>, Error> {
            Ok(vec![SegClass::OverSegmented; features.nrows()])
        }
    }

    // well segmented iff the voxel count is in the accepted list
    struct VolumeGate(Vec<f64>);

    impl Classify for VolumeGate {
        fn classify(&self, features: ArrayView2<f64>) -> Result<Vec<SegClass>, Error> {
            Ok(features
                .rows()
                .into_iter()
                .map(|row| {
                    if self.0.contains(&row[0]) {
                        SegClass::WellSegmented
                    } else {
                        SegClass::OverSegmented
                    }
                })
                .collect())
        }
    }

    fn fill_box(
        labels: &mut LabelFrame,
        z: std::ops::Range<usize>,
        x: std::ops::Range<usize>,
        y: std::ops::Range<usize>,
        value: Label,
    ) {
        for zz in z.clone() {
            for xx in x.clone() {
                for yy in y.clone() {
                    labels[[zz, xx, yy]] = value;
                }
            }
        }
    }

    #[test]
    fn test_subset_enumeration_order() {
        let subsets = neighbor_subsets(4);
        let expected: Vec<Vec<usize>> = vec![
            vec![0],
            vec![1],
            vec![2],
            vec![3],
            vec![0, 1],
            vec![0, 2],
            vec![0, 3],
            vec![1, 2],
            vec![1, 3],
            vec![2, 3],
            vec![0, 1, 2],
            vec![0, 1, 3],
            vec![0, 2, 3],
            vec![1, 2, 3],
            vec![0, 1, 2, 3],
        ];
        assert_eq!(subsets, expected);
    }

    #[test]
    fn test_degenerate_fragment_absorbed_by_touching_neighbor() {
        // solid cube plus a single loose voxel stuck to its face
        let mut labels = LabelFrame::zeros((8, 12, 12));
        fill_box(&mut labels, 2..5, 4..7, 4..7, 1);
        labels[[2, 4, 7]] = 2; // single voxel, infinite solidity

        let out = resolve_frame(labels, &AcceptAll, 0).unwrap();
        assert_eq!(unique_nonzero(out.view()).len(), 1);
        assert_eq!(out[[2, 4, 7]], out[[2, 4, 6]]);
    }

    #[test]
    fn test_isolated_degenerate_fragment_left_alone() {
        let mut labels = LabelFrame::zeros((8, 12, 12));
        fill_box(&mut labels, 2..5, 4..7, 4..7, 1);
        labels[[7, 10, 10]] = 2; // nothing touches it

        let out = resolve_frame(labels, &AcceptAll, 0).unwrap();
        assert_eq!(unique_nonzero(out.view()).len(), 2);
        assert_ne!(out[[7, 10, 10]], BACKGROUND);
    }

    #[test]
    fn test_border_objects_removed() {
        let mut labels = LabelFrame::zeros((4, 16, 16));
        fill_box(&mut labels, 0..4, 0..2, 3..6, 1); // entirely in the margin
        fill_box(&mut labels, 0..4, 5..9, 1..5, 2); // one voxel column inside it
        fill_box(&mut labels, 0..4, 6..10, 8..12, 3); // interior

        let out = resolve_frame(labels, &AcceptAll, 2).unwrap();
        assert_eq!(unique_nonzero(out.view()).len(), 1);
        assert_ne!(out[[0, 6, 8]], BACKGROUND);
        assert_eq!(out[[0, 0, 3]], BACKGROUND);
        assert_eq!(out[[0, 5, 4]], BACKGROUND);
    }

    #[test]
    fn test_single_neighbor_merges_unconditionally_and_conserves_voxels() {
        let mut labels = LabelFrame::zeros((4, 8, 8));
        fill_box(&mut labels, 0..2, 0..2, 0..2, 1); // 8 voxels
        fill_box(&mut labels, 0..2, 2..4, 0..2, 2); // 8 voxels, face to face

        // everything stays flagged, no candidate is ever "well": the single
        // neighbor still merges
        let out = resolve_frame(labels, &RejectAll, 0).unwrap();
        let regions = regions_of(out.view());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].coords.len(), 16);
    }

    #[test]
    fn test_multi_neighbor_merge_takes_last_well_candidate() {
        // flagged F (24 voxels) flanked by pool neighbors A (12) and B (8);
        // subsets in order give volumes 36, 32, 44; both 36 and 44 are
        // acceptable, the later (full) merge must win
        let mut labels = LabelFrame::zeros((2, 4, 6));
        fill_box(&mut labels, 0..2, 0..2, 0..6, 1); // F
        fill_box(&mut labels, 0..2, 2..4, 0..3, 2); // A
        fill_box(&mut labels, 0..2, 2..4, 4..6, 3); // B

        let out = resolve_frame(labels, &VolumeGate(vec![36.0, 44.0]), 0).unwrap();
        let regions = regions_of(out.view());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].coords.len(), 44);
    }

    #[test]
    fn test_multi_neighbor_no_well_candidate_leaves_object() {
        let mut labels = LabelFrame::zeros((2, 4, 6));
        fill_box(&mut labels, 0..2, 0..2, 0..6, 1); // F
        fill_box(&mut labels, 0..2, 2..4, 0..3, 2); // A
        fill_box(&mut labels, 0..2, 2..4, 4..6, 3); // B

        // nothing qualifies, so F merges with no one; A and B do not touch
        // each other and end up isolated in the pool
        let out = resolve_frame(labels, &VolumeGate(vec![]), 0).unwrap();
        assert_eq!(regions_of(out.view()).len(), 3);
    }

    #[test]
    fn test_final_relabel_splits_disjoint_components() {
        let mut labels = LabelFrame::zeros((2, 10, 10));
        fill_box(&mut labels, 0..2, 0..2, 0..2, 5);
        fill_box(&mut labels, 0..2, 7..9, 7..9, 5); // same value, far away

        let out = resolve_frame(labels, &AcceptAll, 0).unwrap();
        assert_eq!(unique_nonzero(out.view()).len(), 2);
        assert_ne!(out[[0, 0, 0]], out[[0, 7, 7]]);
    }

    #[test]
    fn test_labels_dense_after_resolution() {
        let mut labels = LabelFrame::zeros((2, 10, 10));
        fill_box(&mut labels, 0..2, 0..2, 0..2, 3);
        fill_box(&mut labels, 0..2, 5..7, 5..7, 9);

        let out = resolve_frame(labels, &AcceptAll, 0).unwrap();
        assert_eq!(unique_nonzero(out.view()), vec![1, 2]);
    }
}
