use log::{debug, trace};
use ndarray::Axis;
use std::collections::HashMap;
use std::ops::Range;

use crate::error::Error;
use crate::segment::regionprops::{centroid, regions_of};
use crate::volume::{check_movie_shape, Calibration, CancelToken, Label, LabelVolume};

/// Which coordinates the nearest-centroid matcher compares. The 2D mode
/// ignores z, which works better when the z step is coarse relative to
/// nuclear motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentroidMode {
    ThreeD,
    TwoD,
}

// One segmented object, flattened into the global candidate pool.
struct TrackPoint {
    time: usize,
    centroid: [f64; 3],
    coords: Vec<[usize; 3]>,
}

fn physical_distance(a: [f64; 3], b: [f64; 3], calib: &Calibration, mode: CentroidMode) -> f64 {
    let dx = (a[1] - b[1]) * calib.pix_size_xy;
    let dy = (a[2] - b[2]) * calib.pix_size_xy;
    match mode {
        CentroidMode::ThreeD => {
            let dz = (a[0] - b[0]) * calib.pix_size_z;
            (dz * dz + dx * dx + dy * dy).sqrt()
        }
        CentroidMode::TwoD => (dx * dx + dy * dy).sqrt(),
    }
}

fn paint_frame(out: &mut LabelVolume, time: usize, coords: &[[usize; 3]], value: Label) {
    for &[z, x, y] in coords {
        out[[time, z, x, y]] = value;
    }
}

/// Greedy nearest-centroid tracking. Every object of every frame enters one
/// pool; tracks consume it destructively. The pool head seeds a track, then
/// each later frame contributes its closest remaining centroid while that
/// stays under `dist_thr` µm, measured always against the seed centroid and
/// never the last match. A miss (or an exhausted frame) ends the track; no
/// skipping ahead. Track ids start at 1 and are never reused.
pub fn track_centroids(
    segmented: &LabelVolume,
    dist_thr: f64,
    calib: &Calibration,
    mode: CentroidMode,
    cancel: &CancelToken,
) -> Result<LabelVolume, Error> {
    check_movie_shape(&segmented.view())?;
    let tlen = segmented.len_of(Axis(0));

    // frame-major pool, ascending label within each frame
    let mut pool: Vec<TrackPoint> = Vec::new();
    let mut frame_ranges: Vec<Range<usize>> = Vec::with_capacity(tlen);
    for t in 0..tlen {
        let start = pool.len();
        for region in regions_of(segmented.index_axis(Axis(0), t)) {
            pool.push(TrackPoint {
                time: t,
                centroid: centroid(&region.coords),
                coords: region.coords,
            });
        }
        frame_ranges.push(start..pool.len());
    }
    debug!("tracking {} objects over {} frames", pool.len(), tlen);

    let mut alive = vec![true; pool.len()];
    let mut out = LabelVolume::zeros(segmented.raw_dim());
    let mut track: Label = 0;

    for head in 0..pool.len() {
        if !alive[head] {
            continue;
        }
        cancel.checkpoint()?;

        track += 1;
        alive[head] = false;
        let seed = &pool[head];
        paint_frame(&mut out, seed.time, &seed.coords, track);

        for t in seed.time + 1..tlen {
            let mut best: Option<(usize, f64)> = None;
            for i in frame_ranges[t].clone() {
                if !alive[i] {
                    continue;
                }
                let d = physical_distance(seed.centroid, pool[i].centroid, calib, mode);
                if best.map_or(true, |(_, bd)| d < bd) {
                    best = Some((i, d));
                }
            }
            match best {
                Some((i, d)) if d < dist_thr => {
                    alive[i] = false;
                    paint_frame(&mut out, t, &pool[i].coords, track);
                }
                _ => break, // chain ends here, later frames are not retried
            }
        }
        trace!("track {} seeded at frame {}", track, seed.time);
    }

    Ok(out)
}

// Exact-integer median of a nonempty sorted slice. An even split between
// two labels averages to something fractional (or to a label that may not
// exist); both cases read as ambiguous overlap upstream.
fn exact_integer_median(sorted: &[Label]) -> Option<Label> {
    let n = sorted.len();
    let median = if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0
    };
    if median.fract() == 0.0 {
        Some(median as Label)
    } else {
        None
    }
}

/// Voxel-overlap majority-vote tracking. Frame 0 of the output is frame 0
/// of the segmentation; every later frame inherits each track by taking the
/// median segmentation label under the track's previous-frame voxels.
/// Ambiguous overlap (fractional median, or a median naming no existing
/// object) silently ends the track for that frame. Objects with no
/// antecedent never get a track id.
pub fn track_overlap(segmented: &LabelVolume, cancel: &CancelToken) -> Result<LabelVolume, Error> {
    check_movie_shape(&segmented.view())?;
    let tlen = segmented.len_of(Axis(0));

    let mut out = LabelVolume::zeros(segmented.raw_dim());
    out.index_axis_mut(Axis(0), 0)
        .assign(&segmented.index_axis(Axis(0), 0));

    for t in 1..tlen {
        cancel.checkpoint()?;
        let segm_frame = segmented.index_axis(Axis(0), t);
        let next_regions: HashMap<Label, Vec<[usize; 3]>> = regions_of(segm_frame)
            .into_iter()
            .map(|r| (r.label, r.coords))
            .collect();

        let prev_regions = regions_of(out.index_axis(Axis(0), t - 1));
        for prev in &prev_regions {
            let mut overlap: Vec<Label> = prev
                .coords
                .iter()
                .map(|&[z, x, y]| segm_frame[[z, x, y]])
                .filter(|&v| v != 0)
                .collect();
            if overlap.is_empty() {
                continue;
            }
            overlap.sort_unstable();

            let followed = exact_integer_median(&overlap).and_then(|m| next_regions.get(&m));
            match followed {
                Some(coords) => paint_frame(&mut out, t, coords, prev.label),
                None => trace!("track {} lost at frame {}: ambiguous overlap", prev.label, t),
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::BACKGROUND;
    use ndarray::Array4;

    fn unit_calib() -> Calibration {
        Calibration::new(1.0, 1.0, 1.0)
    }

    fn fill_box(
        volume: &mut LabelVolume,
        t: usize,
        z: Range<usize>,
        x: Range<usize>,
        y: Range<usize>,
        value: Label,
    ) {
        for zz in z.clone() {
            for xx in x.clone() {
                for yy in y.clone() {
                    volume[[t, zz, xx, yy]] = value;
                }
            }
        }
    }

    fn track_lengths(out: &LabelVolume) -> HashMap<Label, usize> {
        let tlen = out.len_of(Axis(0));
        let mut lengths: HashMap<Label, usize> = HashMap::new();
        for t in 0..tlen {
            let frame = out.index_axis(Axis(0), t);
            for region in regions_of(frame) {
                *lengths.entry(region.label).or_insert(0) += 1;
            }
        }
        lengths
    }

    #[test]
    fn test_single_object_tracked_across_all_frames() {
        // same blob, same place, every frame; infinite threshold
        let mut segm = Array4::zeros((5, 3, 8, 8));
        for t in 0..5 {
            fill_box(&mut segm, t, 0..2, 2..4, 2..4, 1);
        }
        let out =
            track_centroids(&segm, f64::INFINITY, &unit_calib(), CentroidMode::ThreeD, &CancelToken::new())
                .unwrap();
        let lengths = track_lengths(&out);
        assert_eq!(lengths.len(), 1);
        assert_eq!(lengths[&1], 5);
    }

    #[test]
    fn test_every_object_consumed_exactly_once() {
        let mut segm = Array4::zeros((3, 2, 12, 12));
        for t in 0..3 {
            fill_box(&mut segm, t, 0..2, 1..3, 1..3, 1);
            fill_box(&mut segm, t, 0..2, 8..10, 8..10, 2);
        }
        let out = track_centroids(&segm, 1.0, &unit_calib(), CentroidMode::ThreeD, &CancelToken::new())
            .unwrap();
        // same voxel support, relabeled into two tracks of length 3
        for (a, b) in segm.iter().zip(out.iter()) {
            assert_eq!(*a == 0, *b == 0);
        }
        let lengths = track_lengths(&out);
        assert_eq!(lengths.len(), 2);
        assert!(lengths.values().all(|&n| n == 3));
    }

    #[test]
    fn test_reference_centroid_is_not_updated() {
        // blob drifts +2 in y each frame; each hop is 2 from the previous
        // frame but the comparison is against the seed, so frame 2 sits 4
        // away and falls outside a threshold of 3
        let mut segm = Array4::zeros((3, 2, 6, 12));
        fill_box(&mut segm, 0, 0..2, 2..4, 0..2, 1);
        fill_box(&mut segm, 1, 0..2, 2..4, 2..4, 1);
        fill_box(&mut segm, 2, 0..2, 2..4, 4..6, 1);

        let out = track_centroids(&segm, 3.0, &unit_calib(), CentroidMode::ThreeD, &CancelToken::new())
            .unwrap();
        let lengths = track_lengths(&out);
        assert_eq!(lengths[&1], 2); // frames 0 and 1
        assert_eq!(lengths[&2], 1); // frame 2 restarts
    }

    #[test]
    fn test_chain_breaks_do_not_skip_ahead() {
        // object present at frames 0 and 2, absent at frame 1: the track
        // ends at the gap even though frame 2 would match
        let mut segm = Array4::zeros((3, 2, 6, 6));
        fill_box(&mut segm, 0, 0..2, 2..4, 2..4, 1);
        fill_box(&mut segm, 2, 0..2, 2..4, 2..4, 7);

        let out = track_centroids(&segm, f64::INFINITY, &unit_calib(), CentroidMode::ThreeD, &CancelToken::new())
            .unwrap();
        let lengths = track_lengths(&out);
        assert_eq!(lengths.len(), 2);
        assert_eq!(lengths[&1], 1);
        assert_eq!(lengths[&2], 1);
    }

    #[test]
    fn test_2d_mode_ignores_z() {
        // object jumps far in z but stays put in xy
        let mut segm = Array4::zeros((2, 10, 6, 6));
        fill_box(&mut segm, 0, 0..2, 2..4, 2..4, 1);
        fill_box(&mut segm, 1, 8..10, 2..4, 2..4, 1);

        let calib = Calibration::new(1.0, 5.0, 1.0);
        let three_d =
            track_centroids(&segm, 2.0, &calib, CentroidMode::ThreeD, &CancelToken::new()).unwrap();
        assert_eq!(track_lengths(&three_d).len(), 2);

        let two_d =
            track_centroids(&segm, 2.0, &calib, CentroidMode::TwoD, &CancelToken::new()).unwrap();
        let lengths = track_lengths(&two_d);
        assert_eq!(lengths.len(), 1);
        assert_eq!(lengths[&1], 2);
    }

    #[test]
    fn test_end_to_end_drift_thresholds() {
        // one blob whose centroid drifts exactly +0.5 px in y per frame
        // (the box widens by one voxel each frame)
        let mut segm = Array4::zeros((3, 2, 4, 12));
        fill_box(&mut segm, 0, 0..2, 1..3, 4..6, 1); // centroid y 4.5
        fill_box(&mut segm, 1, 0..2, 1..3, 4..7, 1); // centroid y 5.0
        fill_box(&mut segm, 2, 0..2, 1..3, 4..8, 1); // centroid y 5.5

        // drift per frame is exactly 0.5 µm at unit pixel size
        let drift = 0.5;
        assert!(drift < 2.0 && drift > 0.01);

        let loose = track_centroids(&segm, 2.0, &unit_calib(), CentroidMode::ThreeD, &CancelToken::new())
            .unwrap();
        let lengths = track_lengths(&loose);
        assert_eq!(lengths.len(), 1);
        assert_eq!(lengths[&1], 3);

        let tight = track_centroids(&segm, 0.01, &unit_calib(), CentroidMode::ThreeD, &CancelToken::new())
            .unwrap();
        let lengths = track_lengths(&tight);
        assert_eq!(lengths.len(), 3);
        assert!(lengths.values().all(|&n| n == 1));
    }

    #[test]
    fn test_cancellation_between_pops() {
        let mut segm = Array4::zeros((2, 2, 4, 4));
        fill_box(&mut segm, 0, 0..2, 0..2, 0..2, 1);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            track_centroids(&segm, 1.0, &unit_calib(), CentroidMode::ThreeD, &cancel),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_exact_integer_median() {
        assert_eq!(exact_integer_median(&[2, 2, 3]), Some(2));
        assert_eq!(exact_integer_median(&[2, 2, 4, 4]), Some(3)); // exists or not is the caller's problem
        assert_eq!(exact_integer_median(&[2, 3]), None); // 2.5
        assert_eq!(exact_integer_median(&[7]), Some(7));
    }

    #[test]
    fn test_overlap_identity_sequence_keeps_all_tracks() {
        let mut segm = Array4::zeros((4, 2, 12, 12));
        for t in 0..4 {
            fill_box(&mut segm, t, 0..2, 1..4, 1..4, 1);
            fill_box(&mut segm, t, 0..2, 7..10, 7..10, 2);
        }
        let out = track_overlap(&segm, &CancelToken::new()).unwrap();
        assert_eq!(out, segm);
    }

    #[test]
    fn test_overlap_follows_majority() {
        let mut segm = Array4::zeros((2, 1, 4, 6));
        fill_box(&mut segm, 0, 0..1, 0..4, 0..4, 1);
        // frame 1: mostly label 3, one column of label 5
        fill_box(&mut segm, 1, 0..1, 0..4, 0..3, 3);
        fill_box(&mut segm, 1, 0..1, 0..4, 3..4, 5);

        let out = track_overlap(&segm, &CancelToken::new()).unwrap();
        // label 3's full object carried over under tag 1
        assert_eq!(out[[1, 0, 0, 0]], 1);
        assert_eq!(out[[1, 0, 0, 2]], 1);
        // the minority object is not part of the track
        assert_eq!(out[[1, 0, 0, 3]], BACKGROUND);
    }

    #[test]
    fn test_overlap_ambiguous_median_drops_track() {
        // exactly half the voxels under each of two labels; the median lands
        // between them on a label that does not exist
        let mut segm = Array4::zeros((2, 1, 2, 4));
        fill_box(&mut segm, 0, 0..1, 0..2, 0..4, 1);
        fill_box(&mut segm, 1, 0..1, 0..2, 0..2, 2);
        fill_box(&mut segm, 1, 0..1, 0..2, 2..4, 4);

        let out = track_overlap(&segm, &CancelToken::new()).unwrap();
        let frame1 = out.index_axis(Axis(0), 1);
        assert!(frame1.iter().all(|&v| v == BACKGROUND));
    }

    #[test]
    fn test_overlap_new_objects_get_no_track() {
        let mut segm = Array4::zeros((2, 1, 6, 6));
        fill_box(&mut segm, 0, 0..1, 0..2, 0..2, 1);
        fill_box(&mut segm, 1, 0..1, 0..2, 0..2, 1);
        fill_box(&mut segm, 1, 0..1, 4..6, 4..6, 9); // appears from nowhere

        let out = track_overlap(&segm, &CancelToken::new()).unwrap();
        assert_eq!(out[[1, 0, 0, 0]], 1);
        assert_eq!(out[[1, 0, 4, 4]], BACKGROUND);
    }
}
