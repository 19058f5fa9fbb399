use ndarray::{Array2, Axis};
use std::collections::HashMap;

use crate::error::Error;
use crate::volume::{check_same_shape, IntensityVolume, Label, LabelVolume, BACKGROUND};

/// Per-track, per-frame measurements in one intensity channel: total voxel
/// intensity and voxel count. A (track, frame) cell where the track is
/// absent holds zero in both.
pub struct TrackTraces {
    /// track ids, ascending; row index into the matrices below
    pub tags: Vec<Label>,
    pub total_intensity: Array2<f64>,
    pub volume: Array2<u64>,
}

impl TrackTraces {
    pub fn row_of(&self, tag: Label) -> Option<usize> {
        self.tags.binary_search(&tag).ok()
    }

    /// Mean intensity trace for one track. Frames where the track is absent
    /// come out NaN (0/0), matching how the traces read downstream.
    pub fn mean_intensity(&self, tag: Label) -> Option<Vec<f64>> {
        let row = self.row_of(tag)?;
        Some(
            self.total_intensity
                .row(row)
                .iter()
                .zip(self.volume.row(row))
                .map(|(&total, &count)| total / count as f64)
                .collect(),
        )
    }
}

/// Measure every track of a tracked volume against one intensity channel.
pub fn measure_tracks(
    tracked: &LabelVolume,
    intensity: &IntensityVolume,
) -> Result<TrackTraces, Error> {
    check_same_shape(&tracked.view(), &intensity.view())?;

    let mut tags: Vec<Label> = tracked
        .iter()
        .copied()
        .filter(|&v| v != BACKGROUND)
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();
    tags.sort_unstable();
    let rows: HashMap<Label, usize> = tags.iter().enumerate().map(|(i, &t)| (t, i)).collect();

    let tlen = tracked.len_of(Axis(0));
    let mut total_intensity = Array2::zeros((tags.len(), tlen));
    let mut volume = Array2::zeros((tags.len(), tlen));

    for t in 0..tlen {
        let labels = tracked.index_axis(Axis(0), t);
        let values = intensity.index_axis(Axis(0), t);
        for (&tag, &value) in labels.iter().zip(values.iter()) {
            if tag != BACKGROUND {
                let row = rows[&tag];
                total_intensity[[row, t]] += value as f64;
                volume[[row, t]] += 1;
            }
        }
    }

    Ok(TrackTraces {
        tags,
        total_intensity,
        volume,
    })
}
