pub mod distance;
pub mod hull;
pub mod labels;
pub mod regionprops;
pub mod smooth;
pub mod threshold;
pub mod watershed;

use log::debug;
use ndarray::{ArrayView3, Axis};
use rayon::prelude::*;

use crate::classify::Classify;
use crate::error::Error;
use crate::resolve;
use crate::volume::{check_movie_shape, CancelToken, IntensityVolume, LabelFrame, LabelVolume};

/// Fixed knobs of the per-frame watershed pipeline. The defaults are the
/// values the pipeline was tuned with on His-RFP embryo movies.
#[derive(Debug, Clone, Copy)]
pub struct SegmenterParams {
    /// gaussian smoothing scale, in voxels
    pub sigma: f64,
    /// box footprint (z, x, y) for distance-transform peak detection
    pub peak_footprint: (usize, usize, usize),
    /// width of the x/y margin whose objects are discarded
    pub border_margin: usize,
}

impl Default for SegmenterParams {
    fn default() -> Self {
        SegmenterParams {
            sigma: 2.0,
            peak_footprint: (5, 11, 11),
            border_margin: 2,
        }
    }
}

/// Per-frame nuclei segmentation: marker-controlled watershed followed by
/// classifier-guided oversegmentation repair.
pub struct NucleiSegmenter<'a, C: Classify> {
    pub params: SegmenterParams,
    classifier: &'a C,
}

impl<'a, C: Classify> NucleiSegmenter<'a, C> {
    pub fn new(classifier: &'a C, params: SegmenterParams) -> Self {
        NucleiSegmenter { params, classifier }
    }

    /// Initial labels for one frame: smooth, Otsu-threshold, label the
    /// foreground, seed markers at distance-transform maxima, then flood the
    /// negated distance transform. A frame with no foreground comes back
    /// all background.
    pub fn watershed_frame(&self, frame: ArrayView3<u16>) -> LabelFrame {
        let smoothed = smooth::gaussian_smooth(frame, self.params.sigma);
        let cutoff = threshold::otsu_threshold(smoothed.view());
        let mask = threshold::binarize(smoothed.view(), cutoff);

        let dist = distance::distance_transform(mask.view());
        let peaks = distance::local_maxima(&dist, mask.view(), self.params.peak_footprint);
        let markers = labels::label_mask(peaks.view());

        let cost = dist.mapv(|d| -d);
        watershed::watershed(&cost, markers.view(), mask.view())
    }

    /// Segment one frame end to end, watershed plus repair stages.
    pub fn segment_frame(&self, frame: ArrayView3<u16>) -> Result<LabelFrame, Error> {
        let initial = self.watershed_frame(frame);
        resolve::resolve_frame(initial, self.classifier, self.params.border_margin)
    }

    /// Segment a whole movie. Frames are independent, so they run in
    /// parallel; cancellation is honored at frame granularity.
    pub fn segment_movie(
        &self,
        movie: &IntensityVolume,
        cancel: &CancelToken,
    ) -> Result<LabelVolume, Error>
    where
        C: Sync,
    {
        check_movie_shape(&movie.view())?;

        let frames: Vec<LabelFrame> = movie
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(t, frame)| {
                cancel.checkpoint()?;
                let segmented = self.segment_frame(frame)?;
                debug!(
                    "frame {}: {} nuclei",
                    t,
                    labels::unique_nonzero(segmented.view()).len()
                );
                Ok(segmented)
            })
            .collect::<Result<_, Error>>()?;

        let mut out = LabelVolume::zeros(movie.raw_dim());
        for (t, frame) in frames.into_iter().enumerate() {
            out.index_axis_mut(Axis(0), t).assign(&frame);
        }
        Ok(out)
    }
}
