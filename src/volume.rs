use ndarray::{Array3, Array4, ArrayView3, ArrayView4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Error;

pub type Label = u32;
pub const BACKGROUND: Label = 0;

/// One channel of raw data: intensities indexed [t, z, x, y].
pub type IntensityVolume = Array4<u16>;

/// Per-frame object labels, same shape as the intensity volume. Labels are
/// unique within a frame but carry no meaning across frames.
pub type LabelVolume = Array4<Label>;

pub type LabelFrame = Array3<Label>;
pub type LabelFrameView<'a> = ArrayView3<'a, Label>;

/// Physical calibration attached to the raw data.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    /// x-y pixel size in µm
    pub pix_size_xy: f64,
    /// z step in µm
    pub pix_size_z: f64,
    /// time step in seconds
    pub time_step: f64,
}

impl Calibration {
    pub fn new(pix_size_xy: f64, pix_size_z: f64, time_step: f64) -> Self {
        Calibration {
            pix_size_xy,
            pix_size_z,
            time_step,
        }
    }
}

/// Cooperative cancellation flag. Long running loops poll this between
/// frames or track pops, never mid-frame.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn checkpoint(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub fn check_movie_shape<T>(vol: &ArrayView4<T>) -> Result<(), Error> {
    if vol.shape().iter().any(|&d| d == 0) {
        return Err(Error::EmptyVolume);
    }
    Ok(())
}

pub fn check_same_shape<A, B>(a: &ArrayView4<A>, b: &ArrayView4<B>) -> Result<(), Error> {
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch(
            a.shape().to_vec(),
            b.shape().to_vec(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.checkpoint().is_ok());

        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
        assert!(token.checkpoint().is_err());
    }

    #[test]
    fn test_empty_volume_rejected() {
        let vol: Array4<u16> = Array4::zeros((0, 4, 4, 4));
        assert!(check_movie_shape(&vol.view()).is_err());

        let vol: Array4<u16> = Array4::zeros((2, 4, 4, 4));
        assert!(check_movie_shape(&vol.view()).is_ok());
    }
}
