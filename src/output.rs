use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::Error;
use crate::traces::TrackTraces;
use crate::volume::{Calibration, IntensityVolume, LabelVolume};

fn persist_err<E: std::fmt::Display>(err: E) -> Error {
    Error::Persist(err.to_string())
}

/// Read one channel's 4D intensity snapshot (plain `.npy`, u16).
pub fn read_intensity_npy(path: &Path) -> Result<IntensityVolume, Error> {
    let file = File::open(path).map_err(persist_err)?;
    IntensityVolume::read_npy(file).map_err(persist_err)
}

/// Write a label volume snapshot next to the analysis outputs.
pub fn write_labels_npy(path: &Path, labels: &LabelVolume) -> Result<(), Error> {
    let file = File::create(path).map_err(persist_err)?;
    labels.write_npy(BufWriter::new(file)).map_err(persist_err)
}

/// Long-format trace table: one row per (track, frame) with total
/// intensity, voxel count, and mean per channel. Frames where a track is
/// absent report zero volume and an empty mean.
pub fn write_traces_csv(
    path: &Path,
    calib: &Calibration,
    red: &TrackTraces,
    green: Option<&TrackTraces>,
) -> Result<(), Error> {
    let mut writer = csv::Writer::from_path(path).map_err(persist_err)?;

    let mut header = vec!["track", "frame", "time_s", "red_total", "red_volume", "red_mean"];
    if green.is_some() {
        header.extend(["green_total", "green_volume", "green_mean"]);
    }
    writer.write_record(&header).map_err(persist_err)?;

    let tlen = red.total_intensity.ncols();
    for (row, &tag) in red.tags.iter().enumerate() {
        for t in 0..tlen {
            let mut record = vec![
                tag.to_string(),
                t.to_string(),
                format!("{}", t as f64 * calib.time_step),
            ];
            push_channel(&mut record, red, row, t);
            if let Some(green) = green {
                match green.row_of(tag) {
                    Some(grow) => push_channel(&mut record, green, grow, t),
                    None => record.extend([String::new(), "0".to_string(), String::new()]),
                }
            }
            writer.write_record(&record).map_err(persist_err)?;
        }
    }
    writer.flush().map_err(persist_err)
}

fn push_channel(record: &mut Vec<String>, traces: &TrackTraces, row: usize, t: usize) {
    let total = traces.total_intensity[[row, t]];
    let count = traces.volume[[row, t]];
    record.push(format!("{}", total));
    record.push(count.to_string());
    if count > 0 {
        record.push(format!("{}", total / count as f64));
    } else {
        record.push(String::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traces::measure_tracks;
    use ndarray::Array4;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nucleitrack-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_npy_roundtrip() {
        let path = scratch("labels.npy");
        let mut labels: LabelVolume = Array4::zeros((2, 2, 3, 3));
        labels[[1, 0, 2, 2]] = 42;
        write_labels_npy(&path, &labels).unwrap();

        let file = File::open(&path).unwrap();
        let back = LabelVolume::read_npy(file).unwrap();
        assert_eq!(back, labels);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_traces_csv_shape() {
        let mut tracked: LabelVolume = Array4::zeros((2, 1, 2, 2));
        let mut intensity = Array4::zeros((2, 1, 2, 2));
        tracked[[0, 0, 0, 0]] = 1;
        tracked[[1, 0, 0, 0]] = 1;
        intensity[[0, 0, 0, 0]] = 10;
        intensity[[1, 0, 0, 0]] = 30;
        let traces = measure_tracks(&tracked, &intensity).unwrap();

        let path = scratch("traces.csv");
        let calib = Calibration::new(0.1, 0.5, 30.0);
        write_traces_csv(&path, &calib, &traces, None).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3); // header + 2 frames of track 1
        assert!(lines[0].starts_with("track,frame,time_s"));
        assert!(lines[2].starts_with("1,1,30"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_persist_error() {
        let missing = scratch("no-such-volume.npy");
        assert!(matches!(
            read_intensity_npy(&missing),
            Err(Error::Persist(_))
        ));
    }
}
