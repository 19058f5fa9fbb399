use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Axis;
use rayon::prelude::*;
use std::path::PathBuf;

mod classify;
mod error;
mod output;
mod resolve;
mod segment;
mod traces;
mod track;
mod volume;

use classify::DecisionForest;
use error::Error;
use segment::{NucleiSegmenter, SegmenterParams};
use track::CentroidMode;
use volume::{CancelToken, Calibration, LabelFrame, LabelVolume};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TrackerChoice {
    /// frame-to-frame voxel overlap majority vote
    Overlap,
    /// greedy nearest centroid in 3D physical distance
    Centroid3d,
    /// greedy nearest centroid in the xy plane only
    Centroid2d,
}

#[derive(Parser, Debug)]
#[command(name = "nucleitrack")]
#[command(version)]
#[command(about = "Segment and track embryo nuclei in 4D two-channel fluorescence movies.")]
struct Args {
    /// Red (nuclear marker) channel: 4D [t, z, x, y] u16 .npy snapshot
    red: PathBuf,

    /// Green channel snapshot, same shape as the red one
    #[arg(long, default_value = None)]
    green: Option<PathBuf>,

    /// Pretrained nucleus shape classifier artifact
    #[arg(long)]
    classifier: PathBuf,

    #[arg(long, value_enum, default_value_t = TrackerChoice::Overlap)]
    tracker: TrackerChoice,

    /// Centroid matching threshold in µm (centroid trackers only)
    #[arg(long, default_value_t = 2.0)]
    dist_threshold: f64,

    /// x-y pixel size in µm
    #[arg(long, default_value_t = 0.1)]
    pix_size_xy: f64,

    /// z step in µm
    #[arg(long, default_value_t = 0.5)]
    pix_size_z: f64,

    /// time step in seconds
    #[arg(long, default_value_t = 30.0)]
    time_step: f64,

    /// gaussian smoothing scale, in voxels
    #[arg(long, default_value_t = 2.0)]
    sigma: f64,

    /// width of the discarded x/y border margin, in voxels
    #[arg(long, default_value_t = 2)]
    border_margin: usize,

    #[arg(short = 't', long, default_value = None)]
    nthreads: Option<usize>,

    #[arg(short, long, default_value = "nucleitrack-out")]
    output_dir: PathBuf,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Some(nthreads) = args.nthreads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global()
            .unwrap();
    }

    if let Err(err) = run(&args) {
        eprintln!("nucleitrack: {}", err);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let calib = Calibration::new(args.pix_size_xy, args.pix_size_z, args.time_step);

    println!("Reading raw volumes...");
    let red = output::read_intensity_npy(&args.red)?;
    volume::check_movie_shape(&red.view())?;
    let green = match &args.green {
        Some(path) => {
            let green = output::read_intensity_npy(path)?;
            volume::check_same_shape(&red.view(), &green.view())?;
            Some(green)
        }
        None => None,
    };
    let tlen = red.len_of(Axis(0));
    println!("Read {} frames of {:?}", tlen, &red.shape()[1..]);

    let classifier = DecisionForest::load(&args.classifier)?;
    let segmenter = NucleiSegmenter::new(
        &classifier,
        SegmenterParams {
            sigma: args.sigma,
            border_margin: args.border_margin,
            ..SegmenterParams::default()
        },
    );

    println!("Segmenting nuclei...");
    let progress = ProgressBar::new(tlen as u64);
    progress.set_style(
        ProgressStyle::with_template("{wide_bar} {pos}/{len} frames [{elapsed}]").unwrap(),
    );
    let frames: Vec<LabelFrame> = red
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|frame| {
            let segmented = segmenter.segment_frame(frame)?;
            progress.inc(1);
            Ok(segmented)
        })
        .collect::<Result<_, Error>>()?;
    progress.finish();

    let mut segmented = LabelVolume::zeros(red.raw_dim());
    for (t, frame) in frames.into_iter().enumerate() {
        segmented.index_axis_mut(Axis(0), t).assign(&frame);
    }

    println!("Tracking...");
    let cancel = CancelToken::new();
    let tracked = match args.tracker {
        TrackerChoice::Overlap => track::track_overlap(&segmented, &cancel)?,
        TrackerChoice::Centroid3d => track::track_centroids(
            &segmented,
            args.dist_threshold,
            &calib,
            CentroidMode::ThreeD,
            &cancel,
        )?,
        TrackerChoice::Centroid2d => track::track_centroids(
            &segmented,
            args.dist_threshold,
            &calib,
            CentroidMode::TwoD,
            &cancel,
        )?,
    };

    std::fs::create_dir_all(&args.output_dir)
        .map_err(|err| Error::Persist(err.to_string()))?;
    output::write_labels_npy(&args.output_dir.join("nucs_segm.npy"), &segmented)?;
    output::write_labels_npy(&args.output_dir.join("nucs_trck.npy"), &tracked)?;

    println!("Measuring traces...");
    let red_traces = traces::measure_tracks(&tracked, &red)?;
    let green_traces = match &green {
        Some(green) => Some(traces::measure_tracks(&tracked, green)?),
        None => None,
    };
    println!("Found {} tracks", red_traces.tags.len());

    output::write_traces_csv(
        &args.output_dir.join("traces.csv"),
        &calib,
        &red_traces,
        green_traces.as_ref(),
    )?;

    println!("Done. Results in {}", args.output_dir.display());
    Ok(())
}
