//! Command-line front end: stabilize a clip stored as image frames.

use clap::{Args, Parser};
use std::path::PathBuf;

use vidstab::io::{
    FrameSink, FrameSource, ImageSequenceSink, ImageSequenceSource, PreviewSignal, PreviewSurface,
};
use vidstab::{Frame, Pipeline, StabilizeConfig};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "vidstab")]
#[command(about = "Stabilize a clip stored as a directory of image frames")]
#[command(version)]
struct Cli {
    /// Directory of input frames (sorted by file name).
    #[arg(short, long)]
    input: PathBuf,

    /// Frame rate of the input when it has no manifest.
    #[arg(long)]
    input_fps: Option<f64>,

    /// Write the run report (JSON) to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Stop cleanly after this many output frames.
    #[arg(long)]
    stop_after: Option<usize>,

    /// Print the effective configuration (JSON) and exit.
    #[arg(long)]
    print_config: bool,

    #[command(flatten)]
    options: StabilizeOptions,
}

/// Pipeline options; values use the same syntax as the option table
/// (`yes`/`no`, `auto`, model tags).
#[derive(Debug, Clone, Default, Args)]
struct StabilizeOptions {
    /// Enable deblurring (yes/no).
    #[arg(long)]
    deblur: Option<String>,
    /// Deblur spatial radius in pixels.
    #[arg(long)]
    radius: Option<String>,
    /// Deblur sensitivity.
    #[arg(long)]
    deblur_sens: Option<String>,

    /// Enable wobble suppression (yes/no, two-pass only).
    #[arg(long)]
    wobble_suppress: Option<String>,
    /// Wobble keyframe period in frames.
    #[arg(long)]
    ws_period: Option<String>,
    /// Wobble motion model tag.
    #[arg(long)]
    ws_model: Option<String>,
    /// Wobble RANSAC subset size, or auto.
    #[arg(long)]
    ws_subset: Option<String>,
    /// Wobble RANSAC inlier threshold in pixels, or auto.
    #[arg(long)]
    ws_thresh: Option<String>,
    /// Wobble estimator maximum outlier ratio.
    #[arg(long)]
    ws_outlier_ratio: Option<String>,
    /// Wobble estimator minimum inlier ratio.
    #[arg(long)]
    ws_min_inlier_ratio: Option<String>,
    /// Wobble keypoint count.
    #[arg(long)]
    ws_nkps: Option<String>,
    /// Wobble local outlier rejection (yes/no).
    #[arg(long)]
    ws_local_outlier_rejection: Option<String>,

    /// Output directory, or "no" to disable file output.
    #[arg(long)]
    output: Option<String>,
    /// one-pass or two-pass.
    #[arg(long)]
    mode: Option<String>,
    /// Smoothing radius in frames.
    #[arg(long)]
    stab_radius: Option<String>,
    /// Primary motion model tag.
    #[arg(long)]
    model: Option<String>,
    /// Primary RANSAC subset size, or auto.
    #[arg(long)]
    subset: Option<String>,
    /// Primary RANSAC inlier threshold in pixels, or auto.
    #[arg(long)]
    thresh: Option<String>,
    /// Primary estimator maximum outlier ratio.
    #[arg(long)]
    outlier_ratio: Option<String>,
    /// Primary estimator minimum inlier ratio.
    #[arg(long)]
    min_inlier_ratio: Option<String>,
    /// Primary keypoint count.
    #[arg(long)]
    nkps: Option<String>,
    /// Primary local outlier rejection (yes/no).
    #[arg(long)]
    local_outlier_rejection: Option<String>,
    /// Total border trim fraction per dimension.
    #[arg(long)]
    trim_ratio: Option<String>,
    /// Estimate the trim ratio (yes/no, two-pass only).
    #[arg(long)]
    est_trim: Option<String>,
    /// Limit corrections to keep the trimmed frame covered (yes/no).
    #[arg(long)]
    incl_constr: Option<String>,
    /// replicate or const.
    #[arg(long)]
    border_mode: Option<String>,
    /// Output frame rate, or auto to follow the input.
    #[arg(long)]
    output_fps: Option<String>,
}

impl StabilizeOptions {
    /// `(key, value)` pairs for every option given on the command line.
    fn to_pairs(&self) -> Vec<(&'static str, &str)> {
        let all: [(&'static str, &Option<String>); 27] = [
            ("deblur", &self.deblur),
            ("radius", &self.radius),
            ("deblur-sens", &self.deblur_sens),
            ("wobble-suppress", &self.wobble_suppress),
            ("ws-period", &self.ws_period),
            ("ws-model", &self.ws_model),
            ("ws-subset", &self.ws_subset),
            ("ws-thresh", &self.ws_thresh),
            ("ws-outlier-ratio", &self.ws_outlier_ratio),
            ("ws-min-inlier-ratio", &self.ws_min_inlier_ratio),
            ("ws-nkps", &self.ws_nkps),
            ("ws-local-outlier-rejection", &self.ws_local_outlier_rejection),
            ("output", &self.output),
            ("mode", &self.mode),
            ("stab-radius", &self.stab_radius),
            ("model", &self.model),
            ("subset", &self.subset),
            ("thresh", &self.thresh),
            ("outlier-ratio", &self.outlier_ratio),
            ("min-inlier-ratio", &self.min_inlier_ratio),
            ("nkps", &self.nkps),
            ("local-outlier-rejection", &self.local_outlier_rejection),
            ("trim-ratio", &self.trim_ratio),
            ("est-trim", &self.est_trim),
            ("incl-constr", &self.incl_constr),
            ("border-mode", &self.border_mode),
            ("output-fps", &self.output_fps),
        ];
        all.into_iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
            .collect()
    }
}

/// Logs progress and optionally stops after a fixed number of frames.
struct ProgressPreview {
    total: Option<usize>,
    stop_after: Option<usize>,
    shown: usize,
}

impl PreviewSurface for ProgressPreview {
    fn show(&mut self, frame: &Frame) -> PreviewSignal {
        self.shown += 1;
        if self.shown % 50 == 0 {
            match self.total {
                Some(n) => tracing::info!("frame {} ({}/{})", frame.index(), self.shown, n),
                None => tracing::info!("frame {} ({})", frame.index(), self.shown),
            }
        }
        match self.stop_after {
            Some(k) if self.shown >= k => PreviewSignal::Cancel,
            _ => PreviewSignal::Continue,
        }
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run(&cli)
}

fn run(cli: &Cli) -> CliResult<()> {
    let config = StabilizeConfig::from_options(cli.options.to_pairs())?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    let pipeline = Pipeline::new(&config)?;

    tracing::info!("Reading frames from {}", cli.input.display());
    let mut source = ImageSequenceSource::open(&cli.input)?;
    if let Some(fps) = cli.input_fps {
        source = source.with_fps(fps);
    }
    let total = source.frame_count();

    let mut sink = config.output.as_ref().map(ImageSequenceSink::new);
    let mut preview = ProgressPreview {
        total,
        stop_after: cli.stop_after,
        shown: 0,
    };

    let report = pipeline.run(
        Box::new(source),
        sink.as_mut().map(|s| s as &mut dyn FrameSink),
        Some(&mut preview),
    )?;

    tracing::info!(
        "Stabilized {} frames ({} mode, trim {:.3}, {:.2} fps)",
        report.frames_processed,
        report.mode,
        report.trim_ratio,
        report.output_fps
    );
    if report.degraded_pairs > 0 {
        tracing::warn!(
            "{} frame pairs could not be estimated and were left unstabilized",
            report.degraded_pairs
        );
    }
    if let Some(sink) = &sink {
        tracing::info!("Frames written to {}", sink.dir().display());
    }

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, &json)?;
        tracing::info!("Report written to {}", path.display());
    }

    Ok(())
}
