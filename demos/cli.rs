use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use yolo_annotate::{
    save_jpeg, Annotator, DetectorHandle, MediaKind, OutputLayout, Pipeline, Settings, YOLOV8,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Settings file (TOML); flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// ONNX model to use
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Confidence threshold
    #[arg(long, global = true)]
    confidence: Option<f32>,

    /// Pad images instead of resizing
    #[arg(long, global = true)]
    pad: bool,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Detect objects in a jpg, jpeg or png image
    Image {
        file: PathBuf,

        /// Name the output detected_<timestamp>.jpg instead of <name>_annotated.jpg
        #[arg(long)]
        timestamped: bool,
    },
    /// Detect objects in every frame of an mp4, avi, mov or mkv video
    Video { file: PathBuf },
}

impl Command {
    fn kind(&self) -> MediaKind {
        match self {
            Command::Image { .. } => MediaKind::Image,
            Command::Video { .. } => MediaKind::Video,
        }
    }

    fn file(&self) -> &Path {
        match self {
            Command::Image { file, .. } | Command::Video { file } => file,
        }
    }
}

fn kind_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
    }
}

fn failure_message(kind: MediaKind, error: &anyhow::Error) -> String {
    format!(
        "An error occurred while processing the {}: {error:#}",
        kind_name(kind)
    )
}

/// Rejects a file whose extension does not match the subcommand
fn check_kind(expected: MediaKind, path: &Path) -> anyhow::Result<()> {
    if MediaKind::from_path(path)? != expected {
        let article = match expected {
            MediaKind::Image => "an",
            MediaKind::Video => "a",
        };
        anyhow::bail!(
            "{} is not {article} {} file",
            path.display(),
            kind_name(expected)
        );
    }
    Ok(())
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    if let Some(model) = &args.model {
        settings.model_path = model.clone();
    }
    if let Some(confidence) = args.confidence {
        settings.confidence = confidence;
    }
    settings.pad |= args.pad;
    settings.validate()?;
    Ok(settings)
}

fn build_pipeline(settings: &Settings) -> anyhow::Result<Pipeline<YOLOV8>> {
    let model = YOLOV8::load(&settings.model_path, settings.inference())
        .context("Failed to create model")?;
    let mut annotator = Annotator::new().with_line_width(settings.line_width);
    if let Some(font) = &settings.label_font {
        annotator = annotator.with_font(Annotator::load_font(font)?);
    }
    Ok(Pipeline::new(DetectorHandle::new(model), annotator).with_fps(settings.fps))
}

fn run_image(
    pipeline: &Pipeline<YOLOV8>,
    layout: &OutputLayout,
    path: &Path,
    settings: &Settings,
    timestamped: bool,
) -> anyhow::Result<()> {
    let result = pipeline.detect_image_file(path, settings.confidence)?;
    if result.counts.is_empty() {
        println!("No objects detected. Try lowering the confidence threshold.");
    } else {
        print!("{}", result.counts);
    }
    let output = if timestamped {
        layout.timestamped_image_path(Local::now().naive_local())
    } else {
        layout.annotated_image_path(path)
    };
    save_jpeg(&result.annotated, &output)?;
    println!("Image saved to: {}", output.display());
    Ok(())
}

#[cfg(feature = "opencv")]
fn run_video(
    pipeline: &Pipeline<YOLOV8>,
    layout: &OutputLayout,
    path: &Path,
    settings: &Settings,
) -> anyhow::Result<()> {
    use yolo_annotate::codec::opencv_io::OpenCvCodec;

    let output = layout.timestamped_video_path(Local::now().naive_local());
    let report = pipeline.detect_video(
        path,
        &output,
        settings.confidence,
        &OpenCvCodec,
        &OpenCvCodec,
    )?;
    println!("Video saved to: {}", report.path.display());
    println!("FPS: {}  Duration: {}s", report.fps, report.duration_secs);
    println!(
        "Note: videos are written at {} FPS; sources with a higher rate play back longer.",
        report.fps
    );
    if !report.detections.is_empty() {
        print!("{}", report.detections);
    }
    Ok(())
}

#[cfg(not(feature = "opencv"))]
fn run_video(
    _pipeline: &Pipeline<YOLOV8>,
    _layout: &OutputLayout,
    _path: &Path,
    _settings: &Settings,
) -> anyhow::Result<()> {
    anyhow::bail!("video support requires the opencv feature")
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    let layout = settings.output_layout();
    if let Err(e) = layout.ensure_dirs() {
        log::error!("cannot create output folders: {e}");
        return ExitCode::FAILURE;
    }
    // Nothing can be served without the model
    let pipeline = match build_pipeline(&settings) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let kind = args.command.kind();
    let outcome = check_kind(kind, args.command.file()).and_then(|()| match &args.command {
        Command::Image { file, timestamped } => {
            run_image(&pipeline, &layout, file, &settings, *timestamped)
        }
        Command::Video { file } => run_video(&pipeline, &layout, file, &settings),
    });
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("{e:?}");
            eprintln!("{}", failure_message(kind, &e));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_subcommand_with_confidence() {
        let args =
            Args::try_parse_from(["annotate", "image", "street.jpg", "--confidence", "0.6"])
                .unwrap();
        assert_eq!(
            args.command,
            Command::Image {
                file: PathBuf::from("street.jpg"),
                timestamped: false,
            }
        );
        assert_eq!(args.confidence, Some(0.6));
    }

    #[test]
    fn video_subcommand_takes_global_flags_first() {
        let args = Args::try_parse_from([
            "annotate",
            "--model",
            "Model/yolov8s.onnx",
            "video",
            "walk.mp4",
        ])
        .unwrap();
        assert_eq!(args.command.kind(), MediaKind::Video);
        assert_eq!(args.command.file(), Path::new("walk.mp4"));
        assert_eq!(args.model, Some(PathBuf::from("Model/yolov8s.onnx")));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Args::try_parse_from(["annotate", "street.jpg"]).is_err());
    }

    #[test]
    fn failure_is_one_line() {
        let error = anyhow::anyhow!("cannot decode frame 3");
        assert_eq!(
            failure_message(MediaKind::Video, &error),
            "An error occurred while processing the video: cannot decode frame 3"
        );
    }

    #[test]
    fn extension_must_match_subcommand() {
        assert!(check_kind(MediaKind::Image, Path::new("a.PNG")).is_ok());
        assert!(check_kind(MediaKind::Image, Path::new("a.mp4")).is_err());
        assert!(check_kind(MediaKind::Video, Path::new("a.txt")).is_err());
    }
}
