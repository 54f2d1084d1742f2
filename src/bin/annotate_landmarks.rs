use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use fitroom::annotate::{LandmarkAnnotator, MarkerStyle};
use fitroom::config::Settings;
use fitroom::face_detection::model_blazeface::BlazefaceModel;
use fitroom::face_landmarks::model_dlib::ShapePredictor;
use fitroom::onnx;

/// Detect faces in an image and mark their 68 facial landmarks with green dots.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Image to annotate.
    input: PathBuf,

    /// Where to write the annotated image. The format follows the extension.
    output: PathBuf,
}

fn main() -> Result<()> {
    fitroom::init_logging();
    let args = Args::parse();

    let settings = Settings::load().context("failed to load settings")?;
    let environment = onnx::environment("annotate-landmarks")?;

    let detector = BlazefaceModel::from_settings(&environment, &settings)
        .context("failed to load face detection model")?;
    let predictor_path = settings.resolve_model(&settings.face_landmarks.model);
    let predictor = ShapePredictor::load(&predictor_path).with_context(|| {
        format!("failed to load landmark model {}", predictor_path.display())
    })?;

    let annotator = LandmarkAnnotator::new(detector, predictor, MarkerStyle::from(settings.markers))
        .with_box_adjustment(settings.face_landmarks.box_adjustment);
    let summary = annotator
        .annotate_file(&args.input, &args.output)
        .with_context(|| format!("failed to annotate {}", args.input.display()))?;

    info!("Found {} face(s)", summary.faces);
    Ok(())
}
