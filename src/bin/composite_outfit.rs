use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use fitroom::config::Settings;
use fitroom::onnx;
use fitroom::outfit::OutfitCompositor;
use fitroom::pose::model_blazepose::BlazeposeModel;
use fitroom::segmentation::model_selfie::SelfieSegmentationModel;

const USAGE: &str = "Usage: composite-outfit <human_image> <clothing_image> <output_path>";

/// Fit a garment image onto the person in a photo.
///
/// Takes exactly three paths and no flags, so any path may start with `-`.
#[derive(Debug, Parser)]
#[command(about, disable_help_flag = true, disable_version_flag = true)]
struct Args {
    /// Photo of the person.
    #[arg(allow_hyphen_values = true)]
    human_image: PathBuf,

    /// Garment image, ideally with a transparent background.
    #[arg(allow_hyphen_values = true)]
    clothing_image: PathBuf,

    /// Where to write the composite.
    #[arg(allow_hyphen_values = true)]
    output_path: PathBuf,
}

fn main() -> ExitCode {
    fitroom::init_logging();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(_) => {
            println!("{USAGE}");
            return ExitCode::from(1);
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let person = image::open(&args.human_image)
        .with_context(|| format!("failed to open {}", args.human_image.display()))?;
    let clothing = image::open(&args.clothing_image)
        .with_context(|| format!("failed to open {}", args.clothing_image.display()))?;

    let settings = Settings::load().context("failed to load settings")?;
    let environment = onnx::environment("composite-outfit")?;
    let pose = BlazeposeModel::from_settings(&environment, &settings)
        .context("failed to load pose model")?;
    let segmentation = SelfieSegmentationModel::from_settings(&environment, &settings)
        .context("failed to load segmentation model")?;

    let compositor = OutfitCompositor::new(
        pose,
        segmentation,
        settings.blending,
        settings.segmentation.threshold,
    );
    let result = compositor.composite(&person, &clothing)?;

    result
        .save(&args.output_path)
        .with_context(|| format!("failed to write {}", args.output_path.display()))?;
    Ok(())
}
