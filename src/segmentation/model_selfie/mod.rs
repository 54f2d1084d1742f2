use std::path::Path;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;
use log::debug;
use ndarray::{Array2, ArrayD, Axis};
use ort::{Environment, Session};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::onnx;
use crate::segmentation::{SegmentationMask, SegmentationModel};

/// Input size (width, height) of the landscape selfie segmentation model.
pub const LANDSCAPE_INPUT: (u32, u32) = (256, 144);

const INPUT_RANGE: (f32, f32) = (0.0, 1.0);

pub struct SelfieSegmentationModel {
    session: Session,
    input_size: (u32, u32),
}

impl SelfieSegmentationModel {
    pub fn new(environment: &Arc<Environment>, model_path: &Path) -> Result<Self> {
        let session = onnx::load_session(environment, model_path)?;

        Ok(SelfieSegmentationModel {
            session,
            input_size: LANDSCAPE_INPUT,
        })
    }

    pub fn from_settings(environment: &Arc<Environment>, settings: &Settings) -> Result<Self> {
        Self::new(
            environment,
            &settings.resolve_model(&settings.segmentation.model),
        )
    }
}

impl SegmentationModel for SelfieSegmentationModel {
    fn run(&self, image: &RgbImage) -> Result<SegmentationMask> {
        let (width, height) = self.input_size;
        // the model sees a stretched copy; the mask is stretched back in `to_binary`
        let input = imageops::resize(image, width, height, FilterType::Triangle);
        let outputs = onnx::run(&self.session, &input, INPUT_RANGE)?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnexpectedOutput("segmentation model has no output".to_string()))?;
        let probabilities = to_probability_map(output)?;
        debug!("Segmentation mask {:?}", probabilities.dim());

        SegmentationMask::new(probabilities)
    }
}

/// Reduce a `(1, h, w, 1)`, `(1, h, w)` or `(h, w)` output to a 2-D map.
fn to_probability_map(output: ArrayD<f32>) -> Result<Array2<f32>> {
    let mut output = output;
    if output.ndim() == 4 && output.shape()[3] == 1 {
        output = output.index_axis_move(Axis(3), 0);
    }
    if output.ndim() == 3 && output.shape()[0] == 1 {
        output = output.index_axis_move(Axis(0), 0);
    }
    if output.ndim() != 2 {
        return Err(Error::UnexpectedOutput(format!(
            "segmentation output has shape {:?}",
            output.shape()
        )));
    }
    Ok(output.into_dimensionality()?)
}
