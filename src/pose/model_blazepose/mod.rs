use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use log::{debug, warn};
use nalgebra::Point3;
use ndarray::ArrayD;
use ort::{Environment, Session};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::onnx::{self, sigmoid, Letterbox};
use crate::pose::{BodyKeypoint, PoseEstimationModel, PoseKeypoints, NUM_POSE_LANDMARKS};

/// Input resolution of the BlazePose landmark models.
pub const INPUT_SIZE: u32 = 256;

const INPUT_RANGE: (f32, f32) = (0.0, 1.0);
// x, y, z, visibility, presence
const VALUES_PER_LANDMARK: usize = 5;

pub struct BlazeposeModel {
    session: Session,
    input_size: u32,
    min_detection_confidence: f32,
}

impl BlazeposeModel {
    pub fn new(
        environment: &Arc<Environment>,
        model_path: &Path,
        min_detection_confidence: f32,
    ) -> Result<Self> {
        let session = onnx::load_session(environment, model_path)?;

        Ok(BlazeposeModel {
            session,
            input_size: INPUT_SIZE,
            min_detection_confidence,
        })
    }

    pub fn from_settings(environment: &Arc<Environment>, settings: &Settings) -> Result<Self> {
        Self::new(
            environment,
            &settings.resolve_model(&settings.pose.model),
            settings.pose.min_detection_confidence,
        )
    }
}

impl PoseEstimationModel for BlazeposeModel {
    fn run(&self, image: &RgbImage) -> Result<Option<PoseKeypoints>> {
        let (input, letterbox) = onnx::letterbox(image, self.input_size);
        let outputs = onnx::run(&self.session, &input, INPUT_RANGE)?;

        let pose = decode_outputs(
            &outputs,
            &letterbox,
            image.dimensions(),
            self.min_detection_confidence,
        )?;

        if let Some(pose) = &pose {
            for keypoint in [
                BodyKeypoint::LeftShoulder,
                BodyKeypoint::RightShoulder,
                BodyKeypoint::LeftHip,
                BodyKeypoint::RightHip,
            ] {
                if pose.visibility(keypoint) < 0.5 {
                    warn!(
                        "{:?} is poorly visible ({:.2}), garment placement may be off",
                        keypoint,
                        pose.visibility(keypoint)
                    );
                }
            }
        }
        Ok(pose)
    }
}

/// Turn raw landmark model outputs into normalized keypoints.
///
/// The pose flag is the single-element output. Landmarks come from the
/// smallest output holding at least 33 groups of five values, with x and y in
/// model input pixels.
fn decode_outputs(
    outputs: &[ArrayD<f32>],
    letterbox: &Letterbox,
    (width, height): (u32, u32),
    min_detection_confidence: f32,
) -> Result<Option<PoseKeypoints>> {
    let flag = outputs
        .iter()
        .find(|o| o.len() == 1)
        .and_then(|o| o.iter().next().copied())
        .ok_or_else(|| Error::UnexpectedOutput("pose model has no presence flag".to_string()))?;
    let score = sigmoid(flag);
    if score < min_detection_confidence {
        debug!(
            "Pose score {:.3} below threshold {:.3}",
            score, min_detection_confidence
        );
        return Ok(None);
    }

    let landmarks = outputs
        .iter()
        .filter(|o| {
            o.len() % VALUES_PER_LANDMARK == 0
                && o.len() / VALUES_PER_LANDMARK >= NUM_POSE_LANDMARKS
        })
        .min_by_key(|o| o.len())
        .ok_or_else(|| Error::UnexpectedOutput("pose model has no landmark tensor".to_string()))?;
    let values: Vec<f32> = landmarks.iter().copied().collect();

    let (width, height) = (width.max(1) as f32, height.max(1) as f32);
    let points = values
        .chunks_exact(VALUES_PER_LANDMARK)
        .take(NUM_POSE_LANDMARKS)
        .map(|l| {
            let (x, y) = letterbox.to_source(l[0], l[1]);
            Point3::new(x / width, y / height, sigmoid(l[3]))
        })
        .collect();

    debug!("Pose detected with score {:.3}", score);
    PoseKeypoints::new(points).map(Some)
}
