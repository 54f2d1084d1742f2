use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use log::{debug, info};
use ndarray::prelude::*;
use ndarray_npy::ReadNpyExt;
use ort::{Environment, Session};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::face_detection::{non_max_suppression, FaceBoundingBox, FaceDetectionModel};
use crate::onnx::{self, sigmoid};

/// Input resolution of the BlazeFace back-camera model.
pub const INPUT_SIZE: u32 = 256;
/// Feature map strides of the back-camera model's SSD heads.
pub const BACK_MODEL_STRIDES: [u32; 4] = [16, 32, 32, 32];

const INPUT_RANGE: (f32, f32) = (-1.0, 1.0);
const RAW_SCORE_CLIP: f32 = 100.0;

pub struct BlazefaceModel {
    session: Session,
    anchors: Array2<f32>,
    input_size: u32,
    score_threshold: f32,
    nms_threshold: f32,
}

impl BlazefaceModel {
    pub fn new(
        environment: &Arc<Environment>,
        model_path: &Path,
        anchors: Array2<f32>,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        let session = onnx::load_session(environment, model_path)?;

        Ok(BlazefaceModel {
            session,
            anchors,
            input_size: INPUT_SIZE,
            score_threshold,
            nms_threshold,
        })
    }

    /// Build the detector described by `settings.face_detection`.
    pub fn from_settings(environment: &Arc<Environment>, settings: &Settings) -> Result<Self> {
        let detection = &settings.face_detection;
        let anchors = match &detection.anchors {
            Some(path) => load_anchors(&settings.resolve_model(path))?,
            None => generate_anchors(INPUT_SIZE, &BACK_MODEL_STRIDES),
        };

        Self::new(
            environment,
            &settings.resolve_model(&detection.model),
            anchors,
            detection.score_threshold,
            detection.nms_threshold,
        )
    }

    /// Decode the box for anchor `i` into normalized (ymin, xmin, ymax, xmax).
    fn decode_box(&self, raw_boxes: &Array3<f32>, i: usize, scale: f32) -> [f32; 4] {
        let anchors = &self.anchors;

        let x_center = raw_boxes[[0, i, 0]] / scale * anchors[[i, 2]] + anchors[[i, 0]];
        let y_center = raw_boxes[[0, i, 1]] / scale * anchors[[i, 3]] + anchors[[i, 1]];

        let w = raw_boxes[[0, i, 2]] / scale * anchors[[i, 2]];
        let h = raw_boxes[[0, i, 3]] / scale * anchors[[i, 3]];

        [
            y_center - h / 2.0,
            x_center - w / 2.0,
            y_center + h / 2.0,
            x_center + w / 2.0,
        ]
    }
}

impl FaceDetectionModel for BlazefaceModel {
    fn run(&self, image: &DynamicImage) -> Result<Vec<FaceBoundingBox>> {
        let (input, letterbox) = onnx::letterbox(&image.to_rgb8(), self.input_size);
        let outputs = onnx::run(&self.session, &input, INPUT_RANGE)?;
        let (scores, raw_boxes) = split_outputs(outputs)?;

        let num_anchors = self.anchors.nrows();
        if scores.shape()[1] != num_anchors || raw_boxes.shape()[1] != num_anchors {
            return Err(Error::UnexpectedOutput(format!(
                "expected {} anchors, model produced {} scores and {} boxes",
                num_anchors,
                scores.shape()[1],
                raw_boxes.shape()[1]
            )));
        }

        let size = self.input_size as f32;
        let mut faces = Vec::new();
        for i in 0..num_anchors {
            let score = sigmoid(scores[[0, i, 0]].clamp(-RAW_SCORE_CLIP, RAW_SCORE_CLIP));
            if score < self.score_threshold {
                continue;
            }

            let [ymin, xmin, ymax, xmax] = self.decode_box(&raw_boxes, i, size);
            let (x1, y1) = letterbox.to_source(xmin * size, ymin * size);
            let (x2, y2) = letterbox.to_source(xmax * size, ymax * size);

            let face = FaceBoundingBox::new(x1, y1, x2 - x1, y2 - y1, score)
                .clamp_to(image.width(), image.height());
            if face.area() > 0.0 {
                faces.push(face);
            }
        }

        let faces = non_max_suppression(faces, self.nms_threshold);
        debug!("BlazeFace kept {} face(s)", faces.len());
        Ok(faces)
    }
}

/// Read SSD anchors (rows of x_center, y_center, width, height) from a `.npy` file.
pub fn load_anchors(path: &Path) -> Result<Array2<f32>> {
    let file = File::open(path)?;
    let anchors: Array2<f64> = Array2::<f64>::read_npy(file)?;
    if anchors.ncols() != 4 {
        return Err(Error::InvalidModel(format!(
            "anchors in {} have {} columns, expected 4",
            path.display(),
            anchors.ncols()
        )));
    }
    info!("Loaded {} anchors from {}", anchors.nrows(), path.display());

    // convert to f32
    Ok(anchors.map(|x| *x as f32))
}

/// Generate fixed-size SSD anchors. Consecutive layers sharing a stride are
/// merged into one feature map with two anchors per layer and cell.
pub fn generate_anchors(input_size: u32, strides: &[u32]) -> Array2<f32> {
    let mut rows: Vec<f32> = Vec::new();

    let mut layer = 0;
    while layer < strides.len() {
        let stride = strides[layer];
        let mut same_stride = 0;
        while layer < strides.len() && strides[layer] == stride {
            same_stride += 1;
            layer += 1;
        }

        let anchors_per_cell = 2 * same_stride;
        let feature_map = (input_size as f32 / stride as f32).ceil() as usize;
        for y in 0..feature_map {
            for x in 0..feature_map {
                let x_center = (x as f32 + 0.5) / feature_map as f32;
                let y_center = (y as f32 + 0.5) / feature_map as f32;
                for _ in 0..anchors_per_cell {
                    rows.extend_from_slice(&[x_center, y_center, 1.0, 1.0]);
                }
            }
        }
    }

    let count = rows.len() / 4;
    Array2::from_shape_vec((count, 4), rows).unwrap_or_else(|_| Array2::zeros((0, 4)))
}

/// Sort raw model outputs into (scores, boxes). Heads with a trailing
/// dimension of 1 are classifiers; wider heads are regressors. Heads of the
/// same kind are concatenated along the anchor axis in output order.
fn split_outputs(outputs: Vec<ArrayD<f32>>) -> Result<(Array3<f32>, Array3<f32>)> {
    let mut scores = Vec::new();
    let mut boxes = Vec::new();

    for output in outputs {
        let output = match output.ndim() {
            2 => output.insert_axis(Axis(0)),
            _ => output,
        };
        let output = output.into_dimensionality::<Ix3>()?;
        if output.shape()[2] == 1 {
            scores.push(output);
        } else if output.shape()[2] >= 4 {
            boxes.push(output);
        }
    }

    if scores.is_empty() || boxes.is_empty() {
        return Err(Error::UnexpectedOutput(
            "face detector must produce score and box tensors".to_string(),
        ));
    }

    let concat = |parts: &[Array3<f32>]| -> Result<Array3<f32>> {
        let views: Vec<ArrayView3<f32>> = parts.iter().map(|p| p.view()).collect();
        Ok(ndarray::concatenate(Axis(1), &views)?)
    };

    Ok((concat(&scores)?, concat(&boxes)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_model_anchor_layout() {
        let anchors = generate_anchors(INPUT_SIZE, &BACK_MODEL_STRIDES);
        // 16x16 cells x 2 anchors + 8x8 cells x 6 anchors
        assert_eq!(anchors.nrows(), 896);

        assert!((anchors[[0, 0]] - 0.5 / 16.0).abs() < 1e-6);
        assert!((anchors[[0, 1]] - 0.5 / 16.0).abs() < 1e-6);
        assert_eq!(anchors[[0, 2]], 1.0);
        assert_eq!(anchors[[1, 0]], anchors[[0, 0]]);

        let first_coarse = 16 * 16 * 2;
        assert!((anchors[[first_coarse, 0]] - 0.5 / 8.0).abs() < 1e-6);
        assert!((anchors[[895, 1]] - 7.5 / 8.0).abs() < 1e-6);
    }

    #[test]
    fn outputs_are_split_by_head_width() {
        let scores_a = ArrayD::<f32>::zeros(IxDyn(&[1, 512, 1]));
        let boxes_a = ArrayD::<f32>::zeros(IxDyn(&[1, 512, 16]));
        let scores_b = ArrayD::<f32>::ones(IxDyn(&[1, 384, 1]));
        let boxes_b = ArrayD::<f32>::ones(IxDyn(&[1, 384, 16]));

        let (scores, boxes) = split_outputs(vec![scores_a, scores_b, boxes_a, boxes_b]).unwrap();
        assert_eq!(scores.shape(), &[1, 896, 1]);
        assert_eq!(boxes.shape(), &[1, 896, 16]);
        assert_eq!(scores[[0, 511, 0]], 0.0);
        assert_eq!(scores[[0, 512, 0]], 1.0);
    }

    #[test]
    fn missing_box_head_is_rejected() {
        let scores = ArrayD::<f32>::zeros(IxDyn(&[1, 896, 1]));
        assert!(matches!(
            split_outputs(vec![scores]),
            Err(Error::UnexpectedOutput(_))
        ));
    }
}
