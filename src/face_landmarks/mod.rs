pub mod model_dlib;

use image::{DynamicImage, GrayImage, Luma};
use nalgebra::Point2;

use crate::error::{Error, Result};
use crate::face_detection::FaceBoundingBox;

/// Number of points in the iBUG 300-W annotation scheme.
pub const NUM_FACE_LANDMARKS: usize = 68;

pub trait FaceLandmarksModel {
    /// Locate the landmarks of the face inside `face` on an intensity image.
    fn run(&self, image: &GrayImage, face: &FaceBoundingBox) -> Result<FaceLandmarks>;
}

/// Intensity image with BT.601 luma weights (0.299, 0.587, 0.114), the
/// conversion the dlib regression trees were trained against.
pub fn to_intensity(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// The 68 landmarks of one face, in image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    points: Vec<Point2<i32>>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Point2<i32>>) -> Result<Self> {
        if points.len() != NUM_FACE_LANDMARKS {
            return Err(Error::UnexpectedOutput(format!(
                "expected {} face landmarks, got {}",
                NUM_FACE_LANDMARKS,
                points.len()
            )));
        }
        Ok(Self { points })
    }

    pub fn get_landmark(&self, index: usize) -> Option<Point2<i32>> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[Point2<i32>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
