pub mod model_blazeface;

use image::DynamicImage;

use crate::error::Result;

pub trait FaceDetectionModel {
    /// Detect every face in `image`, in the detector's native order.
    fn run(&self, image: &DynamicImage) -> Result<Vec<FaceBoundingBox>>;
}

/// Bounding box around a detected face, in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Confidence score of the detected face.
    pub score: f32,
}

impl FaceBoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32, score: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            score,
        }
    }

    /// Top-left corner of the face rectangle.
    pub fn origin(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    /// (x, y, width, height), rounded to whole pixels.
    pub fn to_tuple(&self) -> (i32, i32, u32, u32) {
        (
            self.x.round() as i32,
            self.y.round() as i32,
            self.width.max(0.0).round() as u32,
            self.height.max(0.0).round() as u32,
        )
    }

    /// Scale the box about its centre, then shift it down by `offset_y` of its
    /// new height.
    pub fn reframed(&self, scale: f32, offset_y: f32) -> Self {
        let width = self.width * scale;
        let height = self.height * scale;
        let cx = self.x + self.width / 2.0;
        let cy = self.y + self.height / 2.0 + offset_y * height;
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height, self.score)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &Self) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if intersection <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Clip the box to a `width` x `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x1 = self.x.clamp(0.0, width as f32);
        let y1 = self.y.clamp(0.0, height as f32);
        let x2 = (self.x + self.width).clamp(0.0, width as f32);
        let y2 = (self.y + self.height).clamp(0.0, height as f32);
        Self::new(x1, y1, x2 - x1, y2 - y1, self.score)
    }
}

/// Greedy non-maximum suppression. Output is sorted by descending score.
pub fn non_max_suppression(mut faces: Vec<FaceBoundingBox>, threshold: f32) -> Vec<FaceBoundingBox> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<FaceBoundingBox> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| face.iou(k) <= threshold) {
            kept.push(face);
        }
    }
    kept
}
