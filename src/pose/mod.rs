pub mod model_blazepose;

use image::RgbImage;
use nalgebra::{Point2, Point3};

use crate::error::{Error, Result};

/// Number of body landmarks in the BlazePose topology.
pub const NUM_POSE_LANDMARKS: usize = 33;

pub trait PoseEstimationModel {
    /// Estimate the pose of the most prominent person, or `None` when nobody
    /// is found with sufficient confidence.
    fn run(&self, image: &RgbImage) -> Result<Option<PoseKeypoints>>;
}

/// Body keypoints used for garment alignment. "Left" and "right" are the
/// subject's own sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKeypoint {
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
}

impl BodyKeypoint {
    pub fn index(self) -> usize {
        match self {
            BodyKeypoint::LeftShoulder => 11,
            BodyKeypoint::RightShoulder => 12,
            BodyKeypoint::LeftHip => 23,
            BodyKeypoint::RightHip => 24,
        }
    }
}

/// Pose landmarks of one person: x and y normalized to [0, 1] over the image,
/// z holding the visibility probability.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseKeypoints {
    points: Vec<Point3<f32>>,
}

impl PoseKeypoints {
    pub fn new(points: Vec<Point3<f32>>) -> Result<Self> {
        if points.len() < NUM_POSE_LANDMARKS {
            return Err(Error::UnexpectedOutput(format!(
                "expected at least {} pose landmarks, got {}",
                NUM_POSE_LANDMARKS,
                points.len()
            )));
        }
        Ok(Self { points })
    }

    /// Normalized (x, y) of `keypoint`.
    pub fn get(&self, keypoint: BodyKeypoint) -> Point2<f32> {
        let p = self.points[keypoint.index()];
        Point2::new(p.x, p.y)
    }

    pub fn visibility(&self, keypoint: BodyKeypoint) -> f32 {
        self.points[keypoint.index()].z
    }

    /// Pixel position of `keypoint` in a `width` x `height` image, truncated toward zero.
    pub fn to_pixels(&self, keypoint: BodyKeypoint, width: u32, height: u32) -> Point2<i32> {
        let p = self.get(keypoint);
        Point2::new((p.x * width as f32) as i32, (p.y * height as f32) as i32)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
