pub mod model_selfie;

use image::{GrayImage, Luma, RgbImage};
use ndarray::Array2;

use crate::error::{Error, Result};

pub trait SegmentationModel {
    /// Per-pixel foreground probability for `image`.
    fn run(&self, image: &RgbImage) -> Result<SegmentationMask>;
}

/// Foreground probabilities at the model's own resolution, indexed `[row, column]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    probabilities: Array2<f32>,
}

impl SegmentationMask {
    pub fn new(probabilities: Array2<f32>) -> Result<Self> {
        if probabilities.is_empty() {
            return Err(Error::UnexpectedOutput(
                "segmentation mask is empty".to_string(),
            ));
        }
        Ok(Self { probabilities })
    }

    pub fn probabilities(&self) -> &Array2<f32> {
        &self.probabilities
    }

    /// Bilinearly sampled probability at mask coordinates `(x, y)`, clamped to the edges.
    pub fn probability_at(&self, x: f32, y: f32) -> f32 {
        let (rows, cols) = self.probabilities.dim();
        let x = x.clamp(0.0, (cols - 1) as f32);
        let y = y.clamp(0.0, (rows - 1) as f32);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(cols - 1);
        let y1 = (y0 + 1).min(rows - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let p = &self.probabilities;
        let top = p[[y0, x0]] * (1.0 - fx) + p[[y0, x1]] * fx;
        let bottom = p[[y1, x0]] * (1.0 - fx) + p[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Resample to `width` x `height` and threshold: 255 where the probability
    /// is strictly above `threshold`, 0 elsewhere.
    pub fn to_binary(&self, width: u32, height: u32, threshold: f32) -> GrayImage {
        let (rows, cols) = self.probabilities.dim();
        let sx = cols as f32 / width.max(1) as f32;
        let sy = rows as f32 / height.max(1) as f32;

        GrayImage::from_fn(width, height, |x, y| {
            let p = self.probability_at((x as f32 + 0.5) * sx - 0.5, (y as f32 + 0.5) * sy - 0.5);
            if p > threshold {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }
}
