//! Ensemble-of-regression-trees landmark predictor, evaluated from dlib's
//! pretrained `shape_predictor_68_face_landmarks.dat`.

mod deserialize;
mod procrustes;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use image::GrayImage;
use log::info;
use nalgebra::{DVector, Matrix2, Matrix2xX, Point2, Vector2};

use crate::error::{Error, Result};
use crate::face_detection::FaceBoundingBox;
use crate::face_landmarks::{FaceLandmarks, FaceLandmarksModel};

use self::deserialize::DlibReader;
use self::procrustes::similarity_matrix;

/// Pixel-difference test at an inner tree node. `idx1`/`idx2` index the
/// feature pixels sampled for the current cascade.
#[derive(Debug, Clone, Copy)]
pub struct SplitFeature {
    idx1: usize,
    idx2: usize,
    thresh: f32,
}

/// Complete binary tree stored breadth-first: node `i` has children `2i+1`
/// and `2i+2`, and leaf `j` follows the last split.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    splits: Vec<SplitFeature>,
    leaf_values: Vec<DVector<f32>>,
}

impl RegressionTree {
    fn leaf(&self, feature_pixel_values: &[f32]) -> &DVector<f32> {
        let mut i = 0;
        while i < self.splits.len() {
            let split = &self.splits[i];
            // dlib goes left when the difference exceeds the threshold
            i = if feature_pixel_values[split.idx1] - feature_pixel_values[split.idx2] > split.thresh {
                2 * i + 1
            } else {
                2 * i + 2
            };
        }
        &self.leaf_values[i - self.splits.len()]
    }
}

pub struct ShapePredictor {
    /// Mean shape in unit-box coordinates, flattened as (x0, y0, x1, y1, ...).
    initial_shape: DVector<f32>,
    forests: Vec<Vec<RegressionTree>>,
    anchor_idx: Vec<Vec<usize>>,
    deltas: Vec<Vec<Vector2<f32>>>,
}

impl ShapePredictor {
    pub fn new(
        initial_shape: DVector<f32>,
        forests: Vec<Vec<RegressionTree>>,
        anchor_idx: Vec<Vec<usize>>,
        deltas: Vec<Vec<Vector2<f32>>>,
    ) -> Result<Self> {
        if initial_shape.len() % 2 != 0 {
            return Err(Error::InvalidModel(format!(
                "initial shape has odd length {}",
                initial_shape.len()
            )));
        }
        if forests.len() != anchor_idx.len() || forests.len() != deltas.len() {
            return Err(Error::InvalidModel(format!(
                "{} cascades but {} anchor sets and {} delta sets",
                forests.len(),
                anchor_idx.len(),
                deltas.len()
            )));
        }

        let num_parts = initial_shape.len() / 2;
        for (cascade, forest) in forests.iter().enumerate() {
            let anchors = &anchor_idx[cascade];
            if anchors.len() != deltas[cascade].len() {
                return Err(Error::InvalidModel(format!(
                    "cascade {} has {} anchors and {} deltas",
                    cascade,
                    anchors.len(),
                    deltas[cascade].len()
                )));
            }
            if let Some(bad) = anchors.iter().find(|&&a| a >= num_parts) {
                return Err(Error::InvalidModel(format!(
                    "anchor {} out of range for {} landmarks",
                    bad, num_parts
                )));
            }

            for tree in forest {
                let bad_split = tree
                    .splits
                    .iter()
                    .any(|s| s.idx1 >= anchors.len() || s.idx2 >= anchors.len());
                let bad_leaf = tree
                    .leaf_values
                    .iter()
                    .any(|leaf| leaf.len() != initial_shape.len());
                if bad_split || bad_leaf || tree.leaf_values.len() != tree.splits.len() + 1 {
                    return Err(Error::InvalidModel(format!(
                        "malformed regression tree in cascade {}",
                        cascade
                    )));
                }
            }
        }

        Ok(Self {
            initial_shape,
            forests,
            anchor_idx,
            deltas,
        })
    }

    /// Load a dlib shape predictor from a `.dat` or bzip2-compressed `.dat.bz2` file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);

        let predictor = if path.extension().is_some_and(|ext| ext == "bz2") {
            Self::from_reader(BzDecoder::new(reader))?
        } else {
            Self::from_reader(reader)?
        };

        info!(
            "Loaded shape predictor from {} ({} landmarks, {} cascades)",
            path.display(),
            predictor.num_parts(),
            predictor.num_cascades()
        );
        Ok(predictor)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        DlibReader::new(reader).read_shape_predictor()
    }

    pub fn num_parts(&self) -> usize {
        self.initial_shape.len() / 2
    }

    pub fn num_cascades(&self) -> usize {
        self.forests.len()
    }

    /// Predict landmark positions (image pixels) for the face in `rect`.
    pub fn predict(&self, image: &GrayImage, rect: &FaceBoundingBox) -> Vec<Point2<f32>> {
        let to_image = UnitBoxTransform::new(rect);
        let mut current_shape = self.initial_shape.clone();
        let mut feature_pixel_values = Vec::new();

        for (cascade, forest) in self.forests.iter().enumerate() {
            self.extract_feature_pixel_values(
                image,
                &to_image,
                &current_shape,
                cascade,
                &mut feature_pixel_values,
            );
            for tree in forest {
                current_shape += tree.leaf(&feature_pixel_values);
            }
        }

        (0..self.num_parts())
            .map(|i| to_image.apply(location(&current_shape, i)))
            .collect()
    }

    /// Sample the pixels this cascade's trees compare. Each feature pixel is an
    /// anchor landmark plus an offset, the offset rotated and scaled by how the
    /// current shape differs from the mean shape. Pixels outside the image read as 0.
    fn extract_feature_pixel_values(
        &self,
        image: &GrayImage,
        to_image: &UnitBoxTransform,
        current_shape: &DVector<f32>,
        cascade: usize,
        feature_pixel_values: &mut Vec<f32>,
    ) {
        let tform = similarity_matrix(&as_points(&self.initial_shape), &as_points(current_shape));
        let (width, height) = image.dimensions();

        feature_pixel_values.clear();
        for (&anchor, delta) in self.anchor_idx[cascade].iter().zip(&self.deltas[cascade]) {
            let p = to_image.apply(tform * delta + location(current_shape, anchor));
            let (x, y) = (p.x.round(), p.y.round());

            let value = if x >= 0.0 && y >= 0.0 && x < width as f32 && y < height as f32 {
                image.get_pixel(x as u32, y as u32).0[0] as f32
            } else {
                0.0
            };
            feature_pixel_values.push(value);
        }
    }
}

impl FaceLandmarksModel for ShapePredictor {
    fn run(&self, image: &GrayImage, face: &FaceBoundingBox) -> Result<FaceLandmarks> {
        let points = self
            .predict(image, face)
            .into_iter()
            .map(|p| Point2::new(p.x.round() as i32, p.y.round() as i32))
            .collect();
        FaceLandmarks::new(points)
    }
}

/// Maps the unit square onto a face rectangle. dlib rectangles are inclusive,
/// so (1, 1) lands on the last pixel inside the box.
struct UnitBoxTransform {
    scale: Matrix2<f32>,
    offset: Vector2<f32>,
}

impl UnitBoxTransform {
    fn new(rect: &FaceBoundingBox) -> Self {
        let width = (rect.width - 1.0).max(0.0);
        let height = (rect.height - 1.0).max(0.0);
        Self {
            scale: Matrix2::new(width, 0.0, 0.0, height),
            offset: Vector2::new(rect.x, rect.y),
        }
    }

    fn apply(&self, p: Vector2<f32>) -> Point2<f32> {
        Point2::from(self.scale * p + self.offset)
    }
}

fn location(shape: &DVector<f32>, i: usize) -> Vector2<f32> {
    Vector2::new(shape[2 * i], shape[2 * i + 1])
}

fn as_points(shape: &DVector<f32>) -> Matrix2xX<f32> {
    Matrix2xX::from_column_slice(shape.as_slice())
}
