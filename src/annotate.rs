//! Landmark annotation: detect faces, predict 68 landmarks per face and draw
//! a dot on each.

use std::path::Path;

use image::{DynamicImage, Rgba};
use imageproc::drawing::draw_filled_circle_mut;
use log::{debug, info};
use nalgebra::Point2;

use crate::config::{BoxAdjustment, MarkerSettings};
use crate::error::Result;
use crate::face_detection::FaceDetectionModel;
use crate::face_landmarks::{to_intensity, FaceLandmarksModel};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerStyle {
    pub radius: i32,
    pub color: Rgba<u8>,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        MarkerSettings::default().into()
    }
}

impl From<MarkerSettings> for MarkerStyle {
    fn from(settings: MarkerSettings) -> Self {
        let [r, g, b] = settings.color;
        Self {
            radius: settings.radius,
            color: Rgba([r, g, b, 255]),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationSummary {
    pub faces: usize,
    pub markers: usize,
}

/// Draw a filled dot for each point, clamping centres into the image.
/// Returns the number of dots drawn.
pub fn draw_landmarks(image: &mut DynamicImage, points: &[Point2<i32>], style: &MarkerStyle) -> usize {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return 0;
    }

    for p in points {
        let cx = p.x.clamp(0, width as i32 - 1);
        let cy = p.y.clamp(0, height as i32 - 1);
        draw_filled_circle_mut(image, (cx, cy), style.radius, style.color);
    }
    points.len()
}

/// Copy of `image` that can hold coloured markers. Grayscale sources are
/// promoted to RGB(A); colour sources keep their layout.
fn with_color(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
            DynamicImage::ImageRgb8(image.to_rgb8())
        }
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => {
            DynamicImage::ImageRgba8(image.to_rgba8())
        }
        _ => image.clone(),
    }
}

pub struct LandmarkAnnotator<D, L> {
    detector: D,
    predictor: L,
    style: MarkerStyle,
    box_adjustment: BoxAdjustment,
}

impl<D: FaceDetectionModel, L: FaceLandmarksModel> LandmarkAnnotator<D, L> {
    pub fn new(detector: D, predictor: L, style: MarkerStyle) -> Self {
        Self {
            detector,
            predictor,
            style,
            box_adjustment: BoxAdjustment::default(),
        }
    }

    /// Reframe detector boxes before landmark prediction.
    pub fn with_box_adjustment(mut self, box_adjustment: BoxAdjustment) -> Self {
        self.box_adjustment = box_adjustment;
        self
    }

    /// Annotate a copy of `image`. With no faces the copy is returned untouched.
    pub fn annotate(&self, image: &DynamicImage) -> Result<(DynamicImage, AnnotationSummary)> {
        let faces = self.detector.run(image)?;
        let mut summary = AnnotationSummary {
            faces: faces.len(),
            markers: 0,
        };
        if faces.is_empty() {
            return Ok((image.clone(), summary));
        }

        let mut annotated = with_color(image);
        let gray = to_intensity(image);
        for face in &faces {
            let face = self.box_adjustment.apply(face);
            let landmarks = self.predictor.run(&gray, &face)?;
            debug!("Face at {:?}: {} landmarks", face.to_tuple(), landmarks.len());
            summary.markers += draw_landmarks(&mut annotated, landmarks.points(), &self.style);
        }
        Ok((annotated, summary))
    }

    /// Annotate the image at `input` and write it to `output`. Nothing is
    /// written if any step fails.
    pub fn annotate_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        output: Q,
    ) -> Result<AnnotationSummary> {
        let image = image::open(input.as_ref())?;
        let (annotated, summary) = self.annotate(&image)?;
        annotated.save(output.as_ref())?;

        info!(
            "Drew {} landmarks on {} face(s) in {}",
            summary.markers,
            summary.faces,
            output.as_ref().display()
        );
        Ok(summary)
    }
}
