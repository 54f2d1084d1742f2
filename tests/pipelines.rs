//! End-to-end runs of both pipelines with deterministic stand-in models.

use std::path::Path;

use image::{DynamicImage, GenericImageView, GrayImage, Rgb, RgbImage, Rgba, RgbaImage};
use nalgebra::{Point2, Point3};
use ndarray::Array2;
use tempfile::tempdir;

use fitroom::annotate::{LandmarkAnnotator, MarkerStyle};
use fitroom::config::BlendSettings;
use fitroom::face_detection::{FaceBoundingBox, FaceDetectionModel};
use fitroom::face_landmarks::{FaceLandmarks, FaceLandmarksModel, NUM_FACE_LANDMARKS};
use fitroom::outfit::OutfitCompositor;
use fitroom::pose::{PoseEstimationModel, PoseKeypoints, NUM_POSE_LANDMARKS};
use fitroom::segmentation::{SegmentationMask, SegmentationModel};
use fitroom::{Error, Result};

struct StubDetector(Vec<FaceBoundingBox>);

impl FaceDetectionModel for StubDetector {
    fn run(&self, _image: &DynamicImage) -> Result<Vec<FaceBoundingBox>> {
        Ok(self.0.clone())
    }
}

/// Landmarks on a ring inside the face box, some of them deliberately outside the image.
struct RingLandmarks;

impl FaceLandmarksModel for RingLandmarks {
    fn run(&self, _image: &GrayImage, face: &FaceBoundingBox) -> Result<FaceLandmarks> {
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;
        let r = face.width * 0.6;
        let points = (0..NUM_FACE_LANDMARKS)
            .map(|i| {
                let t = i as f32 / NUM_FACE_LANDMARKS as f32 * std::f32::consts::TAU;
                Point2::new((cx + r * t.cos()) as i32, (cy + r * t.sin()) as i32)
            })
            .collect();
        FaceLandmarks::new(points)
    }
}

struct StubPose(Option<PoseKeypoints>);

impl PoseEstimationModel for StubPose {
    fn run(&self, _image: &RgbImage) -> Result<Option<PoseKeypoints>> {
        Ok(self.0.clone())
    }
}

/// Foreground is the left three quarters of the frame.
struct LeftSideSegmentation;

impl SegmentationModel for LeftSideSegmentation {
    fn run(&self, _image: &RgbImage) -> Result<SegmentationMask> {
        let mut probabilities = Array2::<f32>::zeros((8, 8));
        probabilities.slice_mut(ndarray::s![.., ..6]).fill(0.9);
        SegmentationMask::new(probabilities)
    }
}

fn portrait() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(120, 80, |x, y| {
        Rgb([(x * 2) as u8, (y * 3) as u8, 60])
    }))
}

fn standing_pose() -> PoseKeypoints {
    let mut points = vec![Point3::new(0.5, 0.5, 1.0); NUM_POSE_LANDMARKS];
    points[11] = Point3::new(0.625, 0.25, 1.0);
    points[12] = Point3::new(0.25, 0.25, 1.0);
    points[23] = Point3::new(0.625, 0.75, 1.0);
    points[24] = Point3::new(0.25, 0.75, 1.0);
    PoseKeypoints::new(points).unwrap()
}

fn compositor(pose: Option<PoseKeypoints>) -> OutfitCompositor<StubPose, LeftSideSegmentation> {
    OutfitCompositor::new(
        StubPose(pose),
        LeftSideSegmentation,
        BlendSettings::default(),
        0.5,
    )
}

fn annotator(faces: Vec<FaceBoundingBox>) -> LandmarkAnnotator<StubDetector, RingLandmarks> {
    LandmarkAnnotator::new(StubDetector(faces), RingLandmarks, MarkerStyle::default())
}

fn composite_to_file(
    compositor: &OutfitCompositor<StubPose, LeftSideSegmentation>,
    person: &DynamicImage,
    clothing: &DynamicImage,
    output: &Path,
) -> Result<()> {
    let result = compositor.composite(person, clothing)?;
    result.save(output)?;
    Ok(())
}

#[test]
fn annotator_without_faces_writes_identical_pixels() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.png");
    let output = dir.path().join("output.png");
    portrait().save(&input).unwrap();

    let summary = annotator(vec![]).annotate_file(&input, &output).unwrap();
    assert_eq!(summary.faces, 0);
    assert_eq!(summary.markers, 0);

    let written = image::open(&output).unwrap();
    assert_eq!(written.to_rgb8(), portrait().to_rgb8());
}

#[test]
fn annotator_draws_68_markers_per_face_within_bounds() {
    let faces = vec![
        FaceBoundingBox::new(10.0, 10.0, 30.0, 30.0, 0.95),
        FaceBoundingBox::new(95.0, 50.0, 30.0, 30.0, 0.9),
    ];
    let (annotated, summary) = annotator(faces).annotate(&portrait()).unwrap();

    assert_eq!(summary.faces, 2);
    assert_eq!(summary.markers, 2 * NUM_FACE_LANDMARKS);
    assert_eq!(annotated.dimensions(), portrait().dimensions());

    let green = annotated
        .to_rgb8()
        .pixels()
        .filter(|p| **p == Rgb([0, 255, 0]))
        .count();
    assert!(green > 0);
}

#[test]
fn annotator_is_deterministic() {
    let faces = vec![FaceBoundingBox::new(30.0, 20.0, 40.0, 40.0, 0.99)];
    let (first, _) = annotator(faces.clone()).annotate(&portrait()).unwrap();
    let (second, _) = annotator(faces).annotate(&portrait()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn compositor_without_pose_fails_and_writes_nothing() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("outfit.png");
    let clothing = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 255, 255])));

    let err = composite_to_file(&compositor(None), &portrait(), &clothing, &output).unwrap_err();
    assert!(matches!(err, Error::NoPoseDetected));
    assert_eq!(err.to_string(), "No pose detected in the human image");
    assert!(!output.exists());
}

#[test]
fn transparent_clothing_keeps_person_inside_silhouette() {
    let clothing = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 255, 0])));
    let result = compositor(Some(standing_pose()))
        .composite(&portrait(), &clothing)
        .unwrap();
    let person = portrait().to_rgb8();

    for (x, y, pixel) in result.enumerate_pixels() {
        if x < 80 {
            assert_eq!(pixel, person.get_pixel(x, y), "at ({x}, {y})");
        } else if x >= 100 {
            assert_eq!(*pixel, Rgb([0, 0, 0]), "at ({x}, {y})");
        }
    }
}

#[test]
fn garment_lands_between_shoulders_and_hips() {
    let clothing = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([0, 0, 255])));
    let result = compositor(Some(standing_pose()))
        .composite(&portrait(), &clothing)
        .unwrap();

    // torso centre is covered, the head region above the shoulders is not
    assert_eq!(result.get_pixel(52, 40)[2], 255);
    assert_eq!(result.get_pixel(52, 2), portrait().to_rgb8().get_pixel(52, 2));
}

#[test]
fn compositor_is_deterministic() {
    let clothing = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([200, 40, 40])));
    let first = compositor(Some(standing_pose()))
        .composite(&portrait(), &clothing)
        .unwrap();
    let second = compositor(Some(standing_pose()))
        .composite(&portrait(), &clothing)
        .unwrap();
    assert_eq!(first, second);
}
