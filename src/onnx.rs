//! Helpers shared by the ONNX-backed models: session setup, input tensors
//! and output extraction.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use image::{imageops, Rgb, RgbImage};
use log::info;
use ndarray::{Array, ArrayD, CowArray};
use ort::tensor::OrtOwnedTensor;
use ort::{Environment, ExecutionProvider, Session, SessionBuilder, Value};

use crate::error::Result;

pub fn environment(name: &str) -> Result<Arc<Environment>> {
    let environment = Environment::builder()
        .with_name(name)
        .with_execution_providers([ExecutionProvider::CPU(Default::default())])
        .build()?
        .into_arc();
    Ok(environment)
}

pub fn load_session(environment: &Arc<Environment>, model_path: &Path) -> Result<Session> {
    info!("Loading model {}", model_path.display());
    let session = SessionBuilder::new(environment)?
        .with_intra_threads(1)?
        .with_model_from_file(model_path)?;
    Ok(session)
}

/// Feed a single NHWC image tensor through `session` and return every output as an owned array.
pub fn run(session: &Session, image: &RgbImage, range: (f32, f32)) -> Result<Vec<ArrayD<f32>>> {
    let array: CowArray<_, _> = image_to_nhwc(image, range)?.into();

    let inputs = vec![Value::from_array(session.allocator(), &array)?];
    let outputs: Vec<Value> = session.run(inputs)?;

    let mut results = Vec::with_capacity(outputs.len());
    for output in outputs.iter() {
        let tensor: OrtOwnedTensor<f32, _> = output.try_extract()?;
        let view = tensor.view();
        results.push(view.deref().to_owned());
    }
    Ok(results)
}

/// Convert an RGB image to a `(1, height, width, 3)` tensor with values scaled into `range`.
pub fn image_to_nhwc(image: &RgbImage, range: (f32, f32)) -> Result<ArrayD<f32>> {
    let (low, high) = range;
    let scale = (high - low) / 255.0;
    let data: Vec<f32> = image
        .pixels()
        .flat_map(|p| p.0)
        .map(|p| p as f32 * scale + low)
        .collect();

    let array = Array::from_shape_vec(
        (1, image.height() as usize, image.width() as usize, 3),
        data,
    )?
    .into_dyn();
    Ok(array)
}

/// Placement of a source image inside a square, zero-padded model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub size: u32,
}

impl Letterbox {
    /// Map a coordinate in the letterboxed square (pixels) back to source pixels.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize `image` to fit a `size` x `size` square, keeping its aspect ratio
/// and centring it on a black canvas.
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (width, height) = (image.width().max(1), image.height().max(1));
    let scale = size as f32 / width.max(height) as f32;
    let resized_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let resized_h = ((height as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(
        image,
        resized_w,
        resized_h,
        imageops::FilterType::Triangle,
    );

    let pad_x = (size - resized_w) / 2;
    let pad_y = (size - resized_h) / 2;
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([0, 0, 0]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            size,
        },
    )
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
