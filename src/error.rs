use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("onnx runtime error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("failed to read anchors: {0}")]
    Anchors(#[from] ndarray_npy::ReadNpyError),

    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),

    #[error("No pose detected in the human image")]
    NoPoseDetected,

    #[error("cannot build perspective transform: {0}")]
    DegenerateTransform(String),
}

pub type Result<T> = std::result::Result<T, Error>;
