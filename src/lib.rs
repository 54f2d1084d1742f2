//! Face landmark annotation and virtual outfit compositing on top of ONNX and
//! dlib models.

pub mod annotate;
pub mod compositing;
pub mod config;
pub mod error;
pub mod face_detection;
pub mod face_landmarks;
pub mod geometry;
pub mod onnx;
pub mod outfit;
pub mod pose;
pub mod segmentation;

pub use error::{Error, Result};

/// Initialise `env_logger`, honouring `RUST_LOG` and defaulting to warnings.
/// Logs go to stderr so stdout stays free for user-facing messages.
pub fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.target(env_logger::Target::Stderr);

    if builder.try_init().is_err() {
        // already initialised
    }
}
