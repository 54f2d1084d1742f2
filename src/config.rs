//! Runtime settings shared by both binaries.
//!
//! Settings are read from a JSON file when one is available and fall back to
//! built-in defaults otherwise. Every section is `#[serde(default)]`, so a
//! settings file only needs the keys it wants to change.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::face_detection::FaceBoundingBox;

/// Environment variable pointing at a settings file.
pub const CONFIG_ENV: &str = "FITROOM_CONFIG";
/// Environment variable overriding the directory model files are resolved against.
pub const MODEL_DIR_ENV: &str = "FITROOM_MODEL_DIR";
/// Settings file picked up from the executable's directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "fitroom.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory model paths are resolved against. Defaults to the executable's directory.
    pub model_dir: Option<PathBuf>,
    pub face_detection: FaceDetectionSettings,
    pub face_landmarks: FaceLandmarkSettings,
    pub markers: MarkerSettings,
    pub pose: PoseSettings,
    pub segmentation: SegmentationSettings,
    pub blending: BlendSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceDetectionSettings {
    pub model: PathBuf,
    /// Optional `.npy` file with precomputed SSD anchors (N x 4).
    pub anchors: Option<PathBuf>,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for FaceDetectionSettings {
    fn default() -> Self {
        Self {
            model: PathBuf::from("face_detection_back_256x256_float32.onnx"),
            anchors: None,
            score_threshold: 0.75,
            nms_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceLandmarkSettings {
    /// dlib shape predictor, `.dat` or `.dat.bz2`.
    pub model: PathBuf,
    pub box_adjustment: BoxAdjustment,
}

impl Default for FaceLandmarkSettings {
    fn default() -> Self {
        Self {
            model: PathBuf::from("shape_predictor_68_face_landmarks.dat"),
            box_adjustment: BoxAdjustment::default(),
        }
    }
}

/// Reframes a detector box to the framing the landmark model was trained on:
/// scaled about its centre by `scale`, then moved down by `offset_y` box heights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxAdjustment {
    pub scale: f32,
    pub offset_y: f32,
}

impl Default for BoxAdjustment {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset_y: 0.0,
        }
    }
}

impl BoxAdjustment {
    pub fn apply(&self, face: &FaceBoundingBox) -> FaceBoundingBox {
        face.reframed(self.scale, self.offset_y)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSettings {
    pub radius: i32,
    pub color: [u8; 3],
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self {
            radius: 2,
            color: [0, 255, 0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSettings {
    pub model: PathBuf,
    pub min_detection_confidence: f32,
}

impl Default for PoseSettings {
    fn default() -> Self {
        Self {
            model: PathBuf::from("pose_landmark_heavy.onnx"),
            min_detection_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    pub model: PathBuf,
    /// Probabilities strictly above this value count as foreground.
    pub threshold: f32,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            model: PathBuf::from("selfie_segmentation_landscape.onnx"),
            threshold: 0.5,
        }
    }
}

/// Tuning values for the clothing blend. Kernel sizes follow the OpenCV
/// convention and are turned into a Gaussian sigma with [`kernel_sigma`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendSettings {
    pub alpha_blur_kernel: u32,
    pub shadow_blur_kernel: u32,
    pub shadow_strength: f32,
}

impl Default for BlendSettings {
    fn default() -> Self {
        Self {
            alpha_blur_kernel: 15,
            shadow_blur_kernel: 25,
            shadow_strength: 0.4,
        }
    }
}

impl BlendSettings {
    pub fn alpha_sigma(&self) -> f32 {
        kernel_sigma(self.alpha_blur_kernel)
    }

    pub fn shadow_sigma(&self) -> f32 {
        kernel_sigma(self.shadow_blur_kernel)
    }
}

/// Sigma OpenCV derives for a Gaussian kernel of size `ksize` when none is given.
/// A kernel of 0 or 1 means "no blur" and yields 0.
pub fn kernel_sigma(ksize: u32) -> f32 {
    if ksize <= 1 {
        return 0.0;
    }
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

impl Settings {
    /// Load settings from `FITROOM_CONFIG`, then `fitroom.json` beside the
    /// executable, then fall back to defaults.
    pub fn load() -> Result<Self> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::load_from_path(PathBuf::from(path));
        }

        let beside_exe = executable_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE));
        match beside_exe {
            Some(path) if path.exists() => Self::load_from_path(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Directory relative model paths are resolved against.
    pub fn model_dir(&self) -> PathBuf {
        if let Some(dir) = env::var_os(MODEL_DIR_ENV) {
            return PathBuf::from(dir);
        }
        if let Some(dir) = &self.model_dir {
            return dir.clone();
        }
        executable_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn resolve_model(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.model_dir().join(path)
        }
    }
}

fn executable_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}
