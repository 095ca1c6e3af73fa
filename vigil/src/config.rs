//! Configuration for vigil

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Whether inference runs when nobody is listening for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferencePolicy {
    /// Analyze every accepted frame, discarding output if unsubscribed
    Always,
    /// Skip inference entirely while no subscriber is attached
    WhenSubscribed,
}

/// Which physical camera to bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensFacing {
    Back,
    Front,
}

/// Camera settings passed to the frame source on bind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub lens_facing: LensFacing,
    /// Requested analysis resolution (width, height)
    pub resolution: (u32, u32),
    /// Target frame rate (frames per second)
    pub frame_rate: u32,
    /// Keep the preview use-case bound alongside analysis
    pub preview: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            lens_facing: LensFacing::Back,
            resolution: (640, 480),
            frame_rate: 30,
            preview: true,
        }
    }
}

/// IoU tracker settings used by [`crate::processing::TrackingDetector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Frames a track survives without a matching detection
    pub max_age: u32,
    pub iou_threshold: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            iou_threshold: 0.3,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deliver batches to the subscriber; when false the pipeline analyzes
    /// frames but never emits events
    pub publish_detections: bool,
    pub inference_policy: InferencePolicy,
    pub camera: CameraConfig,
    /// Assign tracking ids when the detector does not provide them
    pub tracking: Option<TrackingConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publish_detections: true,
            inference_policy: InferencePolicy::Always,
            camera: CameraConfig::default(),
            tracking: None,
        }
    }
}

impl PipelineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let camera = &self.camera;
        if camera.frame_rate == 0 || camera.frame_rate > 240 {
            return Err("Frame rate must be between 1 and 240".to_string());
        }

        if camera.resolution.0 == 0 || camera.resolution.1 == 0 {
            return Err("Resolution must be non-zero".to_string());
        }

        if camera.resolution.0 > 7680 || camera.resolution.1 > 4320 {
            return Err("Resolution too large (max 8K)".to_string());
        }

        if let Some(tracking) = &self.tracking {
            if !tracking.iou_threshold.is_finite()
                || tracking.iou_threshold < 0.0
                || tracking.iou_threshold > 1.0
            {
                return Err("IoU threshold must be within [0, 1]".to_string());
            }
            if tracking.max_age == 0 {
                return Err("Tracker max_age must be at least 1".to_string());
            }
        }

        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig =
            toml::from_str(raw).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate().map_err(PipelineError::Config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }
}
