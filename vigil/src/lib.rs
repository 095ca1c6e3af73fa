//! vigil: live object detection over a camera frame stream
//!
//! Frames from a [`FrameSource`] pass through a keep-only-latest
//! [`FrameAnalyzer`](processing::FrameAnalyzer), are run through a
//! [`Detector`], and the resulting batches are pushed to a single subscriber.
//! A [`PipelineController`] drives the lifecycle.

pub mod binding;
pub mod camera;
pub mod config;
pub mod control;
pub mod controller;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod processing;
pub mod stats;

pub use binding::{BindingContext, InlineBindingContext, ThreadBindingContext};
pub use camera::{BindRequest, FrameSource, SyntheticCamera};
pub use config::{CameraConfig, InferencePolicy, LensFacing, PipelineConfig, TrackingConfig};
pub use control::ControlCommand;
pub use controller::{PipelineController, PipelineState};
pub use detection::{BoundingBox, Detection, DetectionBatch};
pub use detector::{DetectedObject, Detector, ObjectLabel};
pub use error::{BindError, ControlError, DetectorError, PipelineError, ReleaseError};
pub use frame::{Frame, FrameMetadata, InputImage, PixelFormat};
pub use processing::{DetectionEvent, DetectionStream, FrameSink, Subscriber};
pub use stats::{PipelineStats, StatsSnapshot};
