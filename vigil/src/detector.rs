//! Object detector interface

use crate::detection::BoundingBox;
use crate::error::DetectorError;
use crate::frame::InputImage;
use async_trait::async_trait;

/// Classification label attached to a detected object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectLabel {
    pub text: String,
    pub confidence: f32,
    pub index: usize,
}

impl ObjectLabel {
    pub fn new(text: impl Into<String>, confidence: f32, index: usize) -> Self {
        Self {
            text: text.into(),
            confidence,
            index,
        }
    }
}

/// Raw detector output for one object, labels ordered by the detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub labels: Vec<ObjectLabel>,
    pub bounding_box: BoundingBox,
    pub tracking_id: Option<i64>,
}

/// Inference backend.
///
/// Implementations are driven from a single analysis lane and are never called
/// concurrently, so they do not need to be re-entrant.
#[async_trait]
pub trait Detector: Send {
    async fn detect(&mut self, image: InputImage) -> Result<Vec<DetectedObject>, DetectorError>;

    /// Whether results carry tracking ids that are stable across frames
    fn supports_tracking(&self) -> bool {
        false
    }
}

#[async_trait]
impl<D: Detector + ?Sized> Detector for Box<D> {
    async fn detect(&mut self, image: InputImage) -> Result<Vec<DetectedObject>, DetectorError> {
        (**self).detect(image).await
    }

    fn supports_tracking(&self) -> bool {
        (**self).supports_tracking()
    }
}
