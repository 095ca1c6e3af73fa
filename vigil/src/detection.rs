//! Detection data model

use crate::detector::DetectedObject;
use tracing::warn;

/// Label reported when the detector could not classify an object
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Axis-aligned box in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.right.is_finite()
            && self.bottom.is_finite()
    }

    /// Returns a box with `left <= right` and `top <= bottom`, or `None` if any
    /// coordinate is not finite.
    pub fn normalized(&self) -> Option<Self> {
        if !self.is_finite() {
            return None;
        }
        Some(Self {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        })
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union, 0.0 for degenerate or invalid boxes
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        if !self.is_finite() || !other.is_finite() {
            return 0.0;
        }

        let inter_left = self.left.max(other.left);
        let inter_top = self.top.max(other.top);
        let inter_right = self.right.min(other.right);
        let inter_bottom = self.bottom.min(other.bottom);

        if inter_right <= inter_left || inter_bottom <= inter_top {
            return 0.0;
        }

        let inter_area = (inter_right - inter_left) * (inter_bottom - inter_top);
        let union_area = self.area() + other.area() - inter_area;
        if union_area <= 0.0 || !union_area.is_finite() {
            return 0.0;
        }

        let iou = inter_area / union_area;
        if iou.is_finite() && (0.0..=1.0).contains(&iou) {
            iou
        } else {
            0.0
        }
    }
}

/// One recognized object
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Always within [0, 1]
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    /// Present only when the detector tracks objects across frames
    pub tracking_id: Option<i64>,
}

impl Detection {
    /// Build a detection from raw detector output.
    ///
    /// The top label wins; unlabeled objects become [`UNKNOWN_LABEL`] with zero
    /// confidence. Returns `None` when the bounding box is not finite.
    pub fn from_object(object: &DetectedObject) -> Option<Self> {
        let bounding_box = object.bounding_box.normalized()?;
        let (label, confidence) = match object.labels.first() {
            Some(top) => (top.text.clone(), top.confidence),
            None => (UNKNOWN_LABEL.to_string(), 0.0),
        };
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Some(Self {
            label,
            confidence,
            bounding_box,
            tracking_id: object.tracking_id,
        })
    }
}

/// Detections for a single frame, in detector order
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBatch {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn from_objects(frame_id: u64, timestamp_ns: u64, objects: &[DetectedObject]) -> Self {
        let mut detections = Vec::with_capacity(objects.len());
        for object in objects {
            match Detection::from_object(object) {
                Some(detection) => detections.push(detection),
                None => warn!(
                    "Skipping object with invalid bounding box {:?} in frame {}",
                    object.bounding_box, frame_id
                ),
            }
        }

        Self {
            frame_id,
            timestamp_ns,
            detections,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ObjectLabel;

    fn object(labels: Vec<ObjectLabel>, bbox: BoundingBox) -> DetectedObject {
        DetectedObject {
            labels,
            bounding_box: bbox,
            tracking_id: None,
        }
    }

    #[test]
    fn test_normalized_swaps_edges() {
        let bbox = BoundingBox::new(50.0, 40.0, 10.0, 5.0).normalized().unwrap();
        assert_eq!(bbox, BoundingBox::new(10.0, 5.0, 50.0, 40.0));
    }

    #[test]
    fn test_normalized_rejects_non_finite() {
        assert!(BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0).normalized().is_none());
        assert!(BoundingBox::new(0.0, 0.0, f32::INFINITY, 1.0).normalized().is_none());
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(10.0, 10.0, 60.0, 60.0);
        assert!((a.iou(&a) - 1.0).abs() < 0.001);

        let far = BoundingBox::new(200.0, 200.0, 250.0, 250.0);
        assert_eq!(a.iou(&far), 0.0);

        let partial = BoundingBox::new(30.0, 30.0, 80.0, 80.0);
        let iou = a.iou(&partial);
        assert!(iou > 0.0 && iou < 1.0);

        let invalid = BoundingBox::new(f32::NAN, 10.0, 60.0, 60.0);
        assert_eq!(a.iou(&invalid), 0.0);
    }

    #[test]
    fn test_from_object_uses_top_label() {
        let obj = object(
            vec![
                ObjectLabel::new("Food", 0.8, 2),
                ObjectLabel::new("Plant", 0.4, 4),
            ],
            BoundingBox::new(1.0, 2.0, 3.0, 4.0),
        );
        let detection = Detection::from_object(&obj).unwrap();
        assert_eq!(detection.label, "Food");
        assert!((detection.confidence - 0.8).abs() < f32::EPSILON);
        assert_eq!(detection.tracking_id, None);
    }

    #[test]
    fn test_from_object_without_labels_is_unknown() {
        let obj = object(vec![], BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        let detection = Detection::from_object(&obj).unwrap();
        assert_eq!(detection.label, UNKNOWN_LABEL);
        assert_eq!(detection.confidence, 0.0);
    }

    #[test]
    fn test_from_object_clamps_confidence() {
        let obj = object(
            vec![ObjectLabel::new("Home good", 1.7, 1)],
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        );
        assert_eq!(Detection::from_object(&obj).unwrap().confidence, 1.0);

        let obj = object(
            vec![ObjectLabel::new("Place", f32::NAN, 3)],
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        );
        assert_eq!(Detection::from_object(&obj).unwrap().confidence, 0.0);
    }

    #[test]
    fn test_batch_keeps_detector_order_and_skips_invalid() {
        let objects = vec![
            object(vec![ObjectLabel::new("a", 0.2, 0)], BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            object(vec![], BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0)),
            object(vec![ObjectLabel::new("b", 0.9, 0)], BoundingBox::new(0.0, 0.0, 2.0, 2.0)),
        ];
        let batch = DetectionBatch::from_objects(5, 100, &objects);
        assert_eq!(batch.frame_id, 5);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.detections[0].label, "a");
        assert_eq!(batch.detections[1].label, "b");
    }

    #[test]
    fn test_empty_batch() {
        let batch = DetectionBatch::from_objects(1, 0, &[]);
        assert!(batch.is_empty());
    }
}
