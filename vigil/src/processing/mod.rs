//! Frame processing: admission, tracking and result publishing

pub mod analyzer;
pub mod publisher;
pub mod tracker;

pub use analyzer::{FrameAnalyzer, FrameSink, SharedDetector};
pub use publisher::{
    batch_to_events, BoundingBoxEvent, DetectionEvent, DetectionStream, ResultPublisher,
    Subscriber, SubscriptionId, NO_TRACKING_ID,
};
pub use tracker::{ObjectTracker, TrackingDetector};
