//! End-to-end pipeline behavior with a hand-driven frame source and a paused clock

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vigil::{
    BindError, BindRequest, BoundingBox, DetectedObject, Detector, DetectorError, Frame,
    FrameMetadata, FrameSink, FrameSource, InlineBindingContext, InputImage, ObjectLabel,
    PipelineConfig, PipelineController, PipelineState, PixelFormat,
};

/// Frame source whose frames are pushed by the test
#[derive(Default)]
struct ManualSource {
    sink: Mutex<Option<FrameSink>>,
    /// Sink from the most recent bind, kept after unbind
    last_sink: Mutex<Option<FrameSink>>,
    binds: AtomicUsize,
    fail_bind: AtomicBool,
    releases: Arc<Mutex<HashMap<u64, usize>>>,
}

impl ManualSource {
    fn frame(&self, id: u64) -> Frame {
        let releases = self.releases.clone();
        Frame::new(
            id,
            Bytes::from(vec![0u8; 16]),
            PixelFormat::Rgba8,
            FrameMetadata {
                width: id as u32,
                height: 1,
                rotation_degrees: 90,
                timestamp_ns: id * 1_000_000,
            },
            Box::new(move |frame_id| {
                *releases.lock().entry(frame_id).or_insert(0) += 1;
                Ok(())
            }),
        )
    }

    /// Deliver frame `id` if bound, otherwise release it directly
    fn push(&self, id: u64) {
        let frame = self.frame(id);
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink.submit(frame),
            None => drop(frame),
        }
    }

    /// Deliver through a sink that may belong to a finished session
    fn push_stale(&self, id: u64) {
        let frame = self.frame(id);
        let sink = self.last_sink.lock().clone();
        match sink {
            Some(sink) => sink.submit(frame),
            None => drop(frame),
        }
    }

    fn release_counts(&self) -> HashMap<u64, usize> {
        self.releases.lock().clone()
    }

    fn is_bound(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl FrameSource for ManualSource {
    fn bind(&self, _request: &BindRequest, sink: FrameSink) -> Result<(), BindError> {
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(BindError::CameraUnavailable("lens cover closed".to_string()));
        }
        let mut slot = self.sink.lock();
        if slot.is_some() {
            return Err(BindError::AlreadyBound);
        }
        *self.last_sink.lock() = Some(sink.clone());
        *slot = Some(sink);
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unbind(&self) -> Result<(), BindError> {
        self.sink.lock().take();
        Ok(())
    }
}

/// Detector labeling each object with the frame width, which the source sets to
/// the frame id
struct SlowDetector {
    latency: Duration,
    calls: Arc<AtomicUsize>,
    fail_on: Vec<u32>,
    panic_on: Vec<u32>,
}

impl SlowDetector {
    fn new(latency_ms: u64, calls: Arc<AtomicUsize>) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            calls,
            fail_on: Vec::new(),
            panic_on: Vec::new(),
        }
    }
}

#[async_trait]
impl Detector for SlowDetector {
    async fn detect(&mut self, image: InputImage) -> Result<Vec<DetectedObject>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.fail_on.contains(&image.width) {
            return Err(DetectorError::Inference("tensor shape mismatch".to_string()));
        }
        if self.panic_on.contains(&image.width) {
            panic!("native crash on frame {}", image.width);
        }
        Ok(vec![DetectedObject {
            labels: vec![ObjectLabel::new(image.width.to_string(), 0.75, 0)],
            bounding_box: BoundingBox::new(4.0, 8.0, 64.0, 96.0),
            tracking_id: None,
        }])
    }
}

fn pipeline(source: Arc<ManualSource>, detector: SlowDetector) -> PipelineController {
    PipelineController::new(
        PipelineConfig::default(),
        source,
        Box::new(detector),
        Arc::new(InlineBindingContext),
    )
    .unwrap()
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_burst_while_busy_runs_one_inference() {
    let source = Arc::new(ManualSource::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = pipeline(source.clone(), SlowDetector::new(20, calls.clone()));
    let mut stream = controller.open_stream();

    controller.initialize().await.unwrap();
    controller.start().await.unwrap();

    source.push(1);
    settle().await;
    advance(5).await;
    source.push(2);
    advance(5).await;
    source.push(3);
    advance(20).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let batch = stream.try_next_batch().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].label, "1");
    assert!(stream.try_next_batch().is_none());

    let stats = controller.stats();
    assert_eq!(stats.frames_received, 3);
    assert_eq!(stats.frames_submitted, 1);
    assert_eq!(stats.frames_dropped_busy, 2);
    assert_eq!(stats.batches_published, 1);

    let releases = source.release_counts();
    assert_eq!(releases.len(), 3);
    assert!(releases.values().all(|count| *count == 1));
}

#[tokio::test(start_paused = true)]
async fn test_batches_follow_frame_order() {
    let source = Arc::new(ManualSource::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = pipeline(source.clone(), SlowDetector::new(2, calls));
    let mut stream = controller.open_stream();

    controller.initialize().await.unwrap();
    controller.start().await.unwrap();
    for id in 1..=5 {
        source.push(id);
        advance(10).await;
    }

    let mut labels = Vec::new();
    while let Some(batch) = stream.try_next_batch() {
        labels.push(batch[0].label.clone());
    }
    assert_eq!(labels, vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_tracking_id_is_minus_one() {
    let source = Arc::new(ManualSource::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = pipeline(source.clone(), SlowDetector::new(1, calls));
    let mut stream = controller.open_stream();

    controller.initialize().await.unwrap();
    controller.start().await.unwrap();
    source.push(7);
    advance(5).await;

    let batch = stream.try_next_batch().unwrap();
    assert_eq!(batch[0].tracking_id, -1);

    let json = serde_json::to_value(&batch).unwrap();
    assert_eq!(json[0]["trackingId"], -1);
    assert_eq!(json[0]["label"], "7");
    assert_eq!(json[0]["boundingBox"]["left"], 4.0);
    assert_eq!(json[0]["boundingBox"]["bottom"], 96.0);
    assert!((json[0]["confidence"].as_f64().unwrap() - 0.75).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_bind_failure_leaves_pipeline_idle() {
    let source = Arc::new(ManualSource::default());
    source.fail_bind.store(true, Ordering::SeqCst);
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = pipeline(source.clone(), SlowDetector::new(1, calls.clone()));
    let mut stream = controller.open_stream();

    controller.initialize().await.unwrap();
    let err = controller.handle_method("startDetection").await.unwrap_err();
    assert_eq!(err.code, "CAMERA_BIND_FAILED");
    assert_eq!(controller.state(), PipelineState::Idle);

    source.push(1);
    advance(5).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(stream.try_next_batch().is_none());
    assert_eq!(source.release_counts().get(&1), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_every_frame_released_once() {
    let source = Arc::new(ManualSource::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut detector = SlowDetector::new(10, calls);
    detector.fail_on = vec![2];
    detector.panic_on = vec![3];
    let controller = pipeline(source.clone(), detector);

    controller.initialize().await.unwrap();
    controller.start().await.unwrap();

    // Success, detector error, detector panic
    for id in 1..=3 {
        source.push(id);
        advance(15).await;
    }

    // Busy drop
    source.push(4);
    source.push(5);
    advance(15).await;

    // Lane aborted mid-inference
    source.push(6);
    settle().await;
    controller.stop().await.unwrap();
    advance(15).await;

    // Late frame from a source that kept delivering after stop
    source.push_stale(100);

    let releases = source.release_counts();
    for id in [1, 2, 3, 4, 5, 6, 100] {
        assert_eq!(releases.get(&id), Some(&1), "frame {} release count", id);
    }
    let stats = controller.stats();
    assert_eq!(stats.detection_failures, 2);
    assert_eq!(stats.frames_dropped_busy, 1);
    assert_eq!(stats.frames_rejected_inactive, 1);
    assert_eq!(stats.release_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_in_flight_result_and_ends_stream() {
    let source = Arc::new(ManualSource::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = pipeline(source.clone(), SlowDetector::new(50, calls.clone()));
    let mut stream = controller.open_stream();

    controller.initialize().await.unwrap();
    controller.start().await.unwrap();
    source.push(1);
    advance(10).await;
    controller.stop().await.unwrap();
    advance(60).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(stream.next_batch().await.is_none());
    assert_eq!(controller.stats().batches_published, 0);
    assert!(!source.is_bound());
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_uses_single_binding() {
    let source = Arc::new(ManualSource::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = pipeline(source.clone(), SlowDetector::new(1, calls.clone()));

    controller.initialize().await.unwrap();
    controller.start().await.unwrap();
    controller.stop().await.unwrap();
    controller.stop().await.unwrap();
    controller.start().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Running);
    assert_eq!(source.binds.load(Ordering::SeqCst), 2);
    assert!(source.is_bound());

    let mut stream = controller.open_stream();
    source.push(9);
    advance(5).await;
    assert_eq!(stream.try_next_batch().unwrap()[0].label, "9");

    controller.teardown().await.unwrap();
    assert_eq!(controller.state(), PipelineState::Uninitialized);
    assert!(!source.is_bound());
}

#[tokio::test(start_paused = true)]
async fn test_no_subscriber_never_blocks() {
    let source = Arc::new(ManualSource::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = pipeline(source.clone(), SlowDetector::new(1, calls.clone()));

    controller.initialize().await.unwrap();
    controller.start().await.unwrap();
    for id in 1..=3 {
        source.push(id);
        advance(5).await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let stats = controller.stats();
    assert_eq!(stats.batches_discarded, 3);
    assert_eq!(stats.batches_published, 0);
}

#[tokio::test(start_paused = true)]
async fn test_publishing_disabled() {
    let source = Arc::new(ManualSource::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let config = PipelineConfig {
        publish_detections: false,
        ..PipelineConfig::default()
    };
    let controller = PipelineController::new(
        config,
        source.clone(),
        Box::new(SlowDetector::new(1, calls.clone())),
        Arc::new(InlineBindingContext),
    )
    .unwrap();
    let mut stream = controller.open_stream();

    controller.initialize().await.unwrap();
    controller.start().await.unwrap();
    source.push(1);
    advance(5).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(stream.try_next_batch().is_none());
}
