//! Frame admission and the analysis lane
//!
//! Frames arrive on the source's thread and are either handed to the lane or
//! released on the spot. The lane runs one detection at a time, keeping only
//! the latest frame: while a detection is in flight every new frame is
//! dropped.

use crate::config::InferencePolicy;
use crate::detection::DetectionBatch;
use crate::detector::Detector;
use crate::error::DetectorError;
use crate::frame::Frame;
use crate::processing::publisher::ResultPublisher;
use crate::stats::PipelineStats;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Detector shared between successive lanes; the lock keeps a lane that is
/// being torn down from overlapping with its replacement.
pub type SharedDetector = Arc<tokio::sync::Mutex<Box<dyn Detector>>>;

/// State of one analysis lane. A fresh lane is created after every shutdown,
/// so flags of an aborted lane can never leak into the next one.
struct Lane {
    active: AtomicBool,
    busy: AtomicBool,
    tx: mpsc::Sender<Frame>,
}

impl Lane {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Clears the busy flag when a frame leaves the lane, including on abort
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct FrameAnalyzer {
    policy: InferencePolicy,
    lane: RwLock<Option<Arc<Lane>>>,
    publisher: Arc<ResultPublisher>,
    stats: Arc<PipelineStats>,
}

impl FrameAnalyzer {
    pub fn new(
        policy: InferencePolicy,
        publisher: Arc<ResultPublisher>,
        stats: Arc<PipelineStats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            policy,
            lane: RwLock::new(None),
            publisher,
            stats,
        })
    }

    /// Handle given to the frame source
    pub fn sink(self: &Arc<Self>) -> FrameSink {
        FrameSink {
            analyzer: self.clone(),
        }
    }

    /// Create a new, inactive lane and spawn its task on the current runtime.
    /// Any previous lane is shut down first.
    pub fn spawn_lane(self: &Arc<Self>, detector: SharedDetector) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(1);
        let lane = Arc::new(Lane {
            active: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            tx,
        });

        if let Some(previous) = self.lane.write().replace(lane.clone()) {
            previous.active.store(false, Ordering::Release);
        }

        let analyzer = self.clone();
        debug!("Spawning analysis lane");
        tokio::spawn(async move { analyzer.run_lane(lane, rx, detector).await })
    }

    pub fn has_lane(&self) -> bool {
        self.lane.read().is_some()
    }

    /// Start accepting frames. Returns false when no lane exists.
    pub fn activate(&self) -> bool {
        match self.lane.read().as_ref() {
            Some(lane) => {
                lane.active.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Stop accepting frames and suppress publishing of in-flight results.
    /// No batch reaches the subscriber once this returns.
    pub fn deactivate(&self) {
        if let Some(lane) = self.lane.read().as_ref() {
            lane.active.store(false, Ordering::Release);
        }
        self.publisher.quiesce();
    }

    /// Deactivate and forget the current lane. The caller aborts its task.
    pub fn shutdown_lane(&self) {
        if let Some(lane) = self.lane.write().take() {
            lane.active.store(false, Ordering::Release);
            debug!("Analysis lane shut down");
        }
    }

    pub fn is_active(&self) -> bool {
        self.lane.read().as_ref().map_or(false, |lane| lane.is_active())
    }

    /// Whether a detection is currently in flight
    pub fn is_busy(&self) -> bool {
        self.lane
            .read()
            .as_ref()
            .map_or(false, |lane| lane.busy.load(Ordering::Acquire))
    }

    /// Admit or release one frame. Never blocks.
    pub fn on_frame(&self, frame: Frame) {
        self.stats.record_received();

        let current = self.lane.read().clone();
        let lane = match current {
            Some(lane) if lane.is_active() => lane,
            _ => {
                trace!("Analyzer inactive, releasing frame {}", frame.id());
                self.stats.record_rejected_inactive();
                self.release(frame);
                return;
            }
        };

        if self.policy == InferencePolicy::WhenSubscribed && !self.publisher.has_subscriber() {
            trace!("No subscriber, skipping frame {}", frame.id());
            self.stats.record_skipped_unsubscribed();
            self.release(frame);
            return;
        }

        if lane
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Analyzer busy, dropping frame {}", frame.id());
            self.stats.record_dropped_busy();
            self.release(frame);
            return;
        }

        match lane.tx.try_send(frame) {
            Ok(()) => self.stats.record_submitted(),
            Err(e) => {
                lane.busy.store(false, Ordering::Release);
                let frame = e.into_inner();
                debug!("Analysis lane closed, releasing frame {}", frame.id());
                self.stats.record_rejected_inactive();
                self.release(frame);
            }
        }
    }

    async fn run_lane(
        self: Arc<Self>,
        lane: Arc<Lane>,
        mut rx: mpsc::Receiver<Frame>,
        detector: SharedDetector,
    ) {
        info!("Analysis lane started");
        while let Some(frame) = rx.recv().await {
            let _busy = BusyGuard(&lane.busy);
            self.analyze(&lane, frame, &detector).await;
        }
        info!("Analysis lane finished");
    }

    async fn analyze(&self, lane: &Lane, frame: Frame, detector: &SharedDetector) {
        let frame_id = frame.id();
        let timestamp_ns = frame.metadata().timestamp_ns;
        let image = frame.input_image();

        let outcome = {
            let mut detector = detector.lock().await;
            AssertUnwindSafe(detector.detect(image))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(DetectorError::Panicked(panic_message(panic.as_ref())))
                })
        };

        self.release(frame);

        match outcome {
            Ok(objects) => {
                let batch = DetectionBatch::from_objects(frame_id, timestamp_ns, &objects);
                trace!("Frame {} yielded {} detections", frame_id, batch.len());
                self.publisher.publish_if(&batch, || lane.is_active());
            }
            Err(e) => {
                error!("Detection failed for frame {}: {}", frame_id, e);
                self.stats.record_detection_failure();
            }
        }
    }

    fn release(&self, frame: Frame) {
        if let Err(e) = frame.release() {
            warn!("{}", e);
            self.stats.record_release_failure();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Entry point through which a frame source delivers frames
#[derive(Clone)]
pub struct FrameSink {
    analyzer: Arc<FrameAnalyzer>,
}

impl fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSink")
            .field("active", &self.analyzer.is_active())
            .finish()
    }
}

impl FrameSink {
    pub fn submit(&self, frame: Frame) {
        self.analyzer.on_frame(frame);
    }
}
