//! Single-subscriber result publishing

use crate::detection::{Detection, DetectionBatch};
use crate::stats::PipelineStats;
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Tracking id reported when the detector did not assign one
pub const NO_TRACKING_ID: i64 = -1;

/// Batches buffered for a stream consumer before new ones are dropped
const STREAM_BUFFER_SIZE: usize = 64;

/// Wire form of a bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxEvent {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

/// Wire form of a detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub label: String,
    pub confidence: f64,
    pub bounding_box: BoundingBoxEvent,
    pub tracking_id: i64,
}

impl From<&Detection> for DetectionEvent {
    fn from(detection: &Detection) -> Self {
        let bbox = &detection.bounding_box;
        Self {
            label: detection.label.clone(),
            confidence: detection.confidence as f64,
            bounding_box: BoundingBoxEvent {
                left: bbox.left as f64,
                top: bbox.top as f64,
                right: bbox.right as f64,
                bottom: bbox.bottom as f64,
            },
            tracking_id: detection.tracking_id.unwrap_or(NO_TRACKING_ID),
        }
    }
}

/// Translate a batch into the event delivered to subscribers
pub fn batch_to_events(batch: &DetectionBatch) -> Vec<DetectionEvent> {
    batch.detections.iter().map(DetectionEvent::from).collect()
}

/// Receiver of published detection batches
pub trait Subscriber: Send + Sync {
    fn on_batch(&self, events: Vec<DetectionEvent>);

    /// No further batches will be delivered to this subscriber
    fn on_end_of_stream(&self);
}

/// Handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber>,
}

/// Pushes detection batches to at most one subscriber.
///
/// Deliveries run under the registration read lock, so swapping or clearing
/// the subscriber waits for an in-flight publish and every batch reaches
/// exactly one subscriber in full.
pub struct ResultPublisher {
    enabled: bool,
    slot: RwLock<Option<Registration>>,
    next_id: AtomicU64,
    stats: Arc<PipelineStats>,
}

impl ResultPublisher {
    pub fn new(enabled: bool, stats: Arc<PipelineStats>) -> Self {
        Self {
            enabled,
            slot: RwLock::new(None),
            next_id: AtomicU64::new(1),
            stats,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register `subscriber`, ending the stream of any previous one
    pub fn set_subscriber(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let previous = {
            let mut slot = self.slot.write();
            slot.replace(Registration { id, subscriber })
        };
        if let Some(previous) = previous {
            debug!("Subscriber {:?} replaced by {:?}", previous.id, id);
            previous.subscriber.on_end_of_stream();
        }
        info!("Subscriber {:?} attached", id);
        id
    }

    /// Drop the current registration without notifying it
    pub fn clear_subscriber(&self) -> bool {
        let removed = self.slot.write().take();
        if let Some(registration) = &removed {
            info!("Subscriber {:?} detached", registration.id);
        }
        removed.is_some()
    }

    /// Drop the registration only if it is still `id`
    pub fn clear_if(&self, id: SubscriptionId) -> bool {
        let mut slot = self.slot.write();
        if slot.as_ref().map(|r| r.id) == Some(id) {
            *slot = None;
            info!("Subscriber {:?} detached", id);
            true
        } else {
            false
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Deliver `batch` to the current subscriber; returns whether it was delivered.
    ///
    /// Never blocks and never fails: without a subscriber, or with publishing
    /// disabled, the batch is discarded.
    pub fn publish(&self, batch: &DetectionBatch) -> bool {
        self.publish_if(batch, || true)
    }

    /// Like [`publish`](Self::publish), but `admit` is checked under the
    /// registration lock. A caller that flips the condition and then calls
    /// [`quiesce`](Self::quiesce) sees no delivery afterwards.
    ///
    /// A subscriber that panics is detached and the batch counts as discarded.
    pub fn publish_if(&self, batch: &DetectionBatch, admit: impl Fn() -> bool) -> bool {
        if !self.enabled {
            trace!("Publishing disabled, discarding batch for frame {}", batch.frame_id);
            self.stats.record_discarded();
            return false;
        }

        let faulty = {
            let slot = self.slot.read();
            let registration = match slot.as_ref() {
                Some(registration) if admit() => registration,
                Some(_) => {
                    trace!("Publish refused, discarding batch for frame {}", batch.frame_id);
                    self.stats.record_discarded();
                    return false;
                }
                None => {
                    trace!("No subscriber, discarding batch for frame {}", batch.frame_id);
                    self.stats.record_discarded();
                    return false;
                }
            };

            let events = batch_to_events(batch);
            let subscriber = &registration.subscriber;
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_batch(events))) {
                Ok(()) => {
                    self.stats.record_published();
                    return true;
                }
                Err(_) => registration.id,
            }
        };

        error!("Subscriber {:?} panicked, detaching it", faulty);
        self.clear_if(faulty);
        self.stats.record_discarded();
        false
    }

    /// Wait for any in-flight delivery to finish
    pub fn quiesce(&self) {
        drop(self.slot.write());
    }

    /// Tell the current subscriber the stream is over, then clear it
    pub fn end_stream(&self) {
        let removed = self.slot.write().take();
        if let Some(registration) = removed {
            registration.subscriber.on_end_of_stream();
            info!("Stream ended for subscriber {:?}", registration.id);
        }
    }

    /// Register a channel-backed subscriber and return its receiving end.
    ///
    /// Dropping the returned stream detaches it.
    pub fn open_stream(self: &Arc<Self>) -> DetectionStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER_SIZE);
        let subscriber = Arc::new(ChannelSubscriber {
            sender: Mutex::new(Some(tx)),
        });
        let id = self.set_subscriber(subscriber);
        DetectionStream {
            id,
            receiver: rx,
            publisher: Arc::downgrade(self),
        }
    }
}

struct ChannelSubscriber {
    sender: Mutex<Option<mpsc::Sender<Vec<DetectionEvent>>>>,
}

impl Subscriber for ChannelSubscriber {
    fn on_batch(&self, events: Vec<DetectionEvent>) {
        if let Some(sender) = self.sender.lock().as_ref() {
            match sender.try_send(events) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Detection stream full, dropping batch");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Detection stream receiver gone");
                }
            }
        }
    }

    fn on_end_of_stream(&self) {
        self.sender.lock().take();
    }
}

/// Live stream of detection events.
///
/// Yields one `Vec<DetectionEvent>` per analyzed frame and ends after the
/// pipeline stops or another subscriber takes over.
pub struct DetectionStream {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Vec<DetectionEvent>>,
    publisher: Weak<ResultPublisher>,
}

impl DetectionStream {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next batch; `None` once the stream has ended
    pub async fn next_batch(&mut self) -> Option<Vec<DetectionEvent>> {
        self.receiver.recv().await
    }

    /// Take an already delivered batch without waiting
    pub fn try_next_batch(&mut self) -> Option<Vec<DetectionEvent>> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for DetectionStream {
    type Item = Vec<DetectionEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for DetectionStream {
    fn drop(&mut self) {
        if let Some(publisher) = self.publisher.upgrade() {
            publisher.clear_if(self.id);
        }
    }
}
