//! Pipeline lifecycle
//!
//! The controller owns the frame analyzer, the analysis lane task and the
//! binding between frame source and analyzer. Control operations are
//! serialized; frames keep flowing on the source's own thread.

use crate::binding::BindingContext;
use crate::camera::{BindRequest, FrameSource};
use crate::config::PipelineConfig;
use crate::control::ControlCommand;
use crate::detector::Detector;
use crate::error::{BindError, ControlError, PipelineError};
use crate::processing::{
    DetectionStream, FrameAnalyzer, ResultPublisher, SharedDetector, Subscriber, SubscriptionId,
    TrackingDetector,
};
use crate::stats::{PipelineStats, StatsSnapshot};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`PipelineController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Idle,
    Running,
    Stopping,
}

/// Resources owned by control operations, guarded by the control mutex
#[derive(Default)]
struct ControlSlot {
    lane_task: Option<JoinHandle<()>>,
    /// Set before a bind is issued and cleared only by a confirmed unbind or a
    /// failed bind, so a cancelled start still gets cleaned up.
    source_bound: bool,
}

/// Rolls a `start` back to idle unless the bind result was committed
struct PendingBind<'a> {
    controller: &'a PipelineController,
    committed: bool,
}

impl Drop for PendingBind<'_> {
    fn drop(&mut self) {
        if !self.committed {
            warn!("Start abandoned before the camera bind completed");
            self.controller.analyzer.deactivate();
            self.controller.set_state(PipelineState::Idle);
        }
    }
}

pub struct PipelineController {
    config: PipelineConfig,
    state: RwLock<PipelineState>,
    /// Serializes control operations
    control: Mutex<ControlSlot>,
    source: Arc<dyn FrameSource>,
    binding: Arc<dyn BindingContext>,
    detector: SharedDetector,
    analyzer: Arc<FrameAnalyzer>,
    publisher: Arc<ResultPublisher>,
    stats: Arc<PipelineStats>,
}

impl PipelineController {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn FrameSource>,
        detector: Box<dyn Detector>,
        binding: Arc<dyn BindingContext>,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;

        let detector: Box<dyn Detector> = match &config.tracking {
            Some(tracking) if !detector.supports_tracking() => {
                debug!("Wrapping detector with IoU tracker");
                Box::new(TrackingDetector::new(detector, tracking))
            }
            _ => detector,
        };

        let stats = Arc::new(PipelineStats::new());
        let publisher = Arc::new(ResultPublisher::new(config.publish_detections, stats.clone()));
        let analyzer = FrameAnalyzer::new(config.inference_policy, publisher.clone(), stats.clone());

        Ok(Self {
            config,
            state: RwLock::new(PipelineState::Uninitialized),
            control: Mutex::new(ControlSlot::default()),
            source,
            binding,
            detector: Arc::new(Mutex::new(detector)),
            analyzer,
            publisher,
            stats,
        })
    }

    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Arc<ResultPublisher> {
        &self.publisher
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Register a subscriber, replacing any previous one
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.publisher.set_subscriber(subscriber)
    }

    /// Subscribe through an async stream of batches
    pub fn open_stream(&self) -> DetectionStream {
        self.publisher.open_stream()
    }

    fn set_state(&self, state: PipelineState) {
        let mut current = self.state.write();
        if *current != state {
            debug!("Pipeline state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Allocate the analysis lane. Idempotent once initialized.
    pub async fn initialize(&self) -> Result<(), PipelineError> {
        let mut control = self.control.lock().await;
        if self.state() != PipelineState::Uninitialized {
            debug!("Pipeline already initialized");
            return Ok(());
        }

        control.lane_task = Some(self.analyzer.spawn_lane(self.detector.clone()));
        self.set_state(PipelineState::Idle);
        info!("Pipeline initialized");
        Ok(())
    }

    /// Bind the frame source to the analyzer and begin detection. When already
    /// running the source is rebound.
    ///
    /// Cancel-safe: dropping the future before the bind completes leaves the
    /// pipeline idle, and the next `start`, `stop` or `teardown` unbinds.
    pub async fn start(&self) -> Result<(), PipelineError> {
        let mut control = self.control.lock().await;
        if self.state() == PipelineState::Uninitialized {
            return Err(PipelineError::NotInitialized);
        }

        if control.source_bound {
            info!("Unbinding camera before bind");
            if let Err(e) = self.unbind_source().await {
                error!("Unbind before rebind failed: {}", e);
                return Err(e.into());
            }
            control.source_bound = false;
        }

        if !self.analyzer.has_lane() {
            control.lane_task = Some(self.analyzer.spawn_lane(self.detector.clone()));
        }

        let mut pending = PendingBind {
            controller: self,
            committed: false,
        };
        self.analyzer.activate();
        control.source_bound = true;

        let request = BindRequest::from_config(&self.config.camera);
        let source = self.source.clone();
        let sink = self.analyzer.sink();
        let bound = self
            .binding
            .execute(Box::new(move || source.bind(&request, sink)))
            .await;
        pending.committed = true;

        match bound {
            Ok(()) => {
                self.set_state(PipelineState::Running);
                info!("Detection started");
                Ok(())
            }
            Err(e) => {
                control.source_bound = false;
                self.analyzer.deactivate();
                self.set_state(PipelineState::Idle);
                error!("Failed to bind camera: {}", e);
                Err(e.into())
            }
        }
    }

    /// Unbind the source, shut the lane down and end the result stream.
    /// No-op unless running or left bound by an abandoned start.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        let mut control = self.control.lock().await;
        if self.state() != PipelineState::Running && !control.source_bound {
            debug!("Stop ignored in state {:?}", self.state());
            return Ok(());
        }
        self.stop_locked(&mut control).await
    }

    async fn stop_locked(&self, control: &mut ControlSlot) -> Result<(), PipelineError> {
        self.analyzer.deactivate();
        self.set_state(PipelineState::Stopping);
        let unbound = self.unbind_source().await;
        if unbound.is_ok() {
            control.source_bound = false;
        }

        self.analyzer.shutdown_lane();
        if let Some(task) = control.lane_task.take() {
            task.abort();
        }
        self.publisher.end_stream();
        self.set_state(PipelineState::Idle);
        info!("Detection stopped");

        unbound.map_err(|e| {
            warn!("Camera unbind failed: {}", e);
            PipelineError::from(e)
        })
    }

    /// Stop if running and release every resource. Safe in any state.
    pub async fn teardown(&self) -> Result<(), PipelineError> {
        let mut control = self.control.lock().await;
        let stopped = if self.state() == PipelineState::Running || control.source_bound {
            self.stop_locked(&mut control).await
        } else {
            Ok(())
        };

        self.analyzer.shutdown_lane();
        if let Some(task) = control.lane_task.take() {
            task.abort();
        }
        self.publisher.end_stream();
        self.set_state(PipelineState::Uninitialized);
        info!("Pipeline torn down");
        stopped
    }

    /// Run a host control command
    pub async fn dispatch(&self, command: ControlCommand) -> Result<(), ControlError> {
        debug!("Dispatching {}", command);
        let result = match command {
            ControlCommand::Initialize => self.initialize().await,
            ControlCommand::Start => self.start().await,
            ControlCommand::Stop => self.stop().await,
        };
        result.map_err(ControlError::from)
    }

    /// Resolve a host method name and run it
    pub async fn handle_method(&self, method: &str) -> Result<(), ControlError> {
        let command = ControlCommand::from_method(method)?;
        self.dispatch(command).await
    }

    async fn unbind_source(&self) -> Result<(), BindError> {
        let source = self.source.clone();
        self.binding.execute(Box::new(move || source.unbind())).await
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if *self.state.get_mut() == PipelineState::Running {
            warn!("Pipeline dropped while running; frames will be released unanalyzed");
        }
        self.analyzer.shutdown_lane();
        if let Some(task) = self.control.get_mut().lane_task.take() {
            task.abort();
        }
        self.publisher.end_stream();
    }
}
