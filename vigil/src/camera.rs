//! Frame sources and camera binding

use crate::config::{CameraConfig, LensFacing};
use crate::error::{BindError, ReleaseError};
use crate::frame::{Frame, FrameMetadata, PixelFormat};
use crate::processing::FrameSink;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Use-cases requested from the camera on bind
#[derive(Debug, Clone, PartialEq)]
pub struct BindRequest {
    pub lens_facing: LensFacing,
    pub resolution: (u32, u32),
    pub frame_rate: u32,
    pub preview: bool,
    /// Frame analysis with keep-only-latest backpressure
    pub analysis: bool,
}

impl BindRequest {
    pub fn from_config(camera: &CameraConfig) -> Self {
        Self {
            lens_facing: camera.lens_facing,
            resolution: camera.resolution,
            frame_rate: camera.frame_rate,
            preview: camera.preview,
            analysis: true,
        }
    }
}

/// Camera abstraction delivering frames to a [`FrameSink`] while bound.
///
/// Calls are made from the binding context only. Frames may be delivered from
/// any thread, and each frame carries the callback that returns its buffer.
pub trait FrameSource: Send + Sync {
    fn bind(&self, request: &BindRequest, sink: FrameSink) -> Result<(), BindError>;

    /// Unbind all use-cases. Unbinding an unbound source succeeds.
    fn unbind(&self) -> Result<(), BindError>;
}

struct CaptureSession {
    is_running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Frame source generating RGBA gradient frames on its own thread
pub struct SyntheticCamera {
    session: Mutex<Option<CaptureSession>>,
    next_frame_id: Arc<AtomicU64>,
    outstanding: Arc<AtomicUsize>,
    available: AtomicBool,
    sessions_started: AtomicU64,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            next_frame_id: Arc::new(AtomicU64::new(1)),
            outstanding: Arc::new(AtomicUsize::new(0)),
            available: AtomicBool::new(true),
            sessions_started: AtomicU64::new(0),
        }
    }

    /// Simulate the camera disappearing; later binds fail
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Frames handed out and not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Frames produced so far
    pub fn frames_produced(&self) -> u64 {
        self.next_frame_id.load(Ordering::SeqCst) - 1
    }

    pub fn is_bound(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Number of successful binds over the camera's lifetime
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::SeqCst)
    }

    fn make_frame(
        id: u64,
        width: u32,
        height: u32,
        outstanding: &Arc<AtomicUsize>,
    ) -> Frame {
        let shift = (id % 256) as u8;
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                data.push((x % 256) as u8 ^ shift);
                data.push((y % 256) as u8);
                data.push(shift);
                data.push(u8::MAX);
            }
        }

        let timestamp_ns = chrono::Utc::now()
            .timestamp_nanos_opt()
            .map_or(0, |ns| ns.max(0) as u64);

        outstanding.fetch_add(1, Ordering::SeqCst);
        let outstanding = outstanding.clone();
        Frame::new(
            id,
            Bytes::from(data),
            PixelFormat::Rgba8,
            FrameMetadata {
                width,
                height,
                rotation_degrees: 0,
                timestamp_ns,
            },
            Box::new(move |frame_id| {
                let previous = outstanding.fetch_sub(1, Ordering::SeqCst);
                if previous == 0 {
                    outstanding.store(0, Ordering::SeqCst);
                    return Err(ReleaseError {
                        frame_id,
                        reason: "no outstanding buffer".to_string(),
                    });
                }
                Ok(())
            }),
        )
    }
}

impl FrameSource for SyntheticCamera {
    fn bind(&self, request: &BindRequest, sink: FrameSink) -> Result<(), BindError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BindError::CameraUnavailable(format!(
                "{:?} camera not present",
                request.lens_facing
            )));
        }
        if !request.analysis {
            return Err(BindError::UseCase("analysis use-case not requested".to_string()));
        }

        let mut session = self.session.lock();
        if session.is_some() {
            return Err(BindError::AlreadyBound);
        }

        let is_running = Arc::new(AtomicBool::new(true));
        let running = is_running.clone();
        let next_frame_id = self.next_frame_id.clone();
        let outstanding = self.outstanding.clone();
        let (width, height) = request.resolution;
        let frame_interval = Duration::from_secs_f64(1.0 / request.frame_rate.max(1) as f64);

        let handle = std::thread::Builder::new()
            .name("synthetic-camera".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    let id = next_frame_id.fetch_add(1, Ordering::SeqCst);
                    trace!("Producing frame {}", id);
                    sink.submit(Self::make_frame(id, width, height, &outstanding));

                    let elapsed = started.elapsed();
                    if elapsed < frame_interval {
                        std::thread::sleep(frame_interval - elapsed);
                    }
                }
                debug!("Synthetic capture loop exited");
            })
            .map_err(|e| BindError::UseCase(format!("Failed to spawn capture thread: {}", e)))?;

        *session = Some(CaptureSession { is_running, handle });
        self.sessions_started.fetch_add(1, Ordering::SeqCst);
        info!(
            "Synthetic {:?} camera bound at {}x{} @ {}fps (preview: {})",
            request.lens_facing, width, height, request.frame_rate, request.preview
        );
        Ok(())
    }

    fn unbind(&self) -> Result<(), BindError> {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.is_running.store(false, Ordering::SeqCst);
            if session.handle.join().is_err() {
                error!("Synthetic capture thread panicked");
            }
            info!("Synthetic camera unbound");
        }
        Ok(())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.is_running.store(false, Ordering::SeqCst);
            let _ = session.handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferencePolicy;
    use crate::processing::{FrameAnalyzer, ResultPublisher};
    use crate::stats::PipelineStats;

    fn inactive_sink() -> (FrameSink, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        let publisher = Arc::new(ResultPublisher::new(true, stats.clone()));
        let analyzer = FrameAnalyzer::new(InferencePolicy::Always, publisher, stats.clone());
        (analyzer.sink(), stats)
    }

    fn request() -> BindRequest {
        BindRequest {
            lens_facing: LensFacing::Back,
            resolution: (8, 4),
            frame_rate: 200,
            preview: true,
            analysis: true,
        }
    }

    #[test]
    fn test_bind_request_from_config() {
        let request = BindRequest::from_config(&CameraConfig::default());
        assert_eq!(request.lens_facing, LensFacing::Back);
        assert!(request.preview);
        assert!(request.analysis);
    }

    #[test]
    fn test_make_frame_accounting() {
        let outstanding = Arc::new(AtomicUsize::new(0));
        let frame = SyntheticCamera::make_frame(3, 4, 2, &outstanding);
        assert_eq!(frame.data().len(), 4 * 2 * 4);
        assert_eq!(frame.format(), PixelFormat::Rgba8);
        assert_eq!(outstanding.load(Ordering::SeqCst), 1);
        frame.release().unwrap();
        assert_eq!(outstanding.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bind_produces_and_releases_frames() {
        let camera = SyntheticCamera::new();
        let (sink, stats) = inactive_sink();
        camera.bind(&request(), sink).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        camera.unbind().unwrap();

        assert!(camera.frames_produced() > 0);
        assert_eq!(camera.outstanding(), 0);
        assert_eq!(stats.snapshot().frames_received, camera.frames_produced());
        assert!(!camera.is_bound());
    }

    #[test]
    fn test_double_bind_fails() {
        let camera = SyntheticCamera::new();
        let (sink, _) = inactive_sink();
        camera.bind(&request(), sink.clone()).unwrap();
        assert_eq!(camera.bind(&request(), sink), Err(BindError::AlreadyBound));
        camera.unbind().unwrap();
        assert_eq!(camera.sessions_started(), 1);
    }

    #[test]
    fn test_unavailable_camera() {
        let camera = SyntheticCamera::new();
        camera.set_available(false);
        let (sink, _) = inactive_sink();
        let err = camera.bind(&request(), sink).unwrap_err();
        assert!(matches!(err, BindError::CameraUnavailable(_)));
        assert!(camera.unbind().is_ok());
    }
}
