//! Captured frames and their release discipline

use crate::error::ReleaseError;
use bytes::Bytes;
use std::fmt;
use tracing::warn;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgr8,
    Yuv420,
}

/// Capture metadata attached to every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation needed to display the image upright (0, 90, 180, 270)
    pub rotation_degrees: u16,
    pub timestamp_ns: u64,
}

/// Callback that hands a frame buffer back to its source
pub type ReleaseFn = Box<dyn FnOnce(u64) -> Result<(), ReleaseError> + Send>;

/// Image view handed to a detector
#[derive(Debug, Clone)]
pub struct InputImage {
    pub data: Bytes,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u16,
}

/// One captured camera image.
///
/// The buffer belongs to the frame source until the frame is released. Release
/// happens exactly once: either through [`Frame::release`] or, as a backstop,
/// when an unreleased frame is dropped.
pub struct Frame {
    id: u64,
    data: Bytes,
    format: PixelFormat,
    metadata: FrameMetadata,
    release: Option<ReleaseFn>,
}

impl Frame {
    pub fn new(
        id: u64,
        data: Bytes,
        format: PixelFormat,
        metadata: FrameMetadata,
        release: ReleaseFn,
    ) -> Self {
        Self {
            id,
            data,
            format,
            metadata,
            release: Some(release),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn input_image(&self) -> InputImage {
        InputImage {
            data: self.data.clone(),
            format: self.format,
            width: self.metadata.width,
            height: self.metadata.height,
            rotation_degrees: self.metadata.rotation_degrees,
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }

    /// Hand the buffer back to the source
    pub fn release(mut self) -> Result<(), ReleaseError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), ReleaseError> {
        match self.release.take() {
            Some(release) => release(self.id),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("metadata", &self.metadata)
            .field("bytes", &self.data.len())
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if self.release.is_some() {
            if let Err(e) = self.release_inner() {
                warn!("Frame {} release on drop failed: {}", self.id, e);
            }
        }
    }
}
