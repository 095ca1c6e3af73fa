//! Multi-object tracking

use crate::config::TrackingConfig;
use crate::detection::BoundingBox;
use crate::detector::{DetectedObject, Detector};
use crate::error::DetectorError;
use crate::frame::InputImage;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Upper bound on live tracks
const MAX_TRACKS: usize = 1000;

#[derive(Debug, Clone)]
struct Track {
    bounding_box: BoundingBox,
    /// Frames since the track was last matched
    age: u32,
}

/// Greedy IoU tracker assigning ids that stay stable across frames
pub struct ObjectTracker {
    next_id: i64,
    tracks: HashMap<i64, Track>,
    max_age: u32,
    iou_threshold: f32,
}

impl ObjectTracker {
    pub fn new(max_age: u32, iou_threshold: f32) -> Self {
        Self {
            next_id: 1,
            tracks: HashMap::new(),
            max_age,
            iou_threshold,
        }
    }

    pub fn from_config(config: &TrackingConfig) -> Self {
        Self::new(config.max_age, config.iou_threshold)
    }

    /// Match boxes against live tracks and return one track id per box, in
    /// input order. `None` only when no id could be allocated.
    pub fn update(&mut self, boxes: &[BoundingBox]) -> Vec<Option<i64>> {
        for track in self.tracks.values_mut() {
            track.age += 1;
        }

        let mut ids: Vec<Option<i64>> = vec![None; boxes.len()];
        let mut claimed: Vec<i64> = Vec::new();

        for (idx, bbox) in boxes.iter().enumerate() {
            let mut best: Option<(i64, f32)> = None;
            for (track_id, track) in self.tracks.iter() {
                if track.age > self.max_age || claimed.contains(track_id) {
                    continue;
                }
                let iou = bbox.iou(&track.bounding_box);
                if iou > self.iou_threshold && best.map_or(true, |(_, b)| iou > b) {
                    best = Some((*track_id, iou));
                }
            }

            if let Some((track_id, _)) = best {
                if let Some(track) = self.tracks.get_mut(&track_id) {
                    track.bounding_box = *bbox;
                    track.age = 0;
                    claimed.push(track_id);
                    ids[idx] = Some(track_id);
                }
            }
        }

        if self.tracks.len() >= MAX_TRACKS {
            // Evict the stalest tenth
            let mut by_age: Vec<(i64, u32)> =
                self.tracks.iter().map(|(id, t)| (*id, t.age)).collect();
            by_age.sort_by_key(|(_, age)| std::cmp::Reverse(*age));
            for (id, _) in by_age.iter().take((MAX_TRACKS / 10).max(1)) {
                self.tracks.remove(id);
            }
        }

        for (idx, bbox) in boxes.iter().enumerate() {
            if ids[idx].is_some() {
                continue;
            }
            match self.allocate_id() {
                Some(track_id) => {
                    self.tracks.insert(
                        track_id,
                        Track {
                            bounding_box: *bbox,
                            age: 0,
                        },
                    );
                    ids[idx] = Some(track_id);
                }
                None => warn!("Could not allocate a track id, leaving object untracked"),
            }
        }

        self.tracks.retain(|_, track| track.age <= self.max_age);
        debug!("Tracking {} objects", self.tracks.len());
        ids
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    fn allocate_id(&mut self) -> Option<i64> {
        for _ in 0..MAX_TRACKS {
            let candidate = self.next_id;
            self.next_id = match self.next_id.checked_add(1) {
                Some(next) => next,
                None => 1,
            };
            if !self.tracks.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

/// Detector wrapper that fills in tracking ids the inner detector leaves out
pub struct TrackingDetector<D> {
    inner: D,
    tracker: ObjectTracker,
}

impl<D: Detector> TrackingDetector<D> {
    pub fn new(inner: D, config: &TrackingConfig) -> Self {
        Self {
            inner,
            tracker: ObjectTracker::from_config(config),
        }
    }
}

#[async_trait]
impl<D: Detector> Detector for TrackingDetector<D> {
    async fn detect(&mut self, image: InputImage) -> Result<Vec<DetectedObject>, DetectorError> {
        let mut objects = self.inner.detect(image).await?;
        if self.inner.supports_tracking() {
            return Ok(objects);
        }

        let boxes: Vec<BoundingBox> = objects.iter().map(|o| o.bounding_box).collect();
        let ids = self.tracker.update(&boxes);
        for (object, id) in objects.iter_mut().zip(ids) {
            if object.tracking_id.is_none() {
                object.tracking_id = id;
            }
        }
        Ok(objects)
    }

    fn supports_tracking(&self) -> bool {
        true
    }
}
