// Simulated detector for running the pipeline without an inference backend

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use vigil::{BoundingBox, DetectedObject, Detector, DetectorError, InputImage, ObjectLabel};

const CATEGORIES: [&str; 5] = ["Fashion good", "Food", "Home good", "Place", "Plant"];

pub struct SimulatedDetector {
    rng: StdRng,
    latency: Duration,
    fail_every: Option<u64>,
    calls: u64,
}

impl SimulatedDetector {
    pub fn new(latency: Duration, fail_every: Option<u64>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            latency,
            fail_every: fail_every.filter(|n| *n > 0),
            calls: 0,
        }
    }

    fn random_object(&mut self, width: f32, height: f32) -> DetectedObject {
        let left = self.rng.gen_range(0.0..width * 0.8);
        let top = self.rng.gen_range(0.0..height * 0.8);
        let right = self.rng.gen_range(left + 1.0..=width);
        let bottom = self.rng.gen_range(top + 1.0..=height);

        // Some objects stay unclassified
        let labels = if self.rng.gen_bool(0.2) {
            Vec::new()
        } else {
            let index = self.rng.gen_range(0..CATEGORIES.len());
            vec![ObjectLabel::new(
                CATEGORIES[index],
                self.rng.gen_range(0.3..1.0),
                index,
            )]
        };

        DetectedObject {
            labels,
            bounding_box: BoundingBox::new(left, top, right, bottom),
            tracking_id: None,
        }
    }
}

#[async_trait]
impl Detector for SimulatedDetector {
    async fn detect(&mut self, image: InputImage) -> Result<Vec<DetectedObject>, DetectorError> {
        self.calls += 1;
        tokio::time::sleep(self.latency).await;

        if let Some(n) = self.fail_every {
            if self.calls % n == 0 {
                return Err(DetectorError::Inference(format!(
                    "simulated failure on call {}",
                    self.calls
                )));
            }
        }

        if image.width < 8 || image.height < 8 {
            return Err(DetectorError::UnsupportedImage(format!(
                "{}x{} is too small",
                image.width, image.height
            )));
        }

        let count = self.rng.gen_range(0..=3);
        let (width, height) = (image.width as f32, image.height as f32);
        Ok((0..count).map(|_| self.random_object(width, height)).collect())
    }
}
