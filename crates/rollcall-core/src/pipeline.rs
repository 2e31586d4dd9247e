//! Per-frame processing: downsample, detect face regions, compute
//! embeddings, map boxes back to full-frame space.

use crate::types::{BoundingBox, Detection, Embedding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Frames are downsampled to quarter scale before detection; boxes found on
/// the small image are mapped back by the same factor. The two constants
/// are one value on purpose.
pub const DOWNSAMPLE_FACTOR: u32 = 4;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detection failed: {0}")]
    DetectionFailed(String),
    #[error("embedding extraction failed: {0}")]
    EncodingFailed(String),
    #[error("frame too small to downsample: {width}x{height}")]
    FrameTooSmall { width: u32, height: u32 },
}

/// Black-box face-region detector. Given an RGB image, returns zero or
/// more face bounding boxes in that image's coordinate space, in the
/// detector's emission order.
pub trait FaceDetector {
    fn detect(&mut self, rgb: &[u8], width: u32, height: u32)
        -> Result<Vec<BoundingBox>, PipelineError>;
}

/// Black-box face embedder. Given an RGB image and one face region,
/// produces a fixed-length embedding.
pub trait FaceEncoder {
    fn encode(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, PipelineError>;
}

/// Downsample + detect + encode for one frame.
pub struct FramePipeline<D, E> {
    detector: D,
    encoder: E,
}

impl<D: FaceDetector, E: FaceEncoder> FramePipeline<D, E> {
    pub fn new(detector: D, encoder: E) -> Self {
        Self { detector, encoder }
    }

    /// Process one full-resolution frame into per-face detections.
    ///
    /// Detection and embedding both run on the quarter-scale image to bound
    /// cost; the returned bounding boxes are upscaled into full-frame
    /// coordinates for the overlay renderer. One `Detection` per face,
    /// order matching the detector's emission order.
    pub fn process(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, PipelineError> {
        let (width, height) = frame.dimensions();
        let small_w = width / DOWNSAMPLE_FACTOR;
        let small_h = height / DOWNSAMPLE_FACTOR;
        if small_w == 0 || small_h == 0 {
            return Err(PipelineError::FrameTooSmall { width, height });
        }

        let small = imageops::resize(frame, small_w, small_h, FilterType::Nearest);

        let faces = self.detector.detect(small.as_raw(), small_w, small_h)?;
        tracing::trace!(faces = faces.len(), "frame detections");

        let mut detections = Vec::with_capacity(faces.len());
        for face in &faces {
            let embedding = self.encoder.encode(small.as_raw(), small_w, small_h, face)?;
            detections.push(Detection {
                bbox: face.scaled(DOWNSAMPLE_FACTOR as f32),
                embedding,
            });
        }

        Ok(detections)
    }
}

/// Scripted detector/encoder doubles. The original deployment ran against
/// mocked capture and stores when hardware was absent; these fill the same
/// role for tests and demos without model files.
pub mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Detector that replays a scripted sequence of per-frame face lists.
    pub struct StubDetector {
        frames: VecDeque<Vec<BoundingBox>>,
        fallback: Vec<BoundingBox>,
    }

    impl StubDetector {
        /// Same face list for every frame.
        pub fn always(faces: Vec<BoundingBox>) -> Self {
            Self {
                frames: VecDeque::new(),
                fallback: faces,
            }
        }

        /// One face list per frame, in order; empty after exhaustion.
        pub fn per_frame(frames: Vec<Vec<BoundingBox>>) -> Self {
            Self {
                frames: frames.into(),
                fallback: Vec::new(),
            }
        }
    }

    impl FaceDetector for StubDetector {
        fn detect(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<BoundingBox>, PipelineError> {
            Ok(self.frames.pop_front().unwrap_or_else(|| self.fallback.clone()))
        }
    }

    /// Encoder that replays scripted embeddings.
    pub struct StubEncoder {
        embeddings: VecDeque<Vec<f32>>,
        fallback: Vec<f32>,
    }

    impl StubEncoder {
        /// Same embedding for every face.
        pub fn constant(values: Vec<f32>) -> Self {
            Self {
                embeddings: VecDeque::new(),
                fallback: values,
            }
        }

        /// One embedding per encoded face, in order; falls back to the last.
        pub fn per_face(seq: Vec<Vec<f32>>) -> Self {
            let fallback = seq.last().cloned().unwrap_or_default();
            Self {
                embeddings: seq.into(),
                fallback,
            }
        }
    }

    impl FaceEncoder for StubEncoder {
        fn encode(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
            _face: &BoundingBox,
        ) -> Result<Embedding, PipelineError> {
            let values = self
                .embeddings
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            Ok(Embedding { values })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{StubDetector, StubEncoder};
    use super::*;

    fn face_at(x: f32, y: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: 20.0,
            height: 20.0,
            confidence: 0.95,
        }
    }

    #[test]
    fn test_process_upscales_boxes() {
        let detector = StubDetector::always(vec![face_at(10.0, 5.0)]);
        let encoder = StubEncoder::constant(vec![0.1; 8]);
        let mut pipeline = FramePipeline::new(detector, encoder);

        let frame = RgbImage::new(640, 480);
        let detections = pipeline.process(&frame).unwrap();
        assert_eq!(detections.len(), 1);

        // Boxes come back in full-frame coordinates: x4 of the small image.
        let bbox = &detections[0].bbox;
        assert_eq!(bbox.x, 40.0);
        assert_eq!(bbox.y, 20.0);
        assert_eq!(bbox.width, 80.0);
        assert_eq!(bbox.height, 80.0);
    }

    #[test]
    fn test_process_no_faces() {
        let detector = StubDetector::always(vec![]);
        let encoder = StubEncoder::constant(vec![0.1; 8]);
        let mut pipeline = FramePipeline::new(detector, encoder);

        let detections = pipeline.process(&RgbImage::new(640, 480)).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_process_preserves_detector_order() {
        let detector = StubDetector::always(vec![face_at(0.0, 0.0), face_at(50.0, 0.0)]);
        let encoder = StubEncoder::per_face(vec![vec![1.0], vec![2.0]]);
        let mut pipeline = FramePipeline::new(detector, encoder);

        let detections = pipeline.process(&RgbImage::new(640, 480)).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].embedding.values, vec![1.0]);
        assert_eq!(detections[1].embedding.values, vec![2.0]);
        assert!(detections[0].bbox.x < detections[1].bbox.x);
    }

    #[test]
    fn test_process_rejects_tiny_frame() {
        let detector = StubDetector::always(vec![]);
        let encoder = StubEncoder::constant(vec![]);
        let mut pipeline = FramePipeline::new(detector, encoder);

        let result = pipeline.process(&RgbImage::new(2, 2));
        assert!(matches!(result, Err(PipelineError::FrameTooSmall { .. })));
    }
}
