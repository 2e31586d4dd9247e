//! ONNX-backed detector and encoder.
//!
//! Thin inference adapters over user-supplied model files: an
//! UltraFace-style detector (normalized score/box output pair) and a
//! MobileFaceNet-style 128-d embedder. Model design is out of scope; these
//! only wire tensors in and out via ONNX Runtime.

use crate::pipeline::{FaceDetector, FaceEncoder, PipelineError};
use crate::types::{BoundingBox, Embedding, EMBEDDING_DIM};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// Detector input geometry and normalization (UltraFace RFB-320 convention).
const DET_INPUT_WIDTH: u32 = 320;
const DET_INPUT_HEIGHT: u32 = 240;
const DET_MEAN: f32 = 127.0;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.7;
const DET_NMS_IOU: f32 = 0.3;

// Encoder input geometry and normalization (MobileFaceNet convention).
const ENC_INPUT_SIZE: u32 = 112;
const ENC_MEAN: f32 = 127.5;
const ENC_STD: f32 = 128.0;
/// Relative margin added around the detected box before the encoder crop.
const ENC_CROP_MARGIN: f32 = 0.2;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

fn load_session(model_path: &str) -> Result<Session, OnnxError> {
    if !Path::new(model_path).exists() {
        return Err(OnnxError::ModelNotFound(model_path.to_string()));
    }
    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;
    tracing::info!(
        path = model_path,
        inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );
    Ok(session)
}

fn rgb_image(rgb: &[u8], width: u32, height: u32) -> Result<RgbImage, PipelineError> {
    RgbImage::from_raw(width, height, rgb.to_vec()).ok_or_else(|| {
        PipelineError::DetectionFailed(format!(
            "RGB buffer length {} does not match {width}x{height}",
            rgb.len()
        ))
    })
}

/// Resize an RGB image to the given geometry and pack it into a normalized
/// NCHW float tensor.
fn to_nchw(img: &RgbImage, width: u32, height: u32, mean: f32, std: f32) -> Array4<f32> {
    let resized = imageops::resize(img, width, height, FilterType::Triangle);
    let (w, h) = (width as usize, height as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - mean) / std;
        }
    }
    tensor
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression. Input need not be sorted.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Square crop around a face box with margin, clamped to the frame.
fn crop_face(img: &RgbImage, face: &BoundingBox) -> RgbImage {
    let (width, height) = img.dimensions();
    let side = face.width.max(face.height) * (1.0 + ENC_CROP_MARGIN);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x0 = (cx - side / 2.0).clamp(0.0, (width - 1) as f32) as u32;
    let y0 = (cy - side / 2.0).clamp(0.0, (height - 1) as f32) as u32;
    let w = (side as u32).clamp(1, width.saturating_sub(x0).max(1));
    let h = (side as u32).clamp(1, height.saturating_sub(y0).max(1));

    imageops::crop_imm(img, x0, y0, w, h).to_image()
}

/// Face-region detector backed by an UltraFace-style ONNX model
/// (outputs: scores `[1, N, 2]` and normalized boxes `[1, N, 4]`).
pub struct OnnxFaceDetector {
    session: Session,
}

impl OnnxFaceDetector {
    pub fn load(model_path: &str) -> Result<Self, OnnxError> {
        Ok(Self {
            session: load_session(model_path)?,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, PipelineError> {
        let img = rgb_image(rgb, width, height)?;
        let input = to_nchw(&img, DET_INPUT_WIDTH, DET_INPUT_HEIGHT, DET_MEAN, DET_STD);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())
                .map_err(|e| PipelineError::DetectionFailed(e.to_string()))?])
            .map_err(|e| PipelineError::DetectionFailed(e.to_string()))?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::DetectionFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::DetectionFailed(format!("boxes: {e}")))?;

        let count = scores.len() / 2;
        let mut faces = Vec::new();
        for i in 0..count {
            let confidence = scores[i * 2 + 1];
            if confidence < DET_CONFIDENCE_THRESHOLD {
                continue;
            }
            // Normalized corners, scaled back to the frame the caller gave us.
            let x1 = boxes[i * 4].clamp(0.0, 1.0) * width as f32;
            let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * height as f32;
            let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * width as f32;
            let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * height as f32;
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            faces.push(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence,
            });
        }

        Ok(nms(faces, DET_NMS_IOU))
    }
}

/// Face embedder backed by a MobileFaceNet-style ONNX model producing
/// [`EMBEDDING_DIM`]-dimensional vectors.
pub struct OnnxFaceEncoder {
    session: Session,
}

impl OnnxFaceEncoder {
    pub fn load(model_path: &str) -> Result<Self, OnnxError> {
        Ok(Self {
            session: load_session(model_path)?,
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, PipelineError> {
        let img = rgb_image(rgb, width, height)
            .map_err(|e| PipelineError::EncodingFailed(e.to_string()))?;
        let crop = crop_face(&img, face);
        let input = to_nchw(&crop, ENC_INPUT_SIZE, ENC_INPUT_SIZE, ENC_MEAN, ENC_STD);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())
                .map_err(|e| PipelineError::EncodingFailed(e.to_string()))?])
            .map_err(|e| PipelineError::EncodingFailed(e.to_string()))?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::EncodingFailed(format!("embedding: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(PipelineError::EncodingFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: raw.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
        }
    }

    #[test]
    fn test_to_nchw_shape_and_normalization() {
        let mut img = RgbImage::new(8, 8);
        for p in img.pixels_mut() {
            p.0 = [127, 127, 127];
        }
        let tensor = to_nchw(&img, 8, 8, DET_MEAN, DET_STD);
        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);
        assert!(tensor[[0, 0, 0, 0]].abs() < 1e-6);
        assert!(tensor[[0, 2, 7, 7]].abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint_and_identical() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_merges_overlaps_keeps_best() {
        let boxes = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.8),
            bbox(1.0, 1.0, 10.0, 10.0, 0.95),
            bbox(50.0, 50.0, 10.0, 10.0, 0.6),
        ];
        let kept = nms(boxes, DET_NMS_IOU);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].confidence, 0.6);
    }

    #[test]
    fn test_crop_face_clamps_to_frame() {
        let img = RgbImage::new(64, 48);
        // Box hanging off the top-left corner.
        let crop = crop_face(&img, &bbox(-5.0, -5.0, 20.0, 20.0, 0.9));
        assert!(crop.width() >= 1 && crop.width() <= 64);
        assert!(crop.height() >= 1 && crop.height() <= 48);

        // Box hanging off the bottom-right corner.
        let crop = crop_face(&img, &bbox(60.0, 44.0, 20.0, 20.0, 0.9));
        assert!(crop.width() >= 1 && crop.height() >= 1);
    }
}
