//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides with two anchors per cell,
//! followed by greedy non-maximum suppression.

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (place the SCRFD det_10g.onnx model in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too small: expected {expected} bytes, got {actual}")]
    BadFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps between original frame coordinates and the padded model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    scaled_w: usize,
    scaled_h: usize,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let scaled_w = ((width as f32 * scale).round() as usize).min(INPUT_SIZE);
        let scaled_h = ((height as f32 * scale).round() as usize).min(INPUT_SIZE);
        Self {
            scale,
            pad_x: (INPUT_SIZE - scaled_w) as f32 / 2.0,
            pad_y: (INPUT_SIZE - scaled_h) as f32 / 2.0,
            scaled_w,
            scaled_h,
        }
    }

    /// Model-input point back to frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions (score, bbox, kps) for one stride.
type StrideSlots = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    slots: [StrideSlots; 3],
    confidence_threshold: f32,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }

        let slots = output_slots(&names);
        tracing::info!(path = model_path, outputs = ?names, ?slots, "loaded SCRFD model");

        Ok(Self {
            session,
            slots,
            confidence_threshold,
        })
    }

    /// Detect faces in a grayscale frame, most confident first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 || frame.len() < w * h {
            return Err(DetectorError::BadFrame {
                expected: w * h,
                actual: frame.len(),
            });
        }

        let letterbox = Letterbox::fit(w, h);
        let input = to_input_tensor(&resize_bilinear(frame, w, h, letterbox.scaled_w, letterbox.scaled_h), &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_i, bbox_i, kps_i)) in STRIDES.iter().zip(self.slots.iter()) {
            let extract = |i: usize, what: &str| {
                outputs[i]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_i, "scores")?;
            let bboxes = extract(bbox_i, "bboxes")?;
            let kps = extract(kps_i, "kps")?;

            candidates.extend(decode_stride(
                stride,
                scores,
                bboxes,
                kps,
                &letterbox,
                self.confidence_threshold,
            ));
        }

        Ok(nms(candidates, NMS_IOU))
    }
}

/// Locate score/bbox/kps tensors per stride by name ("score_8", "bbox_16", ...),
/// or fall back to the standard export order: scores 0-2, bboxes 3-5, kps 6-8.
fn output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideSlots>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

/// Bilinear resize of a grayscale buffer.
fn resize_bilinear(src: &[u8], w: usize, h: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let sx_ratio = w as f32 / new_w.max(1) as f32;
    let sy_ratio = h as f32 / new_h.max(1) as f32;
    let mut out = vec![0u8; new_w * new_h];

    for y in 0..new_h {
        let fy_src = ((y as f32 + 0.5) * sy_ratio - 0.5).max(0.0);
        let y0 = (fy_src as usize).min(h - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fy = fy_src - y0 as f32;

        for x in 0..new_w {
            let fx_src = ((x as f32 + 0.5) * sx_ratio - 0.5).max(0.0);
            let x0 = (fx_src as usize).min(w - 1);
            let x1 = (x0 + 1).min(w - 1);
            let fx = (fx_src - x0 as f32).clamp(0.0, 1.0);
            let fy = fy.clamp(0.0, 1.0);

            let top = src[y0 * w + x0] as f32 * (1.0 - fx) + src[y0 * w + x1] as f32 * fx;
            let bot = src[y1 * w + x0] as f32 * (1.0 - fx) + src[y1 * w + x1] as f32 * fx;
            out[y * new_w + x] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Place the resized frame in the padded NCHW input, grey replicated to RGB.
fn to_input_tensor(resized: &[u8], lb: &Letterbox) -> Array4<f32> {
    // padding normalises to 0.0
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    let x_off = lb.pad_x.floor() as usize;
    let y_off = lb.pad_y.floor() as usize;

    for y in 0..lb.scaled_h {
        for x in 0..lb.scaled_w {
            let v = (resized[y * lb.scaled_w + x] as f32 - PIXEL_MEAN) / PIXEL_STD;
            for c in 0..3 {
                tensor[[0, c, y + y_off, x + x_off]] = v;
            }
        }
    }

    tensor
}

fn decode_stride(
    stride: usize,
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    lb: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE / stride;
    let grid_h = INPUT_SIZE / stride;
    let s = stride as f32;
    let mut faces = Vec::new();

    for idx in 0..grid_w * grid_h * ANCHORS_PER_CELL {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let cx = (cell % grid_w) as f32 * s;
        let cy = (cell / grid_w) as f32 * s;

        let (x1, y1) = lb.unmap(cx - d[0] * s, cy - d[1] * s);
        let (x2, y2) = lb.unmap(cx + d[2] * s, cy + d[3] * s);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| lb.unmap(cx + k[i * 2] * s, cy + k[i * 2 + 1] * s))
        });

        faces.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    faces
}

/// Greedy NMS; the result is sorted by confidence, highest first.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let iw = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let ih = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
