mod nms;
pub mod doctor;
pub mod adapter;
pub mod annotate;
pub mod camera;
pub mod policy;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use bytes::Bytes;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One decoded camera snapshot. Lives for a single control cycle.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub captured_at: OffsetDateTime,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self { seq, captured_at: OffsetDateTime::now_utc(), image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Time since capture. A clock that stepped backwards reads as zero.
    pub fn age(&self) -> std::time::Duration {
        std::time::Duration::try_from(OffsetDateTime::now_utc() - self.captured_at).unwrap_or_default()
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i32,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Model output before it is mapped onto a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: i32,
    pub conf: f32,
    // normalized 0..1
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl RawDetection {
    pub fn to_pixels(&self, frame_w: u32, frame_h: u32) -> Detection {
        let (fw, fh) = (frame_w as f32, frame_h as f32);
        let x1 = ((self.cx - self.w / 2.0) * fw).clamp(0.0, fw);
        let y1 = ((self.cy - self.h / 2.0) * fh).clamp(0.0, fh);
        let x2 = ((self.cx + self.w / 2.0) * fw).clamp(0.0, fw);
        let y2 = ((self.cy + self.h / 2.0) * fh).clamp(0.0, fh);
        Detection {
            class_id: self.class_id,
            bbox: BoundingBox { x1, y1, x2, y2 },
            confidence: self.conf,
        }
    }
}

/// PNG-encoded frame with detections drawn on it, ready for a display surface.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub png: Bytes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub backend: String, // "none" | "tflite"
    pub use_coral: bool,
    pub model_path: String,
    pub model_path_edgetpu: String,

    pub img_w: u32,
    pub img_h: u32,
    pub input_type: String, // "u8" | "f32"
    pub num_classes: usize,
    pub class_names: Vec<String>,

    pub conf_threshold: f32,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
    pub output_layout: String, // "ultralytics" | "yolov8"
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            backend: "none".into(),
            use_coral: false,
            model_path: "models/yolov8n_float32.tflite".into(),
            model_path_edgetpu: "models/yolov8n_full_integer_quant_edgetpu.tflite".into(),
            img_w: 640,
            img_h: 640,
            input_type: "f32".into(),
            num_classes: 80,
            class_names: Vec::new(),
            conf_threshold: 0.3,
            nms_iou_threshold: 0.45,
            max_detections: 50,
            output_layout: "yolov8".into(),
        }
    }
}

impl VisionConfig {
    pub fn class_name(&self, class_id: i32) -> Option<&str> {
        usize::try_from(class_id)
            .ok()
            .and_then(|i| self.class_names.get(i))
            .map(String::as_str)
    }
}

/// Inference backend. Returned boxes are in frame pixel coordinates.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame, conf_threshold: f32) -> Result<Vec<Detection>>;
}

/// Backend for running the console without a model: video and manual
/// driving work, tracking never finds a target.
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect(&mut self, _frame: &Frame, _conf_threshold: f32) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

pub fn postprocess_ultralytics(
    raw: &[f32],
    num_preds: usize,
    num_classes: usize,
    conf_th: f32,
) -> Vec<RawDetection> {
    // YOLOv5-style export, one row per prediction:
    // [cx, cy, w, h, obj, cls0..]
    let stride = 5 + num_classes;
    let mut out = Vec::new();

    for i in 0..num_preds {
        let base = i * stride;
        if base + stride > raw.len() { break; }
        let cx = raw[base];
        let cy = raw[base + 1];
        let w = raw[base + 2];
        let h = raw[base + 3];
        let obj = raw[base + 4];

        let (best_c, best_p) = best_class((0..num_classes).map(|c| raw[base + 5 + c]));
        let conf = obj * best_p;
        if conf >= conf_th {
            out.push(RawDetection { class_id: best_c as i32, conf, cx, cy, w, h });
        }
    }
    out
}

pub fn postprocess_yolov8(
    raw: &[f32],
    num_preds: usize,
    num_classes: usize,
    conf_th: f32,
) -> Vec<RawDetection> {
    // YOLOv8 export is channels-first: row r holds attribute r of every prediction.
    // rows 0..4 = cx, cy, w, h; rows 4.. = class scores (no objectness).
    let rows = 4 + num_classes;
    if raw.len() < rows * num_preds {
        return Vec::new();
    }
    let at = |row: usize, i: usize| raw[row * num_preds + i];
    let mut out = Vec::new();

    for i in 0..num_preds {
        let (best_c, best_p) = best_class((0..num_classes).map(|c| at(4 + c, i)));
        if best_p >= conf_th {
            out.push(RawDetection {
                class_id: best_c as i32,
                conf: best_p,
                cx: at(0, i),
                cy: at(1, i),
                w: at(2, i),
                h: at(3, i),
            });
        }
    }
    out
}

fn best_class(scores: impl Iterator<Item = f32>) -> (usize, f32) {
    let mut best_c = 0usize;
    let mut best_p = 0.0f32;
    for (c, p) in scores.enumerate() {
        if p > best_p { best_p = p; best_c = c; }
    }
    (best_c, best_p)
}

/// Greedy NMS, highest confidence first. Boxes only suppress boxes of their own class.
pub fn nms_filter(mut dets: Vec<RawDetection>, iou_th: f32, max_det: usize) -> Vec<RawDetection> {
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<RawDetection> = Vec::new();

    'outer: for d in dets {
        if kept.len() >= max_det { break; }
        for k in &kept {
            if k.class_id == d.class_id
                && nms::iou(d.cx, d.cy, d.w, d.h, k.cx, k.cy, k.w, k.h) >= iou_th
            {
                continue 'outer;
            }
        }
        kept.push(d);
    }
    kept
}
