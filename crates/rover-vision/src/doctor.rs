use anyhow::Result;

use crate::camera::CameraConfig;
use crate::policy::TrackingConfig;
use crate::VisionConfig;

pub fn check_camera(cfg: &CameraConfig) -> Result<()> {
    anyhow::ensure!(
        cfg.url.starts_with("http://") || cfg.url.starts_with("https://"),
        "camera.url must be http(s): {}",
        cfg.url
    );
    anyhow::ensure!(
        cfg.fetch_timeout_ms >= 100 && cfg.fetch_timeout_ms <= 30_000,
        "camera.fetch_timeout_ms should be 100..30000"
    );
    Ok(())
}

pub fn check_vision(cfg: &VisionConfig) -> Result<()> {
    anyhow::ensure!(
        matches!(cfg.backend.as_str(), "none" | "tflite"),
        "unknown vision.backend: {}",
        cfg.backend
    );
    anyhow::ensure!(
        cfg.conf_threshold > 0.0 && cfg.conf_threshold < 1.0,
        "vision.conf_threshold must be in (0, 1)"
    );
    anyhow::ensure!(
        cfg.nms_iou_threshold > 0.0 && cfg.nms_iou_threshold <= 1.0,
        "vision.nms_iou_threshold must be in (0, 1]"
    );
    anyhow::ensure!(cfg.max_detections >= 1, "vision.max_detections must be >= 1");
    if cfg.backend == "tflite" {
        anyhow::ensure!(cfg.img_w >= 32 && cfg.img_h >= 32, "vision.img_w/img_h too small");
        anyhow::ensure!(cfg.num_classes >= 1, "vision.num_classes must be >= 1");
        anyhow::ensure!(
            matches!(cfg.output_layout.as_str(), "yolov8" | "ultralytics"),
            "unknown vision.output_layout: {}",
            cfg.output_layout
        );
        anyhow::ensure!(
            matches!(cfg.input_type.as_str(), "u8" | "f32"),
            "unknown vision.input_type: {}",
            cfg.input_type
        );
        anyhow::ensure!(
            cfg.class_names.is_empty() || cfg.class_names.len() == cfg.num_classes,
            "vision.class_names has {} entries, num_classes is {}",
            cfg.class_names.len(),
            cfg.num_classes
        );
    }
    Ok(())
}

pub fn check_tracking(cfg: &TrackingConfig, vision: &VisionConfig) -> Result<()> {
    anyhow::ensure!(cfg.center_tolerance_px > 0.0, "tracking.center_tolerance_px must be > 0");
    anyhow::ensure!(cfg.target_class_id >= 0, "tracking.target_class_id must be >= 0");
    if vision.backend != "none" {
        anyhow::ensure!(
            (cfg.target_class_id as usize) < vision.num_classes,
            "tracking.target_class_id {} outside model classes (0..{})",
            cfg.target_class_id,
            vision.num_classes
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass() {
        check_camera(&CameraConfig::default()).unwrap();
        check_vision(&VisionConfig::default()).unwrap();
        check_tracking(&TrackingConfig::default(), &VisionConfig::default()).unwrap();
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cam = CameraConfig { url: "rtsp://cam".into(), ..CameraConfig::default() };
        assert!(check_camera(&cam).is_err());

        let vision = VisionConfig { conf_threshold: 1.5, ..VisionConfig::default() };
        assert!(check_vision(&vision).is_err());

        let tflite = VisionConfig { backend: "tflite".into(), num_classes: 10, ..VisionConfig::default() };
        check_vision(&tflite).unwrap();
        assert!(check_tracking(&TrackingConfig::default(), &tflite).is_err());

        let zero_tol = TrackingConfig { center_tolerance_px: 0.0, ..TrackingConfig::default() };
        assert!(check_tracking(&zero_tol, &VisionConfig::default()).is_err());
    }
}
