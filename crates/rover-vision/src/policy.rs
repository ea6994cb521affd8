use rover_proto::Command;
use serde::Deserialize;

use crate::Detection;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// COCO class 46 is "banana".
    pub target_class_id: i32,
    pub center_tolerance_px: f32,
    pub start_enabled: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { target_class_id: 46, center_tolerance_px: 80.0, start_enabled: false }
    }
}

/// First detection of the target class, in the order the detector reported them.
/// Confidence plays no part in choosing between several matches.
pub fn select_target(detections: &[Detection], target_class_id: i32) -> Option<&Detection> {
    detections.iter().find(|d| d.class_id == target_class_id)
}

/// Steering decision for one frame. Only horizontal centering is considered;
/// driving forward is assumed to close the distance.
pub fn decide(
    detections: &[Detection],
    frame_width: u32,
    target_class_id: i32,
    center_tolerance_px: f32,
) -> Command {
    let Some(target) = select_target(detections, target_class_id) else {
        return Command::Stop;
    };
    let offset = target.bbox.center_x() - frame_width as f32 / 2.0;

    if offset.abs() < center_tolerance_px {
        Command::Forward
    } else if offset < 0.0 {
        Command::Left
    } else {
        Command::Right
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    fn det(class_id: i32, x1: f32, x2: f32) -> Detection {
        Detection { class_id, bbox: BoundingBox::new(x1, 0.0, x2, 10.0), confidence: 0.9 }
    }

    /// Zero-width box centred at frame centre + offset.
    fn at_offset(frame_width: u32, offset: f32) -> Vec<Detection> {
        let cx = frame_width as f32 / 2.0 + offset;
        vec![det(46, cx, cx)]
    }

    #[test]
    fn same_input_same_command() {
        let dets = vec![det(3, 0.0, 50.0), det(46, 150.0, 190.0), det(46, 0.0, 10.0)];
        let first = decide(&dets, 200, 46, 80.0);
        for _ in 0..10 {
            assert_eq!(decide(&dets, 200, 46, 80.0), first);
        }
    }

    #[test]
    fn first_matching_detection_wins() {
        let dets = vec![det(46, 0.0, 10.0), det(46, 90.0, 100.0)];
        assert_eq!(decide(&dets, 100, 46, 80.0), Command::Forward);
        assert_eq!(select_target(&dets, 46), Some(&dets[0]));
    }

    #[test]
    fn first_match_ignores_higher_confidence_later_match() {
        let mut dets = vec![det(46, 0.0, 20.0), det(46, 180.0, 200.0)];
        dets[0].confidence = 0.31;
        dets[1].confidence = 0.99;
        assert_eq!(decide(&dets, 200, 46, 80.0), Command::Left);
    }

    #[test]
    fn no_target_means_stop() {
        assert_eq!(decide(&[], 640, 46, 80.0), Command::Stop);
        let others = vec![det(0, 300.0, 340.0), det(47, 0.0, 10.0)];
        assert_eq!(decide(&others, 640, 46, 80.0), Command::Stop);
    }

    #[test]
    fn inside_tolerance_drives_forward() {
        assert_eq!(decide(&at_offset(200, 0.0), 200, 46, 80.0), Command::Forward);
        assert_eq!(decide(&at_offset(200, 79.0), 200, 46, 80.0), Command::Forward);
        assert_eq!(decide(&at_offset(200, -79.0), 200, 46, 80.0), Command::Forward);
    }

    #[test]
    fn outside_tolerance_turns_toward_target() {
        assert_eq!(decide(&at_offset(200, -81.0), 200, 46, 80.0), Command::Left);
        assert_eq!(decide(&at_offset(200, 81.0), 200, 46, 80.0), Command::Right);
    }

    #[test]
    fn exact_tolerance_is_outside_the_band() {
        assert_eq!(decide(&at_offset(200, 80.0), 200, 46, 80.0), Command::Right);
        assert_eq!(decide(&at_offset(200, -80.0), 200, 46, 80.0), Command::Left);
    }

    #[test]
    fn non_zero_width_box_uses_its_centre() {
        // centre 150 in a 200px frame, offset 50
        assert_eq!(decide(&[det(46, 120.0, 180.0)], 200, 46, 40.0), Command::Right);
        assert_eq!(decide(&[det(46, 120.0, 180.0)], 200, 46, 60.0), Command::Forward);
    }
}
