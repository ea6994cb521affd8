use std::io::Cursor;

use anyhow::{Context, Result};
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};

use crate::{AnnotatedFrame, Detection, Frame};

const TARGET_COLOR: Rgb<u8> = Rgb([40, 220, 60]);
const OTHER_COLOR: Rgb<u8> = Rgb([255, 150, 0]);
const LINE_PX: u32 = 2;

/// Draws every detection box over a copy of the frame. The tracked class gets
/// its own color so the operator can tell what tracking would steer toward.
pub fn draw_detections(frame: &Frame, detections: &[Detection], target_class_id: i32) -> RgbImage {
    let mut img = frame.image.clone();
    for d in detections {
        let color = if d.class_id == target_class_id { TARGET_COLOR } else { OTHER_COLOR };
        draw_rect(&mut img, d, color);
    }
    img
}

pub fn encode_png(img: &RgbImage) -> Result<Bytes> {
    let mut buf = Cursor::new(Vec::with_capacity(img.as_raw().len() / 2));
    img.write_to(&mut buf, ImageFormat::Png).context("encode png")?;
    Ok(Bytes::from(buf.into_inner()))
}

pub fn annotate(frame: &Frame, detections: &[Detection], target_class_id: i32) -> Result<AnnotatedFrame> {
    let img = draw_detections(frame, detections, target_class_id);
    Ok(AnnotatedFrame {
        seq: frame.seq,
        width: img.width(),
        height: img.height(),
        png: encode_png(&img)?,
    })
}

fn draw_rect(img: &mut RgbImage, d: &Detection, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 { return; }
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max - 1);
    let x1 = clamp(d.bbox.x1, w);
    let x2 = clamp(d.bbox.x2, w);
    let y1 = clamp(d.bbox.y1, h);
    let y2 = clamp(d.bbox.y2, h);

    for t in 0..LINE_PX {
        for x in x1..=x2 {
            img.put_pixel(x, (y1 + t).min(h - 1), color);
            img.put_pixel(x, y2.saturating_sub(t), color);
        }
        for y in y1..=y2 {
            img.put_pixel((x1 + t).min(w - 1), y, color);
            img.put_pixel(x2.saturating_sub(t), y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    fn gray_frame(w: u32, h: u32) -> Frame {
        Frame::new(7, RgbImage::from_pixel(w, h, Rgb([10, 10, 10])))
    }

    fn det(class_id: i32, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection { class_id, bbox: BoundingBox::new(x1, y1, x2, y2), confidence: 0.8 }
    }

    #[test]
    fn target_and_other_boxes_use_distinct_colors() {
        let frame = gray_frame(64, 48);
        let img = draw_detections(&frame, &[det(46, 4.0, 4.0, 20.0, 20.0), det(1, 30.0, 10.0, 60.0, 40.0)], 46);
        assert_eq!(*img.get_pixel(4, 10), TARGET_COLOR);
        assert_eq!(*img.get_pixel(30, 20), OTHER_COLOR);
        // interior untouched
        assert_eq!(*img.get_pixel(12, 12), Rgb([10, 10, 10]));
        // source frame untouched
        assert_eq!(*frame.image.get_pixel(4, 10), Rgb([10, 10, 10]));
    }

    #[test]
    fn boxes_past_the_edge_are_clipped() {
        let frame = gray_frame(16, 16);
        let img = draw_detections(&frame, &[det(46, -10.0, -10.0, 100.0, 100.0)], 46);
        assert_eq!(*img.get_pixel(0, 0), TARGET_COLOR);
        assert_eq!(*img.get_pixel(15, 15), TARGET_COLOR);
    }

    #[test]
    fn annotated_frame_is_a_decodable_png() {
        let frame = gray_frame(32, 24);
        let out = annotate(&frame, &[det(46, 2.0, 2.0, 10.0, 10.0)], 46).unwrap();
        assert_eq!((out.seq, out.width, out.height), (7, 32, 24));
        assert_eq!(&out.png[..4], b"\x89PNG");
        let back = image::load_from_memory(&out.png).unwrap().to_rgb8();
        assert_eq!(*back.get_pixel(2, 5), TARGET_COLOR);
    }
}
