//! CPU drawing for streamed frames: boxes, bitmap-font labels and crops.

use anyhow::{Result, anyhow, ensure};
use detect_client::Detection;
use device_io::{Frame, FrameFormat};
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder, imageops};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKING: Rgb<u8> = Rgb([0, 0, 0]);
const DISEASE_COLOR: Rgb<u8> = Rgb([255, 220, 0]);
const GLYPH_ADVANCE: i32 = 6;
const LINE_HEIGHT: i32 = 10;

/// Convert a captured frame into an RGB image, swapping channels for BGR input.
pub(crate) fn frame_to_rgb(frame: &Frame) -> Result<RgbImage> {
    ensure!(
        frame.data.len() == frame.expected_len(),
        "frame carries {} bytes, expected {} for {}x{}",
        frame.data.len(),
        frame.expected_len(),
        frame.width,
        frame.height
    );

    let pixels = match frame.format {
        FrameFormat::Rgb8 => frame.data.clone(),
        FrameFormat::Bgr8 => {
            let mut output = Vec::with_capacity(frame.data.len());
            for chunk in frame.data.chunks_exact(3) {
                output.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
            }
            output
        }
    };
    RgbImage::from_vec(frame.width, frame.height, pixels)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// Copy the `[x1, y1, x2, y2]` region out of `image`, clamped to its bounds.
/// Returns `None` when nothing of the box lies inside the image.
pub(crate) fn crop_region(image: &RgbImage, bbox: [i32; 4]) -> Option<RgbImage> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = bbox[0].clamp(0, width);
    let top = bbox[1].clamp(0, height);
    let right = bbox[2].clamp(0, width);
    let bottom = bbox[3].clamp(0, height);
    if right <= left || bottom <= top {
        return None;
    }

    let view = imageops::crop_imm(
        image,
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    );
    Some(view.to_image())
}

/// Text shown above a detection box, e.g. `POTTED PLANT 87%`.
pub(crate) fn label_text(detection: &Detection) -> String {
    format!(
        "{} {:.0}%",
        detection.label.to_uppercase(),
        detection.score * 100.0
    )
}

pub(crate) fn draw_detection(image: &mut RgbImage, detection: &Detection) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    // Boxes come from the remote service; pin them to the frame before any
    // offset arithmetic.
    let x1 = detection.bbox[0].clamp(0, width - 1);
    let y1 = detection.bbox[1].clamp(0, height - 1);
    let x2 = detection.bbox[2].clamp(0, width - 1);
    let y2 = detection.bbox[3].clamp(0, height - 1);
    draw_rectangle(image, x1, y1, x2, y2, BOX_COLOR);
    draw_rectangle(image, x1 + 1, y1 + 1, x2 - 1, y2 - 1, BOX_COLOR);

    let mut lines = vec![(label_text(detection), BOX_COLOR)];
    if let Some(disease) = &detection.disease {
        lines.push((disease.disease_key.to_uppercase(), DISEASE_COLOR));
    }

    let block_height = lines.len() as i32 * LINE_HEIGHT;
    // Above the box when it fits, otherwise just inside its top edge.
    let mut y = if y1 - block_height >= 0 {
        y1 - block_height
    } else {
        y1 + 2
    };
    let x = x1;
    for (text, color) in lines {
        let text_width = (text.chars().count() as i32).saturating_mul(GLYPH_ADVANCE);
        fill_rect(
            image,
            x,
            y,
            x.saturating_add(text_width),
            y + LINE_HEIGHT - 2,
            LABEL_BACKING,
        );
        draw_label(image, x + 1, y + 1, &text, color);
        y += LINE_HEIGHT;
    }
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 || right < left || bottom < top {
        return;
    }
    // Edges outside the frame are pulled onto its border.
    let left = left.clamp(0, width - 1) as u32;
    let right = right.clamp(0, width - 1) as u32;
    let top = top.clamp(0, height - 1) as u32;
    let bottom = bottom.clamp(0, height - 1) as u32;

    for x in left..=right {
        image.put_pixel(x, top, color);
        image.put_pixel(x, bottom, color);
    }
    for y in top..=bottom {
        image.put_pixel(left, y, color);
        image.put_pixel(right, y, color);
    }
}

fn fill_rect(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for y in top.max(0)..=bottom.min(height - 1) {
        for x in left.max(0)..=right.min(width - 1) {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                let py = y + row as i32;
                if !(0..height).contains(&py) {
                    continue;
                }
                for col in 0..5 {
                    let px = x + col;
                    if (bits >> (4 - col)) & 1 == 1 && (0..width).contains(&px) {
                        image.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

/// 5x7 glyphs, one byte per row with the leftmost pixel in bit 4.
/// Characters without a glyph render as blanks.
fn glyph(ch: char) -> Option<&'static [u8; 7]> {
    GLYPHS
        .iter()
        .find(|(candidate, _)| *candidate == ch)
        .map(|(_, rows)| rows)
}

#[rustfmt::skip]
static GLYPHS: [(char, [u8; 7]); 43] = [
    ('A', [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11]),
    ('B', [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E]),
    ('C', [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E]),
    ('D', [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E]),
    ('E', [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x1F]),
    ('F', [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x10]),
    ('G', [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F]),
    ('H', [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11]),
    ('I', [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E]),
    ('J', [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C]),
    ('K', [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11]),
    ('L', [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F]),
    ('M', [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11]),
    ('N', [0x11, 0x19, 0x15, 0x15, 0x13, 0x11, 0x11]),
    ('O', [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E]),
    ('P', [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10]),
    ('Q', [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D]),
    ('R', [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11]),
    ('S', [0x0F, 0x10, 0x0E, 0x01, 0x01, 0x11, 0x0E]),
    ('T', [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04]),
    ('U', [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E]),
    ('V', [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04]),
    ('W', [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A]),
    ('X', [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11]),
    ('Y', [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04]),
    ('Z', [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F]),
    ('0', [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E]),
    ('1', [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E]),
    ('2', [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F]),
    ('3', [0x1E, 0x01, 0x01, 0x0E, 0x01, 0x01, 0x1E]),
    ('4', [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02]),
    ('5', [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E]),
    ('6', [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E]),
    ('7', [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08]),
    ('8', [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E]),
    ('9', [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C]),
    ('%', [0x11, 0x12, 0x04, 0x08, 0x12, 0x11, 0x00]),
    ('.', [0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x06]),
    (':', [0x00, 0x06, 0x06, 0x00, 0x06, 0x06, 0x00]),
    ('-', [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00]),
    ('_', [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F]),
    ('(', [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02]),
    (')', [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08]),
];

#[cfg(test)]
mod tests {
    use detect_client::DiseasePrediction;

    use super::*;
    use crate::rover::testing::{detection, test_frame};

    #[test]
    fn bgr_frames_are_swapped_to_rgb() {
        let frame = test_frame(4, 2);
        let image = frame_to_rgb(&frame).unwrap();
        assert_eq!(image.dimensions(), (4, 2));
        // test_frame stores B ramp, G=16, R=200.
        assert_eq!(image.get_pixel(0, 0), &Rgb([200, 16, 0]));
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let mut frame = test_frame(4, 2);
        frame.data.pop();
        assert!(frame_to_rgb(&frame).is_err());
    }

    #[test]
    fn encoded_jpeg_has_soi_marker() {
        let image = frame_to_rgb(&test_frame(16, 16)).unwrap();
        let jpeg = encode_jpeg(&image, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn crop_is_clamped_to_image_bounds() {
        let image = RgbImage::new(20, 10);
        let crop = crop_region(&image, [-5, 2, 8, 40]).unwrap();
        assert_eq!(crop.dimensions(), (8, 8));
    }

    #[test]
    fn degenerate_or_outside_boxes_have_no_crop() {
        let image = RgbImage::new(20, 10);
        assert!(crop_region(&image, [5, 5, 5, 9]).is_none());
        assert!(crop_region(&image, [30, 0, 40, 10]).is_none());
        assert!(crop_region(&image, [8, 6, 4, 2]).is_none());
    }

    #[test]
    fn box_is_two_pixels_thick() {
        let mut image = RgbImage::new(64, 64);
        let det = detection("dog", 18, 0.9, [10, 30, 40, 60]);
        draw_detection(&mut image, &det);

        assert_eq!(image.get_pixel(20, 30), &BOX_COLOR);
        assert_eq!(image.get_pixel(20, 31), &BOX_COLOR);
        assert_eq!(image.get_pixel(20, 32), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(40, 45), &BOX_COLOR);
        assert_eq!(image.get_pixel(39, 45), &BOX_COLOR);
        assert_eq!(image.get_pixel(25, 45), &Rgb([0, 0, 0]));
    }

    #[test]
    fn label_includes_rounded_percentage() {
        let det = detection("potted plant", 64, 0.876, [0, 0, 1, 1]);
        assert_eq!(label_text(&det), "POTTED PLANT 88%");
    }

    #[test]
    fn boxes_partially_off_frame_do_not_panic() {
        let mut image = RgbImage::new(16, 16);
        let mut det = detection("person", 1, 0.7, [-10, -10, 100, 100]);
        det.disease = Some(DiseasePrediction {
            class_id: 3,
            confidence: 0.8,
            disease_key: "tomato_late_blight".into(),
            disease_name: "Late blight".into(),
        });
        draw_detection(&mut image, &det);
        assert_eq!(image.get_pixel(0, 11), &BOX_COLOR);
        assert_eq!(image.get_pixel(15, 11), &BOX_COLOR);
    }

    #[test]
    fn saturated_service_boxes_are_pinned_to_the_frame() {
        let mut image = RgbImage::new(32, 24);
        let det = detection("dog", 18, 0.9, [i32::MAX, 5, i32::MAX, 20]);
        draw_detection(&mut image, &det);
        assert_eq!(image.get_pixel(31, 18), &BOX_COLOR);

        let det = detection("dog", 18, 0.9, [i32::MIN, i32::MIN, i32::MIN, i32::MIN]);
        draw_detection(&mut image, &det);
        assert_eq!(image.get_pixel(0, 0), &BOX_COLOR);
    }

    #[test]
    fn label_pixels_are_drawn_above_the_box() {
        let mut image = RgbImage::new(80, 60);
        let det = detection("cat", 17, 0.9, [5, 30, 70, 55]);
        draw_detection(&mut image, &det);
        let label_area_has_text =
            (20..30).any(|y| (5..60).any(|x| *image.get_pixel(x, y) == BOX_COLOR));
        assert!(label_area_has_text);
    }

    #[test]
    fn every_glyph_fits_five_columns() {
        for (_, rows) in GLYPHS.iter() {
            assert!(rows.iter().all(|row| *row < 0x20));
        }
    }
}
