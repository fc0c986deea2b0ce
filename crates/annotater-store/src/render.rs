//! Burn bounding boxes into a copy of the source image.

use annotater_core::{BoundingBox, PALETTE};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use tracing::debug;

use crate::StoreError;

const OUTLINE_PX: u32 = 3;
const JPEG_QUALITY: u8 = 95;

/// Clockwise rotation applied before the boxes are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Accepts any multiple of 90, negative values turning counter-clockwise.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        Some(match degrees.rem_euclid(360) {
            0 => Rotation::None,
            90 => Rotation::Cw90,
            180 => Rotation::Cw180,
            _ => Rotation::Cw270,
        })
    }

    fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Rotation::None => img,
            Rotation::Cw90 => img.rotate90(),
            Rotation::Cw180 => img.rotate180(),
            Rotation::Cw270 => img.rotate270(),
        }
    }
}

/// Decode `original`, rotate it, draw each box outline and re-encode as JPEG.
pub fn render_annotated(
    original: &[u8],
    boxes: &[BoundingBox],
    rotation: Rotation,
) -> Result<Vec<u8>, StoreError> {
    let img = rotation.apply(image::load_from_memory(original)?);
    let mut canvas = img.to_rgb8();

    for (i, b) in boxes.iter().enumerate() {
        let color = parse_color(&b.color).unwrap_or_else(|| palette_color(i));
        draw_outline(&mut canvas, b, color);
    }

    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        encoder.encode_image(&canvas)?;
    }
    debug!(
        width = canvas.width(),
        height = canvas.height(),
        boxes = boxes.len(),
        ?rotation,
        bytes = out.len(),
        "rendered annotated image"
    );
    Ok(out)
}

fn palette_color(index: usize) -> Rgb<u8> {
    parse_color(PALETTE[index % PALETTE.len()]).unwrap_or(Rgb([255, 0, 0]))
}

/// Outline `b`, clipped to the image.
fn draw_outline(canvas: &mut RgbImage, b: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = (i64::from(canvas.width()), i64::from(canvas.height()));
    let left = i64::from(b.x);
    let top = i64::from(b.y);
    let right = left + i64::from(b.width);
    let bottom = top + i64::from(b.height);
    if b.width == 0 || b.height == 0 || right <= 0 || bottom <= 0 || left >= w || top >= h {
        return;
    }
    let t = i64::from(OUTLINE_PX);

    let mut fill = |x0: i64, y0: i64, x1: i64, y1: i64| {
        for y in y0.max(0)..y1.min(h) {
            for x in x0.max(0)..x1.min(w) {
                canvas.put_pixel(x as u32, y as u32, color);
            }
        }
    };
    fill(left, top, right, (top + t).min(bottom));
    fill(left, (bottom - t).max(top), right, bottom);
    fill(left, top, (left + t).min(right), bottom);
    fill((right - t).max(left), top, right, bottom);
}

/// `#RRGGBB`, `#RGB`, `rgb(r, g, b)` / `rgba(...)` or a basic CSS name.
pub fn parse_color(s: &str) -> Option<Rgb<u8>> {
    let s = s.trim().to_ascii_lowercase();
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(inner) = s
        .strip_prefix("rgba(")
        .or_else(|| s.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let channels: Vec<u8> = inner
            .split(',')
            .take(3)
            .map(|c| c.trim().parse::<f64>().ok().map(|v| v.clamp(0.0, 255.0) as u8))
            .collect::<Option<_>>()?;
        return match channels.as_slice() {
            [r, g, b] => Some(Rgb([*r, *g, *b])),
            _ => None,
        };
    }
    let rgb = match s.as_str() {
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "lime" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "magenta" | "fuchsia" => [255, 0, 255],
        "cyan" | "aqua" => [0, 255, 255],
        "orange" => [255, 165, 0],
        "purple" => [128, 0, 128],
        "pink" => [255, 192, 203],
        "white" => [255, 255, 255],
        "black" => [0, 0, 0],
        "gray" | "grey" => [128, 128, 128],
        _ => return None,
    };
    Some(Rgb(rgb))
}

fn parse_hex(hex: &str) -> Option<Rgb<u8>> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => {
            let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            Some(Rgb([byte(0)?, byte(2)?, byte(4)?]))
        }
        3 => {
            let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
            Some(Rgb([nibble(0)?, nibble(1)?, nibble(2)?]))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn colors_parse() {
        assert_eq!(parse_color("#FF0000"), Some(Rgb([255, 0, 0])));
        assert_eq!(parse_color("#0f0"), Some(Rgb([0, 255, 0])));
        assert_eq!(parse_color("Red"), Some(Rgb([255, 0, 0])));
        assert_eq!(parse_color("rgb(1, 2, 3)"), Some(Rgb([1, 2, 3])));
        assert_eq!(parse_color("rgba(10,20,30,0.5)"), Some(Rgb([10, 20, 30])));
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("chartreuse-ish"), None);
    }

    #[test]
    fn rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0), Some(Rotation::None));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Cw90));
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Cw270));
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn output_is_jpeg_and_rotation_swaps_dimensions() {
        let jpeg = render_annotated(&png(40, 20), &[], Rotation::Cw90).unwrap();
        assert_eq!(&jpeg[..3], &[0xFF, 0xD8, 0xFF]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 40));
    }

    #[test]
    fn outline_is_drawn_and_clipped() {
        let mut canvas = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));
        let b = BoundingBox::new(2, 2, 10, 10, "blue");
        draw_outline(&mut canvas, &b, Rgb([0, 0, 255]));
        assert_eq!(canvas.get_pixel(2, 2), &Rgb([0, 0, 255]));
        assert_eq!(canvas.get_pixel(11, 6), &Rgb([0, 0, 255]));
        // interior untouched
        assert_eq!(canvas.get_pixel(7, 7), &Rgb([255, 255, 255]));

        let partly_outside = BoundingBox::new(-5, 15, 100, 100, "blue");
        draw_outline(&mut canvas, &partly_outside, Rgb([0, 0, 255]));
        assert_eq!(canvas.get_pixel(0, 15), &Rgb([0, 0, 255]));
    }

    #[test]
    fn undecodable_input_is_an_image_error() {
        let err = render_annotated(b"not an image", &[], Rotation::None).unwrap_err();
        assert!(matches!(err, StoreError::Image(_)));
    }
}
