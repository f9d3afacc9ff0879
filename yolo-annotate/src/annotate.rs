use std::io;
use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};

use crate::detector::ClassLabels;
use crate::Detection;

const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Draws detections onto copies of their source images.
///
/// Boxes are always drawn. Captions (`label confidence`) need a font;
/// without one only the boxes appear.
pub struct Annotator {
    font: Option<Font<'static>>,
    line_width: u32,
    font_scale: f32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            line_width: 2,
            font_scale: 16.0,
        }
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(mut self, font: Font<'static>) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_line_width(mut self, line_width: u32) -> Self {
        self.line_width = line_width.max(1);
        self
    }

    /// Reads a TrueType/OpenType font for captions
    pub fn load_font(path: impl AsRef<Path>) -> io::Result<Font<'static>> {
        let bytes = std::fs::read(path.as_ref())?;
        Font::try_from_vec(bytes).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a usable font", path.as_ref().display()),
            )
        })
    }

    /// Box color for a class, stable across frames
    pub fn color(class_id: usize) -> Rgb<u8> {
        Rgb(PALETTE[class_id % PALETTE.len()])
    }

    /// Returns a copy of `image` with every detection drawn on it. With no
    /// detections the copy is pixel-identical to the RGB source.
    pub fn annotate(
        &self,
        image: &DynamicImage,
        detections: &[Detection],
        labels: &ClassLabels,
    ) -> RgbImage {
        let mut canvas = image.to_rgb8();
        for detection in detections {
            let caption = format!(
                "{} {:.2}",
                labels.resolve(detection.class_id),
                detection.confidence
            );
            self.draw(&mut canvas, detection, &caption);
        }
        canvas
    }

    fn draw(&self, canvas: &mut RgbImage, detection: &Detection, caption: &str) {
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, (max - 1) as f32) as i32;
        let x1 = clamp(detection.x1, width);
        let y1 = clamp(detection.y1, height);
        let x2 = clamp(detection.x2, width).max(x1);
        let y2 = clamp(detection.y2, height).max(y1);
        let color = Self::color(detection.class_id);

        for t in 0..self.line_width as i32 {
            let (w, h) = (x2 - x1 + 1 - 2 * t, y2 - y1 + 1 - 2 * t);
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                canvas,
                Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32),
                color,
            );
        }

        if let Some(font) = &self.font {
            let scale = Scale::uniform(self.font_scale);
            let (text_w, text_h) = text_size(scale, font, caption);
            let tab_w = (text_w + 4).max(1);
            let tab_h = (text_h + 4).max(1);
            // Above the box when there is room, otherwise just inside it
            let tab_y = if y1 >= tab_h { y1 - tab_h } else { y1 };
            draw_filled_rect_mut(
                canvas,
                Rect::at(x1, tab_y).of_size(tab_w as u32, tab_h as u32),
                color,
            );
            draw_text_mut(canvas, TEXT_COLOR, x1 + 2, tab_y + 2, scale, font, caption);
        }
    }
}
