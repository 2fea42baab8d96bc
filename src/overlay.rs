use crate::config::Config;
use crate::error::{AnalysisError, Result};
use crate::pipeline::mapping::Points;
use crate::shapes::point::MeshPoint;
use crate::shapes::rect::PixelRect;
use ab_glyph::{Font, FontArc, FontVec, PxScale, ScaleFont};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut, text_size};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

const POINT_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const MESH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

// pixel height of text at scale 1.0
const TEXT_PX: f32 = 30.;

const BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Placement of a label box relative to the point it names.
struct LabelStyle {
    scale: f32,
    offset: i32,
    pad_x: i32,
    pad_bottom: i32,
    inset: (i32, i32),
}

/// Draws landmark annotations.
pub struct Overlay {
    font: FontArc,
}

impl Overlay {
    pub fn new(font: FontArc) -> Overlay {
        Overlay { font }
    }

    /// Overlay using the DejaVu Sans copy compiled into the binary.
    pub fn bundled() -> anyhow::Result<Overlay> {
        Ok(Overlay::new(FontArc::try_from_slice(BUNDLED_FONT)?))
    }

    /// The configured `font_path`, or the bundled font when unset or unreadable.
    pub fn from_config(config: &Config) -> anyhow::Result<Overlay> {
        let Some(path) = &config.font_path else {
            return Overlay::bundled();
        };

        match load_font(path) {
            Ok(font) => {
                debug!("Label font {}", path.display());
                Ok(Overlay::new(FontArc::new(font)))
            }
            Err(e) => {
                warn!("Unable to load font {}, using bundled font: {e:#}", path.display());
                Overlay::bundled()
            }
        }
    }

    /// Copy of `img` with a marker and label for every named point.
    pub fn draw_landmarks(&self, img: &RgbImage, points: &Points) -> RgbImage {
        let mut canvas = img.clone();
        let style = LabelStyle {
            scale: (img.width() as f32 / 1200.).clamp(0.4, 0.7),
            offset: 6,
            pad_x: 4,
            pad_bottom: 4,
            inset: (2, 3),
        };

        for (label, point) in points {
            let at = point.pixel.truncated();
            draw_filled_circle_mut(&mut canvas, at, 3, POINT_COLOR);
            self.draw_label(&mut canvas, at, &style, label);
        }

        canvas
    }

    /// Copy of `img` with every mesh point marked with its index.
    pub fn draw_all_landmarks<P: MeshPoint>(&self, img: &RgbImage, mesh: &[P]) -> RgbImage {
        let mut canvas = img.clone();
        let style = LabelStyle {
            scale: (img.width() as f32 / 1400.).clamp(0.35, 0.55),
            offset: 2,
            pad_x: 2,
            pad_bottom: 0,
            inset: (1, 2),
        };

        for (index, point) in mesh.iter().enumerate() {
            let at = point.to_pixel(img.width(), img.height()).truncated();
            draw_filled_circle_mut(&mut canvas, at, 1, MESH_COLOR);
            self.draw_label(&mut canvas, at, &style, &index.to_string());
        }

        canvas
    }

    /// Draw `text` with its baseline starting at `origin`.
    pub fn draw_text(
        &self,
        canvas: &mut RgbImage,
        color: Rgb<u8>,
        origin: (i32, i32),
        scale: f32,
        text: &str,
    ) {
        let px = PxScale::from(scale * TEXT_PX);
        let ascent = self.font.as_scaled(px).ascent().round() as i32;
        draw_text_mut(canvas, color, origin.0, origin.1 - ascent, px, &self.font, text);
    }

    /// Width, height above the baseline and depth below it, in pixels.
    fn text_metrics(&self, scale: f32, text: &str) -> (i32, i32, i32) {
        let px = scale * TEXT_PX;
        let height = (px * 0.7).round() as i32;
        let baseline = (px * 0.2).round() as i32;
        let width = text_size(PxScale::from(px), &self.font, text).0 as i32;

        (width, height, baseline)
    }

    fn draw_label(&self, canvas: &mut RgbImage, at: (i32, i32), style: &LabelStyle, text: &str) {
        let (tw, th, baseline) = self.text_metrics(style.scale, text);
        let (px, py) = at;
        let x1 = px + style.offset;
        let label = PixelRect::new(
            x1,
            py - style.offset - th - baseline,
            x1 + tw + style.pad_x,
            py - style.offset + style.pad_bottom,
        )
        .clamp(canvas.width(), canvas.height());

        draw_filled_rect_mut(canvas, label.into(), BOX_COLOR);
        self.draw_text(
            canvas,
            TEXT_COLOR,
            (label.x1 + style.inset.0, label.y2 - style.inset.1),
            style.scale,
            text,
        );
    }
}

pub fn load_font(path: &Path) -> anyhow::Result<FontVec> {
    let bytes = std::fs::read(path)?;
    Ok(FontVec::try_from_vec(bytes)?)
}

pub fn encode_png(name: &str, img: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|source| AnalysisError::Encode {
            name: name.to_string(),
            source,
        })?;

    Ok(buf.into_inner())
}
