use super::model::{Session, bounded_run, initialize_model};
use crate::config::ParsingConfig;
use crate::overlay::Overlay;
use crate::shapes::rect::PixelRect;
use anyhow::{Error, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use ndarray::{Array, Ix4};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{Level, debug, span, warn};

/// Per pixel class labels for a face image.
pub trait FaceSegmenter: Send + Sync {
    /// Class id mask at the model's working resolution.
    fn segment(&self, img: &RgbImage) -> Result<GrayImage>;
}

/// CelebAMask-HQ class colours, indexed by class id.
pub const PALETTE: [[u8; 3]; 19] = [
    [0, 0, 0],
    [0, 0, 128],
    [0, 0, 255],
    [0, 85, 0],
    [51, 0, 170],
    [0, 85, 255],
    [85, 0, 0],
    [221, 119, 0],
    [0, 85, 85],
    [85, 85, 0],
    [0, 51, 85],
    [128, 86, 52],
    [0, 128, 0],
    [255, 0, 0],
    [221, 170, 51],
    [255, 255, 0],
    [170, 255, 85],
    [85, 255, 170],
    [0, 255, 255],
];

const LEGEND_ROW: u32 = 26;
const LEGEND_WIDTH: u32 = 260;
const LEGEND_BG: Rgb<u8> = Rgb([18, 18, 18]);
const LEGEND_TEXT: Rgb<u8> = Rgb([220, 220, 220]);
const LEGEND_TEXT_SCALE: f32 = 0.5;

pub fn class_color(class: u8) -> Rgb<u8> {
    Rgb(PALETTE[class as usize % PALETTE.len()])
}

pub fn colorize(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        class_color(mask.get_pixel(x, y)[0])
    })
}

/// One swatch and caption per palette entry.
pub fn legend(overlay: &Overlay) -> RgbImage {
    let classes = PALETTE.len() as u32;
    let mut img = RgbImage::from_pixel(LEGEND_WIDTH, LEGEND_ROW * classes + 10, LEGEND_BG);

    for idx in 0..classes {
        let y = 5 + (idx * LEGEND_ROW) as i32;
        let swatch = PixelRect::new(8, y + 4, 32, y + 20);
        draw_filled_rect_mut(&mut img, swatch.into(), class_color(idx as u8));
        overlay.draw_text(
            &mut img,
            LEGEND_TEXT,
            (42, y + 18),
            LEGEND_TEXT_SCALE,
            &format!("Class {idx}"),
        );
    }

    img
}

/// BiSeNet face parsing on ONNX Runtime.
pub struct OrtFaceParser {
    model: Session,
    config: ParsingConfig,
    budget: Option<Duration>,
}

impl OrtFaceParser {
    pub fn new(
        model_path: &Path,
        threads: usize,
        config: ParsingConfig,
        budget: Option<Duration>,
    ) -> Result<OrtFaceParser> {
        Ok(OrtFaceParser {
            model: initialize_model(model_path, threads)?,
            config,
            budget,
        })
    }

    fn input(&self, img: &RgbImage) -> Array<f32, Ix4> {
        let size = self.config.input_size;
        let resized = imageops::resize(img, size, size, FilterType::Triangle);
        let mean = self.config.mean;
        let std = self.config.std;

        Array::from_shape_fn((1, 3, size as usize, size as usize), |(_, c, y, x)| {
            let v = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.;
            (v - mean[c]) / std[c]
        })
    }
}

impl FaceSegmenter for OrtFaceParser {
    fn segment(&self, img: &RgbImage) -> Result<GrayImage> {
        let span = span!(Level::DEBUG, "face_parser");
        let _guard = span.enter();

        let input = Tensor::from_array(self.input(img))?;
        let (options, _watchdog) = bounded_run(self.budget, "face parser")?;
        let outputs = self.model.run_with_options(
            ort::inputs![self.config.input_name.as_str() => input]?,
            &*options,
        )?;
        let logits = outputs[self.config.output_name.as_str()]
            .try_extract_tensor::<f32>()?
            .into_dimensionality::<Ix4>()?;

        let (_, classes, height, width) = logits.dim();
        debug!("Parsing output {classes} classes at {width}x{height}");
        if classes == 0 || classes > u8::MAX as usize + 1 {
            return Err(Error::msg(format!("Unexpected class count {classes}")));
        }
        if classes != self.config.class_count {
            warn!(
                "Parsing model returned {classes} classes, expected {}",
                self.config.class_count
            );
        }

        Ok(GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let mut best = 0;
            for c in 1..classes {
                if logits[[0, c, y, x]] > logits[[0, best, y, x]] {
                    best = c;
                }
            }
            Luma([best as u8])
        }))
    }
}

/// Loads the face parser on first use. A failed load is remembered, later
/// calls report the segmenter as unavailable without retrying.
pub struct LazyFaceParser {
    model_path: PathBuf,
    threads: usize,
    config: ParsingConfig,
    budget: Option<Duration>,
    parser: OnceLock<Option<OrtFaceParser>>,
}

impl LazyFaceParser {
    pub fn new(
        model_path: PathBuf,
        threads: usize,
        config: ParsingConfig,
        budget: Option<Duration>,
    ) -> LazyFaceParser {
        LazyFaceParser {
            model_path,
            threads,
            config,
            budget,
            parser: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Option<&OrtFaceParser> {
        self.parser
            .get_or_init(|| {
                let config = self.config.clone();
                match OrtFaceParser::new(&self.model_path, self.threads, config, self.budget) {
                    Ok(parser) => Some(parser),
                    Err(e) => {
                        warn!("Face parsing unavailable: {e:#}");
                        None
                    }
                }
            })
            .as_ref()
    }
}

impl FaceSegmenter for LazyFaceParser {
    fn segment(&self, img: &RgbImage) -> Result<GrayImage> {
        match self.get() {
            Some(parser) => parser.segment(img),
            None => Err(Error::msg(format!(
                "face parsing model {} failed to load",
                self.model_path.display()
            ))),
        }
    }
}
