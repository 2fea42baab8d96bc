use super::mapping::{MappedPoint, Points};
use super::model::run_within;
use super::parsing::{self, FaceSegmenter};
use crate::overlay::Overlay;
use crate::shapes::point::{Landmark, MeshPoint, PixelPoint};
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, span};

const HAIR_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const MIDLINE_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const TR_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// How the trichion was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrMethod {
    Hair,
    Fallback,
    None,
    Manual,
}

/// Outcome of asking the segmenter for a class mask.
#[derive(Debug, Clone)]
pub enum Segmentation {
    Mask(GrayImage),
    Unavailable(String),
}

impl Segmentation {
    /// Segment `img`, treating failures and overruns of `budget` as unavailable.
    /// The mask is scaled back to the size of `img`.
    pub fn run(
        segmenter: &Arc<dyn FaceSegmenter>,
        img: &RgbImage,
        budget: Option<Duration>,
    ) -> Segmentation {
        let segmenter = Arc::clone(segmenter);
        let input = img.clone();
        let result = run_within(budget, "face parsing", move || segmenter.segment(&input));

        match result {
            Ok(mask) if mask.dimensions() == img.dimensions() => Segmentation::Mask(mask),
            Ok(mask) => Segmentation::Mask(imageops::resize(
                &mask,
                img.width(),
                img.height(),
                FilterType::Nearest,
            )),
            Err(e) => {
                debug!("Hair segmentation unavailable: {e:#}");
                Segmentation::Unavailable(e.to_string())
            }
        }
    }

    pub fn mask(&self) -> Option<&GrayImage> {
        match self {
            Segmentation::Mask(mask) => Some(mask),
            Segmentation::Unavailable(_) => None,
        }
    }
}

/// Hairline position in integer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hairline {
    pub x: i64,
    pub y: i64,
    pub method: TrMethod,
}

impl Hairline {
    pub fn to_point(&self, width: u32, height: u32) -> MappedPoint {
        let (x, y) = (self.x as f64, self.y as f64);
        MappedPoint {
            index: None,
            pixel: PixelPoint::new(x, y),
            normalized: Landmark::new(x / width as f64, y / height as f64, 0.),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HairlineEstimate {
    pub method: TrMethod,
    pub point: Option<MappedPoint>,
    pub debug: BTreeMap<String, RgbImage>,
}

pub struct HairlineEstimator {
    hair_class_id: u8,
    budget: Option<Duration>,
}

impl HairlineEstimator {
    pub fn new(hair_class_id: u8, budget: Option<Duration>) -> HairlineEstimator {
        HairlineEstimator {
            hair_class_id,
            budget,
        }
    }

    /// Find the trichion on the front image. `debug` requests the diagnostic
    /// images, drawn with the given overlay.
    pub fn estimate<P: MeshPoint>(
        &self,
        segmenter: &Arc<dyn FaceSegmenter>,
        img: &RgbImage,
        points: &Points,
        mesh: &[P],
        debug: Option<&Overlay>,
    ) -> HairlineEstimate {
        let span = span!(Level::DEBUG, "hairline");
        let _guard = span.enter();

        let segmentation = Segmentation::run(segmenter, img, self.budget);
        let (width, height) = img.dimensions();

        let Some(hairline) = self.locate(segmentation.mask(), width, height, points, mesh) else {
            return HairlineEstimate {
                method: TrMethod::None,
                point: None,
                debug: BTreeMap::new(),
            };
        };
        debug!("Hairline {hairline:?}");

        HairlineEstimate {
            method: hairline.method,
            point: Some(hairline.to_point(width, height)),
            debug: match debug {
                Some(overlay) => self.debug_images(img, segmentation.mask(), &hairline, overlay),
                None => BTreeMap::new(),
            },
        }
    }

    /// Top of the hair on the facial midline, else the highest mesh point
    /// near the midline.
    pub fn locate<P: MeshPoint>(
        &self,
        mask: Option<&GrayImage>,
        width: u32,
        height: u32,
        points: &Points,
        mesh: &[P],
    ) -> Option<Hairline> {
        let x = midline_x(points, width);

        if let Some(y) = mask.and_then(|mask| self.scan_hair(mask, x)) {
            return Some(Hairline {
                x,
                y,
                method: TrMethod::Hair,
            });
        }

        fallback_y(mesh, x, width, height).map(|y| Hairline {
            x,
            y,
            method: TrMethod::Fallback,
        })
    }

    /// First row, top down, with a hair pixel near column `mid_x`.
    fn scan_hair(&self, mask: &GrayImage, mid_x: i64) -> Option<i64> {
        let width = mask.width() as i64;
        let radius = 3.max((width as f64 * 0.01) as i64);
        let x_start = (mid_x - radius).max(0);
        let x_end = (mid_x + radius).min(width - 1);
        if x_start > x_end {
            return None;
        }

        (0..mask.height())
            .find(|&y| {
                (x_start..=x_end).any(|x| mask.get_pixel(x as u32, y)[0] == self.hair_class_id)
            })
            .map(i64::from)
    }

    fn debug_images(
        &self,
        img: &RgbImage,
        mask: Option<&GrayImage>,
        hairline: &Hairline,
        overlay: &Overlay,
    ) -> BTreeMap<String, RgbImage> {
        let (width, height) = img.dimensions();
        let hair_mask = RgbImage::from_fn(width, height, |x, y| match mask {
            Some(mask) if mask.get_pixel(x, y)[0] == self.hair_class_id => HAIR_COLOR,
            _ => Rgb([0, 0, 0]),
        });

        let mut blended = RgbImage::from_fn(width, height, |x, y| {
            let a = img.get_pixel(x, y);
            let b = hair_mask.get_pixel(x, y);
            Rgb(std::array::from_fn(|c| {
                (a[c] as f32 * 0.65 + b[c] as f32 * 0.35).round().min(255.) as u8
            }))
        });
        let x = hairline.x as f32;
        draw_line_segment_mut(
            &mut blended,
            (x, 0.),
            (x, height.saturating_sub(1) as f32),
            MIDLINE_COLOR,
        );
        draw_filled_circle_mut(
            &mut blended,
            (saturate(hairline.x), saturate(hairline.y)),
            4,
            TR_COLOR,
        );

        let mut images = BTreeMap::new();
        images.insert("tr_hair_mask".to_string(), hair_mask);
        images.insert("tr_overlay".to_string(), blended);
        if let Some(mask) = mask {
            images.insert("tr_parsing".to_string(), parsing::colorize(mask));
            images.insert("tr_parsing_legend".to_string(), parsing::legend(overlay));
        }

        images
    }
}

/// Column of the facial midline: the nose tip, else nasion, else the image center.
pub fn midline_x(points: &Points, width: u32) -> i64 {
    points
        .get("Prn")
        .or_else(|| points.get("N"))
        .map(|p| p.pixel.x as i64)
        .unwrap_or(width as i64 / 2)
}

fn fallback_y<P: MeshPoint>(mesh: &[P], mid_x: i64, width: u32, height: u32) -> Option<i64> {
    let band = 5.max((width as f64 * 0.03) as i64);
    let row = |p: &P| (p.y() * height as f64) as i64;

    mesh.iter()
        .filter(|p| ((p.x() * width as f64) as i64 - mid_x).abs() <= band)
        .map(row)
        .min()
        .or_else(|| mesh.iter().map(row).min())
}

fn saturate(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Caller supplied trichion in normalized coordinates.
pub fn manual_trichion(x: f64, y: f64, width: u32, height: u32) -> MappedPoint {
    MappedPoint::synthesized(x, y, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Error, Result};
    use image::Luma;
    use std::thread;
    use std::time::Instant;

    struct NoParser;

    impl FaceSegmenter for NoParser {
        fn segment(&self, _img: &RgbImage) -> Result<GrayImage> {
            Err(Error::msg("no model"))
        }
    }

    struct FixedMask(GrayImage);

    impl FaceSegmenter for FixedMask {
        fn segment(&self, _img: &RgbImage) -> Result<GrayImage> {
            Ok(self.0.clone())
        }
    }

    // a parser stuck for longer than any budget in these tests
    struct SlowParser;

    impl FaceSegmenter for SlowParser {
        fn segment(&self, img: &RgbImage) -> Result<GrayImage> {
            thread::sleep(Duration::from_millis(800));
            Ok(hair_mask(img.width(), img.height(), 0, 0, img.width()))
        }
    }

    fn no_parser() -> Arc<dyn FaceSegmenter> {
        Arc::new(NoParser)
    }

    fn fixed_mask(mask: GrayImage) -> Arc<dyn FaceSegmenter> {
        Arc::new(FixedMask(mask))
    }

    fn points(entries: &[(&str, f64, f64)]) -> Points {
        entries
            .iter()
            .map(|(label, x, y)| {
                (
                    label.to_string(),
                    MappedPoint {
                        index: None,
                        pixel: PixelPoint::new(*x, *y),
                        normalized: Landmark::default(),
                    },
                )
            })
            .collect()
    }

    // hair class 1 from row `top` down, in columns [x0, x1)
    fn hair_mask(width: u32, height: u32, top: u32, x0: u32, x1: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if y >= top && x >= x0 && x < x1 {
                Luma([1])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_fallback_band() {
        let img = RgbImage::new(100, 200);
        let mesh = vec![
            Landmark::new(0.5, 0.4, 0.),
            Landmark::new(0.52, 0.3, 0.),
            // highest, but outside the band
            Landmark::new(0.9, 0.1, 0.),
        ];
        let estimator = HairlineEstimator::new(1, None);

        let estimate = estimator.estimate(&no_parser(), &img, &points(&[("N", 50.7, 90.)]), &mesh, None);
        assert_eq!(estimate.method, TrMethod::Fallback);
        let tr = estimate.point.unwrap();
        assert_eq!(tr.index, None);
        assert_eq!(tr.pixel, PixelPoint::new(50., 60.));
        assert_eq!(tr.normalized, Landmark::new(0.5, 0.3, 0.));
        assert!(estimate.debug.is_empty());
    }

    #[test]
    fn test_fallback_global_min() {
        let mesh = vec![Landmark::new(0.9, 0.4, 0.), Landmark::new(0.1, 0.35, 0.)];
        let estimator = HairlineEstimator::new(1, None);

        let hairline = estimator
            .locate(None, 100, 200, &Points::new(), &mesh)
            .unwrap();
        assert_eq!(
            hairline,
            Hairline {
                x: 50,
                y: 70,
                method: TrMethod::Fallback
            }
        );
    }

    #[test]
    fn test_nothing_found() {
        let img = RgbImage::new(100, 200);
        let mesh: Vec<Landmark> = Vec::new();
        let estimator = HairlineEstimator::new(1, None);

        let overlay = Overlay::bundled().unwrap();
        let estimate = estimator.estimate(&no_parser(), &img, &Points::new(), &mesh, Some(&overlay));
        assert_eq!(estimate.method, TrMethod::None);
        assert!(estimate.point.is_none());
        assert!(estimate.debug.is_empty());
    }

    #[test]
    fn test_hair_scan() {
        let estimator = HairlineEstimator::new(1, None);
        let mesh = vec![Landmark::new(0.5, 0.1, 0.)];
        let mask = hair_mask(100, 200, 30, 40, 60);

        let hairline = estimator
            .locate(Some(&mask), 100, 200, &points(&[("Prn", 52.2, 120.)]), &mesh)
            .unwrap();
        assert_eq!(
            hairline,
            Hairline {
                x: 52,
                y: 30,
                method: TrMethod::Hair
            }
        );
    }

    #[test]
    fn test_hair_outside_band() {
        // radius is max(3, 1% of width) = 3, hair starts 4 columns away
        let estimator = HairlineEstimator::new(1, None);
        let mesh = vec![Landmark::new(0.5, 0.1, 0.)];
        let mask = hair_mask(100, 200, 30, 54, 100);

        let hairline = estimator
            .locate(Some(&mask), 100, 200, &Points::new(), &mesh)
            .unwrap();
        assert_eq!(hairline.method, TrMethod::Fallback);
        assert_eq!(hairline.y, 20);
    }

    #[test]
    fn test_midline_priority() {
        let both = points(&[("Prn", 40.9, 0.), ("N", 60., 0.)]);
        assert_eq!(midline_x(&both, 100), 40);
        assert_eq!(midline_x(&points(&[("N", 60., 0.)]), 100), 60);
        assert_eq!(midline_x(&Points::new(), 101), 50);
    }

    #[test]
    fn test_mask_scaled_to_image() {
        let img = RgbImage::new(100, 200);
        let segmenter = fixed_mask(hair_mask(10, 20, 5, 0, 10));

        let segmentation = Segmentation::run(&segmenter, &img, None);
        let mask = segmentation.mask().unwrap();
        assert_eq!(mask.dimensions(), (100, 200));

        let estimator = HairlineEstimator::new(1, None);
        let mesh: Vec<Landmark> = Vec::new();
        let hairline = estimator
            .locate(Some(mask), 100, 200, &Points::new(), &mesh)
            .unwrap();
        assert_eq!(hairline.method, TrMethod::Hair);
        assert!((48..=52).contains(&hairline.y));
    }

    #[test]
    fn test_slow_parser_is_abandoned() {
        let img = RgbImage::new(100, 200);
        let segmenter: Arc<dyn FaceSegmenter> = Arc::new(SlowParser);

        let start = Instant::now();
        let segmentation = Segmentation::run(&segmenter, &img, Some(Duration::from_millis(30)));
        assert!(segmentation.mask().is_none());
        assert!(start.elapsed() < Duration::from_millis(400));

        let mesh = vec![Landmark::new(0.5, 0.1, 0.)];
        let estimator = HairlineEstimator::new(1, Some(Duration::from_millis(30)));
        let start = Instant::now();
        let estimate = estimator.estimate(&segmenter, &img, &Points::new(), &mesh, None);
        assert_eq!(estimate.method, TrMethod::Fallback);
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_parser_within_budget() {
        let img = RgbImage::new(100, 200);
        let segmenter = fixed_mask(hair_mask(100, 200, 30, 40, 60));
        let segmentation = Segmentation::run(&segmenter, &img, Some(Duration::from_secs(10)));
        assert!(segmentation.mask().is_some());
    }

    #[test]
    fn test_debug_images() {
        let img = RgbImage::from_pixel(100, 200, Rgb([100, 100, 100]));
        let mesh = vec![Landmark::new(0.5, 0.1, 0.)];
        let overlay = Overlay::bundled().unwrap();
        let estimator = HairlineEstimator::new(1, None);

        let segmenter = fixed_mask(hair_mask(100, 200, 30, 40, 60));
        let estimate = estimator.estimate(&segmenter, &img, &Points::new(), &mesh, Some(&overlay));
        assert_eq!(estimate.method, TrMethod::Hair);
        let keys: Vec<_> = estimate.debug.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["tr_hair_mask", "tr_overlay", "tr_parsing", "tr_parsing_legend"]
        );
        assert_eq!(estimate.debug["tr_hair_mask"].get_pixel(45, 100), &HAIR_COLOR);
        assert_eq!(estimate.debug["tr_hair_mask"].get_pixel(45, 10), &Rgb([0, 0, 0]));
        assert_eq!(estimate.debug["tr_overlay"].get_pixel(50, 0), &MIDLINE_COLOR);
        assert_eq!(estimate.debug["tr_overlay"].get_pixel(50, 30), &TR_COLOR);
        assert_eq!(estimate.debug["tr_overlay"].get_pixel(10, 10), &Rgb([65, 65, 65]));

        let estimate = estimator.estimate(&no_parser(), &img, &Points::new(), &mesh, Some(&overlay));
        assert_eq!(estimate.method, TrMethod::Fallback);
        let keys: Vec<_> = estimate.debug.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["tr_hair_mask", "tr_overlay"]);
    }

    #[test]
    fn test_manual_trichion() {
        let tr = manual_trichion(0.5, 0.25, 200, 400);
        assert_eq!(tr.index, None);
        assert_eq!(tr.pixel, PixelPoint::new(100., 100.));
        assert_eq!(tr.normalized, Landmark::new(0.5, 0.25, 0.));
    }
}
