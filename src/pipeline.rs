use crate::config::{Catalog, Config, ImageTag, SemanticMap};
use crate::error::{AnalysisError, Result};
use crate::overlay::{Overlay, encode_png};
use hairline::{HairlineEstimate, HairlineEstimator, TrMethod, manual_trichion};
use image::{DynamicImage, ImageDecoder, ImageReader, ImageResult, RgbImage};
use mapping::{LandmarkEntry, map_points, mandatory_landmarks};
use measurements::{Measurement, Ratio, compute_measurements, compute_ratios};
use mesh::{Mesh, MeshDetector, OrtMeshDetector};
use model::run_within;
use parsing::{FaceSegmenter, LazyFaceParser};
use selection::select_face;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, info, span, warn};

mod detection;
pub mod hairline;
mod landmarks;
pub mod mapping;
pub mod measurements;
pub mod mesh;
mod model;
pub mod parsing;
pub mod selection;

pub const MULTIPLE_FRONT_FACES: &str =
    "Multiple faces detected in front image; selected the most central/largest face.";
pub const MULTIPLE_SIDE_FACES: &str =
    "Multiple faces detected in side image; selected the most central/largest face.";
pub const NO_SIDE_FACE: &str = "No face detected in side image; side measurements are unavailable.";
pub const TR_UNAVAILABLE: &str =
    "Trichion (Tr) unavailable; hairline segmentation did not return a result.";
pub const TR_FALLBACK: &str = "Trichion (Tr) estimated with geometric fallback (no hair detected).";
pub const TR_MANUAL: &str = "Trichion (Tr) set manually.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Nonbinary,
    PreferNotToSay,
}

impl FromStr for Gender {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Gender> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "nonbinary" => Ok(Gender::Nonbinary),
            "prefer_not_to_say" => Ok(Gender::PreferNotToSay),
            _ => Err(AnalysisError::Input(format!(
                "gender must be one of male, female, nonbinary, prefer_not_to_say, got {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    /// Mesh size of the selected front face
    pub all_landmarks_count: usize,
    pub gender: Option<Gender>,
    pub tr_method: TrMethod,
    pub mandatory_landmarks: Vec<LandmarkEntry>,
    pub measurements: Vec<Measurement>,
    pub ratios: Vec<Ratio>,
    /// PNG encoded images keyed by name
    #[serde(skip)]
    pub annotated_images: BTreeMap<String, Vec<u8>>,
    pub warnings: Vec<String>,
}

pub struct Pipeline {
    detector: Arc<dyn MeshDetector>,
    segmenter: Arc<dyn FaceSegmenter>,
    semantic_map: SemanticMap,
    catalog: Catalog,
    overlay: Overlay,
    hairline: HairlineEstimator,
    budget: Option<Duration>,
    debug_images: bool,
}

impl Pipeline {
    /// Pipeline backed by the ONNX models named in `config`. The face parser
    /// is loaded on first use.
    pub fn from_config(config: &Config) -> Result<Pipeline> {
        let detector = OrtMeshDetector::new(config)
            .map_err(|e| AnalysisError::Config(format!("{e:#}")))?;
        let segmenter = LazyFaceParser::new(
            config.model_path(&config.parsing_model),
            config.threads,
            config.parsing.clone(),
            config.inference_budget(),
        );

        Pipeline::new(config, Arc::new(detector), Arc::new(segmenter))
    }

    pub fn new(
        config: &Config,
        detector: Arc<dyn MeshDetector>,
        segmenter: Arc<dyn FaceSegmenter>,
    ) -> Result<Pipeline> {
        let semantic_map = config
            .semantic_map()
            .map_err(|e| AnalysisError::Config(format!("{e:#}")))?;
        let catalog = config
            .catalog()
            .map_err(|e| AnalysisError::Config(format!("{e:#}")))?;
        let overlay =
            Overlay::from_config(config).map_err(|e| AnalysisError::Config(format!("{e:#}")))?;

        Ok(Pipeline {
            detector,
            segmenter,
            semantic_map,
            catalog,
            overlay,
            hairline: HairlineEstimator::new(
                config.parsing.hair_class_id,
                config.inference_budget(),
            ),
            budget: config.inference_budget(),
            debug_images: config.debug_images,
        })
    }

    pub fn semantic_map(&self) -> &SemanticMap {
        &self.semantic_map
    }

    /// Landmarks, measurements and ratios for a front and side photograph.
    /// `manual_tr` is a normalized (x, y) that replaces the estimated trichion.
    pub fn analyze(
        &self,
        front: &[u8],
        side: &[u8],
        manual_tr: Option<(f64, f64)>,
        gender: Option<&str>,
    ) -> Result<AnalysisResult> {
        let span = span!(Level::INFO, "analyze");
        let _guard = span.enter();

        if let Some((x, y)) = manual_tr {
            if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
                return Err(AnalysisError::Input(format!(
                    "manual trichion ({x}, {y}) must lie within [0, 1]"
                )));
            }
        }
        let gender = gender.map(Gender::from_str).transpose()?;

        let front_img = decode(ImageTag::Front, front)?;
        let side_img = decode(ImageTag::Side, side)?;

        let front_faces = self.detect(ImageTag::Front, &front_img)?;
        let front_face = select_face(&front_faces).ok_or(AnalysisError::NoFace {
            image: ImageTag::Front,
        })?;
        let side_faces = self.detect(ImageTag::Side, &side_img)?;
        let side_face = select_face(&side_faces);

        let (width, height) = front_img.dimensions();
        let mut front_points = map_points(front_face.mesh, &self.semantic_map, width, height);
        let side_points = match &side_face {
            Some(face) => map_points(
                face.mesh,
                &self.semantic_map,
                side_img.width(),
                side_img.height(),
            ),
            None => Default::default(),
        };

        let hairline = match manual_tr {
            Some((x, y)) => HairlineEstimate {
                method: TrMethod::Manual,
                point: Some(manual_trichion(x, y, width, height)),
                debug: BTreeMap::new(),
            },
            None => self.hairline.estimate(
                &self.segmenter,
                &front_img,
                &front_points,
                front_face.mesh,
                self.debug_images.then_some(&self.overlay),
            ),
        };
        if let Some(tr) = hairline.point {
            front_points.insert("Tr_R".to_string(), tr);
            front_points.insert("Tr_L".to_string(), tr);
        }

        let mandatory_landmarks =
            mandatory_landmarks(&self.semantic_map, &front_points, &side_points);
        let measurements = compute_measurements(&self.catalog, &front_points, &side_points);
        let ratios = compute_ratios(&measurements);

        let mut images: BTreeMap<String, RgbImage> = BTreeMap::new();
        images.insert(
            "front".to_string(),
            self.overlay.draw_landmarks(&front_img, &front_points),
        );
        images.insert(
            "front_all".to_string(),
            self.overlay.draw_all_landmarks(&front_img, front_face.mesh),
        );
        let (side, side_all) = match &side_face {
            Some(face) if !side_points.is_empty() => (
                self.overlay.draw_landmarks(&side_img, &side_points),
                self.overlay.draw_all_landmarks(&side_img, face.mesh),
            ),
            Some(face) => (
                side_img.clone(),
                self.overlay.draw_all_landmarks(&side_img, face.mesh),
            ),
            None => (side_img.clone(), side_img.clone()),
        };
        images.insert("side".to_string(), side);
        images.insert("side_all".to_string(), side_all);
        images.extend(hairline.debug);

        let mut annotated_images = BTreeMap::new();
        for (name, img) in images {
            let png = encode_png(&name, &img)?;
            annotated_images.insert(name, png);
        }

        let mut warnings = Vec::new();
        if front_faces.len() > 1 {
            warnings.push(MULTIPLE_FRONT_FACES);
        }
        if side_faces.len() > 1 {
            warnings.push(MULTIPLE_SIDE_FACES);
        }
        if side_face.is_none() {
            warnings.push(NO_SIDE_FACE);
        }
        match (hairline.point, hairline.method) {
            (None, _) => warnings.push(TR_UNAVAILABLE),
            (Some(_), TrMethod::Fallback) => warnings.push(TR_FALLBACK),
            (Some(_), TrMethod::Manual) => warnings.push(TR_MANUAL),
            _ => {}
        }
        for warning in &warnings {
            warn!("{warning}");
        }

        info!(
            "Analyzed {} measurements, Tr by {:?}",
            measurements.iter().filter(|m| m.value.is_some()).count(),
            hairline.method
        );

        Ok(AnalysisResult {
            all_landmarks_count: front_face.mesh.len(),
            gender,
            tr_method: hairline.method,
            mandatory_landmarks,
            measurements,
            ratios,
            annotated_images,
            warnings: warnings.into_iter().map(String::from).collect(),
        })
    }

    fn detect(&self, image: ImageTag, img: &RgbImage) -> Result<Vec<Mesh>> {
        let detector = Arc::clone(&self.detector);
        let img = img.clone();
        let faces = run_within(self.budget, "face mesh", move || detector.detect(&img))
            .map_err(|e| AnalysisError::Detector {
                image,
                message: format!("{e:#}"),
            })?;
        debug!("{} face(s) in {image} image", faces.len());

        Ok(faces)
    }
}

fn decode(image: ImageTag, bytes: &[u8]) -> Result<RgbImage> {
    let img = decode_upright(bytes).map_err(|source| AnalysisError::Decode { image, source })?;
    Ok(img.to_rgb8())
}

/// Decode and apply the EXIF orientation, so pixels match what a viewer shows.
fn decode_upright(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender() {
        assert_eq!("male".parse::<Gender>().unwrap(), Gender::Male);
        assert_eq!(
            "prefer_not_to_say".parse::<Gender>().unwrap(),
            Gender::PreferNotToSay
        );
        assert!("Male".parse::<Gender>().is_err());
        assert_eq!(
            serde_json::to_string(&Gender::PreferNotToSay).unwrap(),
            "\"prefer_not_to_say\""
        );
        assert_eq!(serde_json::to_string(&Gender::Nonbinary).unwrap(), "\"nonbinary\"");
    }

    #[test]
    fn test_decode_error() {
        let err = decode(ImageTag::Side, b"not an image").unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Decode {
                image: ImageTag::Side,
                ..
            }
        ));
        assert!(err.is_input_error());
    }

    // 16x8 JPEG tagged "rotate 90 clockwise" in an EXIF APP1 segment
    fn rotated_jpeg() -> Vec<u8> {
        let img = RgbImage::from_fn(16, 8, |x, _| {
            if x < 8 { image::Rgb([250, 250, 250]) } else { image::Rgb([5, 5, 5]) }
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();
        let jpeg = buf.into_inner();

        let mut app1 = vec![0xFF, 0xE1, 0x00, 34];
        app1.extend_from_slice(b"Exif\0\0");
        app1.extend_from_slice(b"MM\0*");
        app1.extend_from_slice(&[0, 0, 0, 8]);
        app1.extend_from_slice(&[0, 1]);
        // orientation tag, SHORT, count 1, value 6
        app1.extend_from_slice(&[0x01, 0x12, 0, 3, 0, 0, 0, 1, 0, 6, 0, 0]);
        app1.extend_from_slice(&[0, 0, 0, 0]);

        let mut tagged = jpeg[..2].to_vec();
        tagged.extend(app1);
        tagged.extend_from_slice(&jpeg[2..]);
        tagged
    }

    #[test]
    fn test_decode_applies_orientation() {
        let img = decode(ImageTag::Front, &rotated_jpeg()).unwrap();
        assert_eq!(img.dimensions(), (8, 16));
        // the light left half ends up on top
        assert!(img.get_pixel(4, 2)[0] > 200);
        assert!(img.get_pixel(4, 13)[0] < 50);
    }
}
