use super::model::{Session, bounded_run, initialize_model};
use crate::shapes::point::PixelPoint;
use crate::shapes::rect::NormRect;
use anchors::gen_anchors;
use anyhow::{Error, Result};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array;
use ort::session::SessionOutputs;
use ort::value::Tensor;
use std::path::Path;
use std::time::Duration;
use tracing::{Level, span, trace};

mod anchors;

const WIDTH: u32 = 128;
const HEIGHT: u32 = 128;
// values per anchor: box (4) + 6 keypoints (12)
const REGRESSOR_LEN: usize = 16;
// detections overlapping more than this are the same face
const OVERLAP_PCT: f64 = 30.;

pub struct FaceDetector {
    model: Session,
    anchors: Vec<PixelPoint>,
    min_confidence: f32,
    max_faces: usize,
    budget: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Face {
    /// Normalized to the full input image
    pub bounds: NormRect,
    pub confidence: f32,
}

impl FaceDetector {
    /*
    BlazeFace short range, run on the whole image stretched to 128x128.

    Model Input: 1x128x128x3 f32 image in [-1, 1]
    Model Output:
    - classificators: 896 raw scores, one per anchor
    - regressors: 896x16 offsets. The first 4 are the box center and size
      in input pixels relative to the anchor, the remaining 12 are keypoints.
     */
    pub fn new(
        model_path: &Path,
        threads: usize,
        min_confidence: f32,
        max_faces: usize,
        budget: Option<Duration>,
    ) -> Result<FaceDetector> {
        Ok(FaceDetector {
            model: initialize_model(model_path, threads)?,
            anchors: gen_anchors(WIDTH),
            min_confidence,
            max_faces,
            budget,
        })
    }

    pub fn run(&self, img: &RgbImage) -> Result<Vec<Face>> {
        let span = span!(Level::DEBUG, "face_detector");
        let _guard = span.enter();

        let resized = imageops::resize(img, WIDTH, HEIGHT, FilterType::Triangle);
        let input_arr =
            Array::from_shape_fn((1, HEIGHT as usize, WIDTH as usize, 3), |(_, y, x, c)| {
                resized.get_pixel(x as u32, y as u32)[c] as f32 / 127.5 - 1.
            });

        let input = Tensor::from_array(input_arr)?;
        let (options, _watchdog) = bounded_run(self.budget, "face detector")?;
        let outputs = self
            .model
            .run_with_options(ort::inputs!["input" => input]?, &*options)?;
        self.extract_results(outputs)
    }

    fn extract_results(&self, outputs: SessionOutputs) -> Result<Vec<Face>> {
        let regressors = outputs["regressors"].try_extract_tensor::<f32>()?;
        let classificators = outputs["classificators"].try_extract_tensor::<f32>()?;

        let regressors: Vec<f32> = regressors.iter().copied().collect();
        let scores: Vec<f32> = classificators.iter().copied().collect();

        let faces = decode(
            &regressors,
            &scores,
            &self.anchors,
            self.min_confidence,
            self.max_faces,
        )?;
        trace!("Detected {} faces", faces.len());

        Ok(faces)
    }
}

/// Turn raw model output into at most `max_faces` non overlapping faces,
/// most confident first.
pub fn decode(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[PixelPoint],
    min_confidence: f32,
    max_faces: usize,
) -> Result<Vec<Face>> {
    if scores.len() != anchors.len() || regressors.len() != anchors.len() * REGRESSOR_LEN {
        return Err(Error::msg(format!(
            "Unexpected detector output: {} scores, {} regressors for {} anchors",
            scores.len(),
            regressors.len(),
            anchors.len()
        )));
    }

    let mut candidates: Vec<Face> = Vec::new();
    for (idx, (raw, anchor)) in scores.iter().zip(anchors).enumerate() {
        let confidence = sigmoid_stable(*raw);
        if confidence < min_confidence {
            continue;
        }

        let res = &regressors[idx * REGRESSOR_LEN..(idx + 1) * REGRESSOR_LEN];
        let bounds = NormRect::from_center(
            anchor.x + res[0] as f64 / WIDTH as f64,
            anchor.y + res[1] as f64 / HEIGHT as f64,
            res[2] as f64 / WIDTH as f64,
            res[3] as f64 / HEIGHT as f64,
        );
        candidates.push(Face { bounds, confidence });
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut results: Vec<Face> = Vec::new();
    for face in candidates {
        if results.len() >= max_faces {
            break;
        }
        let better_found = results
            .iter()
            .any(|kept| kept.bounds.overlap_pct(&face.bounds) > OVERLAP_PCT);
        if !better_found {
            results.push(face);
        }
    }

    Ok(results)
}

fn sigmoid_stable(x: f32) -> f32 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        x.exp() / (1. + x.exp())
    }
}
