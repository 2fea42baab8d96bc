use super::detection;
use super::model::{Session, bounded_run, initialize_model};
use crate::shapes::point::Landmark;
use crate::shapes::rect::NormRect;
use anyhow::{Error, Result};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array;
use ort::value::Tensor;
use std::path::Path;
use std::time::Duration;
use tracing::{Level, debug, span};

pub struct FaceLandmarker {
    model: Session,
    budget: Option<Duration>,
}

const HEIGHT: u32 = 192;
const WIDTH: u32 = 192;
const MESH_POINTS: usize = 468;
// pad 25% on each side
const PADDING: f64 = 1.5;
// crop side never exceeds this multiple of the longer image side
const MAX_CROP: f64 = 2.;

/// Square region of the source image fed to the landmark model, in source
/// pixels. May extend past the image edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crop {
    pub left: i64,
    pub top: i64,
    pub size: u32,
}

impl Crop {
    pub fn around(bounds: &NormRect, width: u32, height: u32) -> Crop {
        let center = bounds.center();
        let cx = center.x * width as f64;
        let cy = center.y * height as f64;
        let size = (bounds.width() * width as f64)
            .max(bounds.height() * height as f64)
            * PADDING;
        let size = size
            .min(MAX_CROP * width.max(height) as f64)
            .round()
            .max(1.);

        Crop {
            left: (cx - size / 2.).round() as i64,
            top: (cy - size / 2.).round() as i64,
            size: size as u32,
        }
    }

    /// Map a point from model input space back to normalized image space.
    pub fn project(&self, x: f32, y: f32, z: f32, width: u32, height: u32) -> Landmark {
        let scale = self.size as f64 / WIDTH as f64;
        Landmark {
            x: (self.left as f64 + x as f64 * scale) / width as f64,
            y: (self.top as f64 + y as f64 * scale) / height as f64,
            z: z as f64 * scale / width as f64,
        }
    }
}

impl FaceLandmarker {
    pub fn new(
        model_path: &Path,
        threads: usize,
        budget: Option<Duration>,
    ) -> Result<FaceLandmarker> {
        Ok(FaceLandmarker {
            model: initialize_model(model_path, threads)?,
            budget,
        })
    }

    pub fn run(&self, img: &RgbImage, face: &detection::Face) -> Result<Vec<Landmark>> {
        let span = span!(Level::DEBUG, "face_landmarker");
        let _guard = span.enter();

        let crop = Crop::around(&face.bounds, img.width(), img.height());
        debug!("Landmark crop {crop:?}");

        // face_img - img cropped to the padded face, black outside the image
        let mut face_img = RgbImage::new(crop.size, crop.size);
        imageops::overlay(&mut face_img, img, -crop.left, -crop.top);

        let input_img = imageops::resize(&face_img, WIDTH, HEIGHT, FilterType::Triangle);
        let input_arr =
            Array::from_shape_fn((1, HEIGHT as usize, WIDTH as usize, 3), |(_, y, x, c)| {
                input_img.get_pixel(x as u32, y as u32)[c] as f32 / 255. // 0. - 1. range
            });

        let input = Tensor::from_array(input_arr)?;
        let (options, _watchdog) = bounded_run(self.budget, "face landmarker")?;
        let outputs = self
            .model
            .run_with_options(ort::inputs!["input_1" => input]?, &*options)?;
        let output = outputs["conv2d_21"].try_extract_tensor::<f32>()?;
        let mesh: Vec<f32> = output.iter().copied().collect();

        extract_mesh(&mesh, &crop, img.width(), img.height())
    }
}

fn extract_mesh(mesh: &[f32], crop: &Crop, width: u32, height: u32) -> Result<Vec<Landmark>> {
    if mesh.len() != MESH_POINTS * 3 {
        return Err(Error::msg(format!(
            "Unexpected landmark output length {}",
            mesh.len()
        )));
    }

    Ok(mesh
        .chunks_exact(3)
        .map(|p| crop.project(p[0], p[1], p[2], width, height))
        .collect())
}
