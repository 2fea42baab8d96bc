use super::detection::FaceDetector;
use super::landmarks::FaceLandmarker;
use crate::config::Config;
use crate::shapes::point::Landmark;
use anyhow::Result;
use image::RgbImage;
use tracing::{Level, span, trace};

/// Dense face mesh for one detected face, index stable across faces.
pub type Mesh = Vec<Landmark>;

/// Finds every face in an image and returns its mesh. An empty result means
/// no face was found.
pub trait MeshDetector: Send + Sync {
    fn detect(&self, img: &RgbImage) -> Result<Vec<Mesh>>;
}

/// MediaPipe face detection followed by face mesh, both on ONNX Runtime.
pub struct OrtMeshDetector {
    face_detector: FaceDetector,
    face_landmarker: FaceLandmarker,
}

impl OrtMeshDetector {
    pub fn new(config: &Config) -> Result<OrtMeshDetector> {
        Ok(OrtMeshDetector {
            face_detector: FaceDetector::new(
                &config.model_path(&config.detector_model),
                config.threads,
                config.detection_confidence,
                config.max_faces,
                config.inference_budget(),
            )?,
            face_landmarker: FaceLandmarker::new(
                &config.model_path(&config.landmark_model),
                config.threads,
                config.inference_budget(),
            )?,
        })
    }
}

impl MeshDetector for OrtMeshDetector {
    fn detect(&self, img: &RgbImage) -> Result<Vec<Mesh>> {
        let span = span!(Level::DEBUG, "mesh_detector");
        let _guard = span.enter();

        let faces = self.face_detector.run(img)?;
        let mut meshes = Vec::with_capacity(faces.len());
        for face in faces {
            trace!("Face bound: {face:?}");
            meshes.push(self.face_landmarker.run(img, &face)?);
        }

        Ok(meshes)
    }
}
