use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod catalog;
pub mod semantic_map;

pub use catalog::{Catalog, ImageTag, MeasurementDef};
pub use semantic_map::SemanticMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub models_dir: PathBuf,
    pub detector_model: String,
    pub landmark_model: String,
    pub parsing_model: String,
    /// ORT intra-op threads per session
    pub threads: usize,
    pub detection_confidence: f32,
    pub max_faces: usize,
    pub parsing: ParsingConfig,
    /// Wall clock budget for a single model call. Unbounded when unset.
    pub inference_budget_ms: Option<u64>,
    pub landmark_map: Option<PathBuf>,
    pub measurement_catalog: Option<PathBuf>,
    /// Label font replacing the bundled DejaVu Sans
    pub font_path: Option<PathBuf>,
    pub debug_images: bool,
}

/// Settings tied to the deployed face parsing model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParsingConfig {
    pub input_size: u32,
    pub input_name: String,
    pub output_name: String,
    /// Label of the hair class in the model's output ordering.
    pub hair_class_id: u8,
    pub class_count: usize,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for ParsingConfig {
    fn default() -> Self {
        ParsingConfig {
            input_size: 512,
            input_name: "input".to_string(),
            output_name: "out".to_string(),
            hair_class_id: 1,
            class_count: 19,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            models_dir: PathBuf::from("./models"),
            detector_model: "mediapipe_face_detection_short_range.onnx".to_string(),
            landmark_model: "mediapipe_face_landmark.onnx".to_string(),
            parsing_model: "face_parsing_resnet34.onnx".to_string(),
            threads: num_cpus::get(),
            detection_confidence: 0.5,
            max_faces: 5,
            parsing: ParsingConfig::default(),
            inference_budget_ms: None,
            landmark_map: None,
            measurement_catalog: None,
            font_path: None,
            debug_images: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Config::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Config> {
        let config: Config = serde_json::from_str(raw)?;
        Ok(config)
    }

    pub fn model_path(&self, file: &str) -> PathBuf {
        self.models_dir.join(file)
    }

    pub fn inference_budget(&self) -> Option<Duration> {
        self.inference_budget_ms.map(Duration::from_millis)
    }

    pub fn semantic_map(&self) -> Result<SemanticMap> {
        match &self.landmark_map {
            Some(path) => SemanticMap::load(path),
            None => SemanticMap::bundled(),
        }
    }

    pub fn catalog(&self) -> Result<Catalog> {
        match &self.measurement_catalog {
            Some(path) => Catalog::load(path),
            None => Catalog::bundled(),
        }
    }
}
