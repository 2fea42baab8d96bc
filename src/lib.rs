pub mod config;
pub mod error;
pub mod overlay;
pub mod pipeline;
pub mod shapes;

pub use config::Config;
pub use error::AnalysisError;
pub use pipeline::{AnalysisResult, Gender, Pipeline};
