use crate::config::ImageTag;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Unable to decode {image} image: {source}")]
    Decode {
        image: ImageTag,
        #[source]
        source: image::ImageError,
    },

    #[error("No face detected in {image} image")]
    NoFace { image: ImageTag },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Face mesh detection failed on {image} image: {message}")]
    Detector { image: ImageTag, message: String },

    #[error("Unable to encode {name} image: {source}")]
    Encode {
        name: String,
        #[source]
        source: image::ImageError,
    },
}

impl AnalysisError {
    /// Errors only the caller can fix by sending different input.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AnalysisError::Input(_) | AnalysisError::Decode { .. } | AnalysisError::NoFace { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = AnalysisError::NoFace {
            image: ImageTag::Front,
        };
        assert_eq!(err.to_string(), "No face detected in front image");
        assert!(err.is_input_error());

        let err = AnalysisError::Config("bad map".to_string());
        assert!(!err.is_input_error());
    }
}
