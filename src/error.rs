use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForensicsError {
    #[error("Image loading error: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Unsupported keypoint algorithm: {0} (expected BRISK, ORB or AKAZE)")]
    UnsupportedAlgorithm(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Image too small for analysis (minimum: {0}x{0})")]
    ImageTooSmall(u32),
}

impl From<ndarray::ShapeError> for ForensicsError {
    fn from(err: ndarray::ShapeError) -> Self {
        ForensicsError::AnalysisFailed(format!("array shape mismatch: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ForensicsError>;
