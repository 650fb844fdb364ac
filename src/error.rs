/// Convenience result type used across Medley.
pub type MedleyResult<T> = Result<T, MedleyError>;

/// Top-level error taxonomy used by frame-core APIs.
#[derive(thiserror::Error, Debug)]
pub enum MedleyError {
    /// Invalid caller-provided parameters or profile data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors while producing or converting an image payload.
    #[error("image error: {0}")]
    Image(String),

    /// Errors while producing or converting an audio payload.
    #[error("audio error: {0}")]
    Audio(String),

    /// Errors while reading or writing frame data on disk.
    #[error("io error: {0}")]
    Io(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MedleyError {
    /// Build a [`MedleyError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`MedleyError::Image`] value.
    pub fn image(msg: impl Into<String>) -> Self {
        Self::Image(msg.into())
    }

    /// Build a [`MedleyError::Audio`] value.
    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio(msg.into())
    }

    /// Build a [`MedleyError::Io`] value.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }
}
