use vignette_contracts::history::EmptyHistory;
use vignette_contracts::images::ImageRefError;

pub type PortraitResult<T> = Result<T, PortraitError>;

/// Failures of studio operations. Every variant leaves the portrait state as
/// it was before the call.
#[derive(thiserror::Error, Debug)]
pub enum PortraitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backend error: {0:#}")]
    Backend(anyhow::Error),

    #[error("backend returned no {0}")]
    EmptyResult(&'static str),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("edit failed: {0}")]
    EditFailed(String),

    #[error("animation failed: {0}")]
    AnimationFailed(String),

    #[error("export failed: {0}")]
    ExportFailed(String),

    #[error(transparent)]
    EmptyHistory(#[from] EmptyHistory),

    #[error("another portrait operation is still running")]
    Busy,

    #[error("result discarded: portrait changed since the request was made")]
    Stale,

    #[error("camera error: {0}")]
    Camera(String),
}

impl PortraitError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::GenerationFailed(msg.into())
    }

    pub fn edit(msg: impl Into<String>) -> Self {
        Self::EditFailed(msg.into())
    }

    pub fn animation(msg: impl Into<String>) -> Self {
        Self::AnimationFailed(msg.into())
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::ExportFailed(msg.into())
    }

    pub fn camera(msg: impl Into<String>) -> Self {
        Self::Camera(msg.into())
    }

    /// Failures the user can fix by simply trying the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend(_)
                | Self::EmptyResult(_)
                | Self::GenerationFailed(_)
                | Self::EditFailed(_)
                | Self::AnimationFailed(_)
        )
    }
}

impl From<ImageRefError> for PortraitError {
    fn from(err: ImageRefError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
