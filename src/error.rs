use thiserror::Error;

/// All errors produced by vmic.
#[derive(Debug, Error)]
pub enum VmicError {
    #[error("audio frame of {len} bytes exceeds the {capacity} byte period buffer")]
    FrameTooLarge { len: usize, capacity: usize },

    #[error("PCM device error: {0}")]
    Device(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VmicError>;
