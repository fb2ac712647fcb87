use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlmanacError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AlmanacError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            AlmanacError::Config(_) => "CONFIG_ERROR",
            AlmanacError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AlmanacError>;
