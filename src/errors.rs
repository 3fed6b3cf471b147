use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridWatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Asset error: {0}")]
    Asset(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Sampling cancelled")]
    Cancelled,
}

impl serde::Serialize for GridWatchError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type GridWatchResult<T> = Result<T, GridWatchError>;
