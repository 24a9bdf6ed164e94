//! Error types shared by the tracker, cache, extractor and analysis client.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MatchaError>;

#[derive(Error, Debug)]
pub enum MatchaError {
    /// The page could not be read at all (restricted scheme, unparseable URL, empty document).
    #[error("Could not read this page: {0}. Try again on a regular web page.")]
    Extraction(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Quick-save of a URL that is already on the board.
    #[error("Already tracking {url}")]
    Duplicate { url: String },

    #[error("Remote analysis failed: {message}")]
    RemoteAnalysis {
        message: String,
        missing_fields: Vec<String>,
    },

    #[error("Storage error: {0}. Please reload and retry.")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Messaging error: {0}")]
    Messaging(String),
}

impl MatchaError {
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn duplicate(url: impl Into<String>) -> Self {
        Self::Duplicate { url: url.into() }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteAnalysis {
            message: message.into(),
            missing_fields: Vec::new(),
        }
    }

    pub fn missing_fields(fields: Vec<String>) -> Self {
        Self::RemoteAnalysis {
            message: format!("invalid response structure, missing: {}", fields.join(", ")),
            missing_fields: fields,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn messaging(message: impl Into<String>) -> Self {
        Self::Messaging(message.into())
    }

    #[allow(dead_code)]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    #[allow(dead_code)]
    pub fn is_extraction(&self) -> bool {
        matches!(self, Self::Extraction(_))
    }

    #[allow(dead_code)]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteAnalysis { .. })
    }

    /// Stable tag carried in the `errorKind` field of message responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction",
            Self::NotFound { .. } => "notFound",
            Self::Duplicate { .. } => "duplicate",
            Self::RemoteAnalysis { .. } => "remoteAnalysis",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Messaging(_) => "messaging",
        }
    }
}

impl From<rusqlite::Error> for MatchaError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MatchaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("corrupt stored document: {}", err))
    }
}

impl From<std::io::Error> for MatchaError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
