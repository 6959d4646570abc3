//! The converter's error domain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the single domain every [`ConversionError`] belongs to.
pub const ERROR_DOMAIN: &str = "rawconv.conversion";

/// Closed set of failure kinds.
///
/// Codes are stable. Kinds are only ever appended; see
/// [`ErrorKind::legacy_code`] for the numbering of the first revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum ErrorKind {
    OpenFailed = 1,
    UnpackImageFailed = 2,
    UnpackThumbnailFailed = 3,
    PostprocessingFailed = 4,
    InMemoryThumbnailCreationFailed = 5,
    InMemoryFullSizeImageCreationFailed = 6,
    InMemoryConvertedImageWritingFailed = 7,
    DataIsNotAnImage = 8,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::OpenFailed,
        ErrorKind::UnpackImageFailed,
        ErrorKind::UnpackThumbnailFailed,
        ErrorKind::PostprocessingFailed,
        ErrorKind::InMemoryThumbnailCreationFailed,
        ErrorKind::InMemoryFullSizeImageCreationFailed,
        ErrorKind::InMemoryConvertedImageWritingFailed,
        ErrorKind::DataIsNotAnImage,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    /// Code under the original six-kind numbering, where writing failures
    /// were 6 and the two in-memory/not-an-image kinds did not exist yet.
    pub fn legacy_code(self) -> Option<u8> {
        match self {
            ErrorKind::InMemoryFullSizeImageCreationFailed | ErrorKind::DataIsNotAnImage => None,
            ErrorKind::InMemoryConvertedImageWritingFailed => Some(6),
            other => Some(other.code()),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::OpenFailed => "failed to open RAW file",
            ErrorKind::UnpackImageFailed => "failed to unpack sensor data",
            ErrorKind::UnpackThumbnailFailed => "failed to unpack embedded thumbnail",
            ErrorKind::PostprocessingFailed => "failed to post-process sensor data",
            ErrorKind::InMemoryThumbnailCreationFailed => "failed to create in-memory thumbnail",
            ErrorKind::InMemoryFullSizeImageCreationFailed => {
                "failed to create in-memory full-size image"
            }
            ErrorKind::InMemoryConvertedImageWritingFailed => "failed to write converted image",
            ErrorKind::DataIsNotAnImage => "data at path is not an image",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// A failed conversion step: what went wrong and the underlying cause.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ConversionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ConversionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn domain(&self) -> &'static str {
        ERROR_DOMAIN
    }

    pub fn code(&self) -> u8 {
        self.kind.code()
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;
