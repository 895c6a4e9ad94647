//! Error types for the GIF engine

use std::fmt;

use thiserror::Error;

/// Decoding error categories reported by the codec.
///
/// Three digit codes are equal to GIFLib error codes, four digit codes are
/// engine specific. `NoError` is the value reported while nothing failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GifError {
    #[default]
    NoError,
    OpenFailed,
    ReadFailed,
    NotGifFormat,
    MissingScreenDescriptor,
    MissingImageDescriptor,
    MissingColorMap,
    WrongRecordType,
    PixelCountTooLarge,
    OutOfMemory,
    CloseFailed,
    NotReadable,
    ImageDefective,
    PrematureEof,
    NoFrames,
    InvalidScreenDimensions,
    ImageExceedsCanvas,
    RewindFailed,
    InvalidBufferSpecified,
    Unknown(i32),
}

impl GifError {
    /// Numeric code of this error.
    pub fn code(self) -> i32 {
        match self {
            GifError::NoError => 0,
            GifError::OpenFailed => 101,
            GifError::ReadFailed => 102,
            GifError::NotGifFormat => 103,
            GifError::MissingScreenDescriptor => 104,
            GifError::MissingImageDescriptor => 105,
            GifError::MissingColorMap => 106,
            GifError::WrongRecordType => 107,
            GifError::PixelCountTooLarge => 108,
            GifError::OutOfMemory => 109,
            GifError::CloseFailed => 110,
            GifError::NotReadable => 111,
            GifError::ImageDefective => 112,
            GifError::PrematureEof => 113,
            GifError::NoFrames => 1000,
            GifError::InvalidScreenDimensions => 1001,
            GifError::ImageExceedsCanvas => 1003,
            GifError::RewindFailed => 1004,
            GifError::InvalidBufferSpecified => 1005,
            GifError::Unknown(code) => code,
        }
    }

    /// Maps a numeric code back to its category. Unrecognized codes are kept
    /// in `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => GifError::NoError,
            101 => GifError::OpenFailed,
            102 => GifError::ReadFailed,
            103 => GifError::NotGifFormat,
            104 => GifError::MissingScreenDescriptor,
            105 => GifError::MissingImageDescriptor,
            106 => GifError::MissingColorMap,
            107 => GifError::WrongRecordType,
            108 => GifError::PixelCountTooLarge,
            109 => GifError::OutOfMemory,
            110 => GifError::CloseFailed,
            111 => GifError::NotReadable,
            112 => GifError::ImageDefective,
            113 => GifError::PrematureEof,
            1000 => GifError::NoFrames,
            1001 => GifError::InvalidScreenDimensions,
            1003 => GifError::ImageExceedsCanvas,
            1004 => GifError::RewindFailed,
            1005 => GifError::InvalidBufferSpecified,
            other => GifError::Unknown(other),
        }
    }

    /// Human readable description.
    pub fn description(self) -> &'static str {
        match self {
            GifError::NoError => "No error",
            GifError::OpenFailed => "Failed to open given input",
            GifError::ReadFailed => "Failed to read from given input",
            GifError::NotGifFormat => "Data is not in GIF format",
            GifError::MissingScreenDescriptor => "No screen descriptor detected",
            GifError::MissingImageDescriptor => "No image descriptor detected",
            GifError::MissingColorMap => "Neither global nor local color map found",
            GifError::WrongRecordType => "Wrong record type detected",
            GifError::PixelCountTooLarge => "Number of pixels bigger than width * height",
            GifError::OutOfMemory => "Failed to allocate required memory",
            GifError::CloseFailed => "Failed to close given input",
            GifError::NotReadable => "Given file was not opened for read",
            GifError::ImageDefective => "Image is defective, decoding aborted",
            GifError::PrematureEof => "Image EOF detected before image complete",
            GifError::NoFrames => "No frames found, at least one frame required",
            GifError::InvalidScreenDimensions => "Invalid screen size, dimensions must be positive",
            GifError::ImageExceedsCanvas => "Image size exceeds screen size",
            GifError::RewindFailed => "Input source rewind failed, animation stopped",
            GifError::InvalidBufferSpecified => "Invalid and/or indirect byte buffer specified",
            GifError::Unknown(_) => "Unknown error",
        }
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self != GifError::NoError
    }
}

impl fmt::Display for GifError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GifError {}: {}", self.code(), self.description())
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{kind}: {message}")]
    Decode { kind: GifError, message: String },

    #[error("Frame index is not in range <0;{count}>: {index}")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid saved state: {0}")]
    InvalidSavedState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn decode(kind: GifError, message: impl Into<String>) -> Self {
        EngineError::Decode { kind, message: message.into() }
    }

    /// Codec category of this error, `Unknown(-1)` for errors that did not
    /// come from decoding.
    pub fn gif_error(&self) -> GifError {
        match self {
            EngineError::Decode { kind, .. } => *kind,
            _ => GifError::Unknown(-1),
        }
    }
}

/// Classifies an I/O failure during decoding.
pub(crate) fn io_error_kind(err: &std::io::Error) -> GifError {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof => GifError::PrematureEof,
        std::io::ErrorKind::OutOfMemory => GifError::OutOfMemory,
        _ => GifError::ReadFailed,
    }
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        use image::ImageError;

        let kind = match &err {
            ImageError::IoError(io) => io_error_kind(io),
            ImageError::Decoding(_) => GifError::ImageDefective,
            ImageError::Limits(_) => GifError::OutOfMemory,
            ImageError::Unsupported(_) => GifError::NotGifFormat,
            ImageError::Parameter(_) => GifError::InvalidBufferSpecified,
            ImageError::Encoding(_) => GifError::Unknown(-1),
        };
        EngineError::decode(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in [0, 101, 105, 113, 1000, 1003, 1005] {
            assert_eq!(GifError::from_code(code).code(), code);
        }
        assert_eq!(GifError::from_code(42), GifError::Unknown(42));
        assert_eq!(GifError::from_code(42).code(), 42);
    }

    #[test]
    fn test_formatted_description() {
        assert_eq!(
            GifError::NotGifFormat.to_string(),
            "GifError 103: Data is not in GIF format"
        );
        let err = EngineError::decode(GifError::NoFrames, "empty");
        assert_eq!(err.gif_error(), GifError::NoFrames);
        assert!(err.to_string().starts_with("GifError 1000"));
    }
}
