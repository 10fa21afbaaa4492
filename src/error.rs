use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpwlError {
    #[error("Malformed codestream")]
    MalformedCodestream = 1,
    #[error("Start of codestream marker not found")]
    MissingStartOfCodestream = 2,
    #[error("Image and tile size marker not found")]
    MissingImageSize = 3,
    #[error("Start of tile segment length not supported")]
    UnsupportedSotLength = 4,
    #[error("Header does not fit in a single error protection block")]
    HeaderTooLarge = 5,
    #[error("Marker table full")]
    MarkerTableFull = 6,
    #[error("Sensitivity interval table full")]
    IntervalTableFull = 7,
    #[error("Too many tiles")]
    TooManyTiles = 8,
    #[error("Invalid protection parameter")]
    InvalidParameter = 9,
    #[error("Reed-Solomon code not in catalog")]
    UnsupportedCode = 10,
    #[error("Uncorrectable codeword")]
    Uncorrectable = 11,
    #[error("CRC mismatch")]
    CrcMismatch = 12,
    #[error("Error protection block not found")]
    MissingEpb = 13,
    #[error("Error protection capability marker not found")]
    MissingEpc = 14,
    #[error("Unknown protection method")]
    UnknownProtectionMethod = 15,
    #[error("Residual error descriptor not supported")]
    ResidualErrorDescriptorUnsupported = 16,
    #[error("Unknown informative method")]
    UnknownInformativeMethod = 17,
    #[error("Codestream truncated")]
    Truncated = 18,
    #[error("Empty input")]
    EmptyInput = 19,
    #[error("Destination too small")]
    DestinationTooSmall = 20,
}

/// Coarse classification of [`JpwlError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The codestream does not have the expected structure. Fatal.
    Structural,
    /// A table or segment would exceed a fixed limit.
    Capacity,
    /// A parity or CRC check failed for one span.
    CorrectionFailure,
    /// Framing was lost and had to be searched for.
    Resynchronization,
}

impl JpwlError {
    pub fn kind(self) -> ErrorKind {
        match self {
            JpwlError::MalformedCodestream
            | JpwlError::MissingStartOfCodestream
            | JpwlError::MissingImageSize
            | JpwlError::UnsupportedSotLength
            | JpwlError::InvalidParameter
            | JpwlError::UnsupportedCode
            | JpwlError::MissingEpc
            | JpwlError::UnknownProtectionMethod
            | JpwlError::ResidualErrorDescriptorUnsupported
            | JpwlError::UnknownInformativeMethod
            | JpwlError::EmptyInput => ErrorKind::Structural,
            JpwlError::HeaderTooLarge
            | JpwlError::MarkerTableFull
            | JpwlError::IntervalTableFull
            | JpwlError::TooManyTiles
            | JpwlError::DestinationTooSmall => ErrorKind::Capacity,
            JpwlError::Uncorrectable | JpwlError::CrcMismatch => ErrorKind::CorrectionFailure,
            JpwlError::MissingEpb | JpwlError::Truncated => ErrorKind::Resynchronization,
        }
    }
}
