//! Error types for slide reading.

use core::fmt;
use std::io;

/// The main error type for opening and reading tiled JPEG pyramids.
#[derive(Debug)]
pub enum Error {
    /// A file was rejected because it is not in the accepted JPEG subset.
    Format(FormatError),
    /// The fragment list does not describe a valid pyramid.
    Layout(LayoutError),
    /// A region decode failed.
    Decode(DecodeError),
    /// An I/O operation failed.
    Io(io::Error),
}

/// Errors rejecting a single JPEG file at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// The file does not start with an SOI marker.
    InvalidSignature,
    /// An invalid marker was encountered while walking the header.
    InvalidMarker,
    /// The coding process is not baseline sequential Huffman.
    UnsupportedCoding,
    /// No frame header was found before the scan.
    MissingFrameHeader,
    /// The file has no restart interval, so random access is impossible.
    NoRestartInterval,
    /// The restart interval does not tile the image evenly.
    IrregularTileGrid,
    /// The scan holds fewer restart markers than its geometry requires.
    MissingRestartMarkers,
}

/// Errors rejecting the fragment list at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// The fragment list is empty.
    Empty,
    /// A fragment is not the (z, x, y) successor of its predecessor.
    FragmentOutOfOrder,
    /// A level's fragments do not fill its file grid.
    IncompleteGrid,
    /// An interior fragment differs in size from the grid's (0, 0) file.
    NonUniformFragments,
    /// Two levels published the same width (strict mode only).
    DuplicateWidth,
}

/// Errors raised while decoding a region.
#[derive(Debug)]
pub enum DecodeError {
    /// The underlying JPEG decoder failed.
    Jpeg(jpeg_decoder::Error),
    /// The decoder did not produce the requested scale.
    UnexpectedScale,
    /// The decoder produced a pixel format other than 8-bit gray or RGB.
    UnsupportedPixelFormat,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(e) => write!(f, "{e}"),
            Self::Layout(e) => write!(f, "{e}"),
            Self::Decode(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSignature => write!(f, "not a JPEG file"),
            Self::InvalidMarker => write!(f, "invalid marker in header"),
            Self::UnsupportedCoding => {
                write!(f, "only baseline sequential Huffman JPEGs are supported")
            }
            Self::MissingFrameHeader => write!(f, "missing frame header"),
            Self::NoRestartInterval => write!(f, "file has no restart interval"),
            Self::IrregularTileGrid => {
                write!(f, "restart interval does not tile the image evenly")
            }
            Self::MissingRestartMarkers => {
                write!(f, "scan holds fewer restart markers than expected")
            }
        }
    }
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no fragments given"),
            Self::FragmentOutOfOrder => write!(f, "fragments are not in (z, x, y) order"),
            Self::IncompleteGrid => write!(f, "fragments do not fill the level's file grid"),
            Self::NonUniformFragments => {
                write!(f, "interior fragments must all have the size of the (0, 0) file")
            }
            Self::DuplicateWidth => write!(f, "two levels published the same width"),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg(e) => write!(f, "{e}"),
            Self::UnexpectedScale => write!(f, "decoder did not produce the requested scale"),
            Self::UnsupportedPixelFormat => {
                write!(f, "decoder produced an unsupported pixel format")
            }
        }
    }
}

impl std::error::Error for Error {}
impl std::error::Error for FormatError {}
impl std::error::Error for LayoutError {}
impl std::error::Error for DecodeError {}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

impl From<LayoutError> for Error {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<jpeg_decoder::Error> for Error {
    fn from(e: jpeg_decoder::Error) -> Self {
        Self::Decode(DecodeError::Jpeg(e))
    }
}

/// Result type for slide reading operations.
pub type Result<T> = core::result::Result<T, Error>;

macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}

macro_rules! err {
    ($err:expr) => {
        Err($err.into())
    };
}

pub(crate) use bail;
pub(crate) use err;
