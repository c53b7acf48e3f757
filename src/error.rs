//! Error types shared by the parser, the region combiner, the axis extender
//! and the channel range consolidator.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegionError {
    /// A region text line does not match the grammar.
    #[error("line {line}: {reason} ({text})")]
    Syntax {
        line: usize,
        text: String,
        reason: String,
    },

    #[error("file version {found} is less than required version {required}")]
    Version { found: u32, required: u32 },

    #[error("file version {found} is greater than the most recent version of the format ({current})")]
    FutureVersion { found: u32, current: u32 },

    /// A spectral or polarization selection is malformed or out of bounds.
    #[error("{reason}")]
    Validation { reason: String },

    #[error("region cannot be built: the list was created without a coordinate system and image shape")]
    State,

    #[error("no region-bearing lines have been added")]
    EmptyRegion,

    #[error("line index {index} out of range for list of {len} lines")]
    Index { index: usize, len: usize },

    /// A world or pixel coordinate could not be converted.
    #[error("coordinate conversion failed: {reason}")]
    Conversion { reason: String },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RegionError {
    pub(crate) fn syntax(line: usize, text: &str, reason: impl Into<String>) -> Self {
        RegionError::Syntax {
            line,
            text: text.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        RegionError::Validation {
            reason: reason.into(),
        }
    }

    pub(crate) fn conversion(reason: impl Into<String>) -> Self {
        RegionError::Conversion {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegionError>;
