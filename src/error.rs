//! Error types for firmware extraction.

use std::fmt;

use thiserror::Error;

/// Structural signature that a locator failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The executable section expected to embed the resource container.
    ConstSection,
    /// Start of the resource name table.
    Names,
    /// Start of the resource data table.
    Data,
    /// Root record of the resource tree.
    Tree,
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Anchor::ConstSection => "container section",
            Anchor::Names => "name table",
            Anchor::Data => "data table",
            Anchor::Tree => "resource tree",
        };
        f.write_str(name)
    }
}

/// Error type for the extraction pipeline.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Leading bytes match no supported executable dialect.
    #[error("unsupported executable format (leading bytes {0:02x?})")]
    UnsupportedFormat(Vec<u8>),

    /// A required structural signature is absent.
    #[error("{0} anchor not found")]
    AnchorNotFound(Anchor),

    /// A required ELF symbol (or the symbol table itself) is missing.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// A length field failed its plausibility bound.
    #[error("{what} size {value:#x} out of range")]
    SizeOutOfRange { what: &'static str, value: u64 },

    /// Decompression or Intel HEX decoding failed.
    #[error("failed to decode payload: {0}")]
    DecodeFailure(String),

    /// The container was walked but produced no usable firmware.
    #[error("no firmware found ({entries} resource entries walked, {skipped} skipped)")]
    NoFirmwareFound { entries: usize, skipped: usize },

    /// Header or table parsing failed inside the executable image.
    #[error("malformed {context}: {source}")]
    Malformed {
        context: &'static str,
        #[source]
        source: object::read::Error,
    },

    /// An artifact filename would land outside the output directory.
    #[error("refusing to write outside the output directory: {0:?}")]
    PathTraversal(std::path::PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub(crate) fn malformed(context: &'static str) -> impl FnOnce(object::read::Error) -> Self {
        move |source| Self::Malformed { context, source }
    }

    /// Whether this error aborts a whole run rather than a single artifact.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_)
                | Self::AnchorNotFound(_)
                | Self::SymbolNotFound(_)
                | Self::Malformed { .. }
                | Self::Io(_)
        )
    }

    /// Whether the run got as far as locating the resource container.
    ///
    /// Per-artifact failures never end a run, so the only run-level error
    /// raised after the container was located is
    /// [`ExtractError::NoFirmwareFound`].
    pub fn container_found(&self) -> bool {
        matches!(self, Self::NoFirmwareFound { .. })
    }
}

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;

/// A recoverable problem recorded while the run continued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Resource path (or other subject) the message is about.
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(subject: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            subject: subject.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}
