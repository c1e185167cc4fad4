//! Error types for the DAP protocol engine.

use std::fmt;

use thiserror::Error;

/// Result type alias using DapError.
pub type DapResult<T> = Result<T, DapError>;

/// Line/column location inside a metadata document (both 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

impl SourcePosition {
    /// Translate a byte offset into a line/column pair.
    ///
    /// Offsets past the end of `text` are clamped to the last position.
    pub fn from_offset(text: &str, offset: usize) -> Self {
        let offset = offset.min(text.len());
        let mut line = 1;
        let mut column = 1;
        for (i, ch) in text.char_indices() {
            if i >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self { line, column }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Optional position attached to a [`DapError::MetadataParse`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionHint(pub Option<SourcePosition>);

impl fmt::Display for PositionHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(pos) => write!(f, " at {}", pos),
            None => Ok(()),
        }
    }
}

/// Primary error type for metadata parsing, constraint building and decoding.
#[derive(Debug, Error)]
pub enum DapError {
    // === Decoding errors ===
    #[error("Malformed metadata{position}: {message}")]
    MetadataParse {
        message: String,
        position: PositionHint,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Shape mismatch for '{variable}': expected {expected} elements, got {actual}")]
    ShapeMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("Checksum mismatch in {variable}: expected {expected:#010x}, computed {actual:#010x}")]
    Checksum {
        variable: String,
        expected: u32,
        actual: u32,
    },

    // === Collaborator errors ===
    #[error("Transport error for {url}: {message}")]
    Transport {
        url: String,
        status: Option<u16>,
        message: String,
    },

    // === Request/model errors ===
    #[error("Invalid slice: {0}")]
    InvalidSlice(String),

    #[error("Invalid data model: {0}")]
    Model(String),
}

impl DapError {
    /// Metadata error without a known position.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::MetadataParse {
            message: message.into(),
            position: PositionHint(None),
        }
    }

    /// Metadata error pointing at a byte offset of `text`.
    pub fn parse_at(message: impl Into<String>, text: &str, offset: usize) -> Self {
        Self::MetadataParse {
            message: message.into(),
            position: PositionHint(Some(SourcePosition::from_offset(text, offset))),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::Model(message.into())
    }

    pub fn invalid_slice(message: impl Into<String>) -> Self {
        Self::InvalidSlice(message.into())
    }

    pub fn transport(url: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            status,
            message: message.into(),
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DapError::MetadataParse { .. } => "MetadataParseError",
            DapError::Protocol(_) => "ProtocolError",
            DapError::ShapeMismatch { .. } => "ShapeMismatchError",
            DapError::Checksum { .. } => "ChecksumError",
            DapError::Transport { .. } => "TransportError",
            DapError::InvalidSlice(_) => "InvalidSliceError",
            DapError::Model(_) => "ModelError",
        }
    }

    /// The position hint of a metadata error, if any.
    pub fn position(&self) -> Option<SourcePosition> {
        match self {
            DapError::MetadataParse { position, .. } => position.0,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_from_offset() {
        let text = "Dataset {\n    Int32 x;\n} d;";
        assert_eq!(SourcePosition::from_offset(text, 0), SourcePosition { line: 1, column: 1 });
        let offset = text.find("Int32").unwrap();
        assert_eq!(SourcePosition::from_offset(text, offset), SourcePosition { line: 2, column: 5 });
        // Clamped past the end
        let end = SourcePosition::from_offset(text, 10_000);
        assert_eq!(end.line, 3);
    }

    #[test]
    fn test_parse_error_display_includes_position() {
        let err = DapError::parse_at("unexpected token", "a\nbc", 3);
        assert_eq!(err.to_string(), "Malformed metadata at line 2, column 2: unexpected token");
        assert_eq!(err.kind(), "MetadataParseError");
        assert_eq!(err.position(), Some(SourcePosition { line: 2, column: 2 }));

        let err = DapError::parse("truncated");
        assert_eq!(err.to_string(), "Malformed metadata: truncated");
    }

    #[test]
    fn test_checksum_display() {
        let err = DapError::Checksum {
            variable: "/x".to_string(),
            expected: 0xdeadbeef,
            actual: 0x1,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch in /x: expected 0xdeadbeef, computed 0x00000001"
        );
    }
}
