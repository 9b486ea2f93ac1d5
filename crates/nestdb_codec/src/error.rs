//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The envelope body is not valid JSON.
    #[error("malformed envelope body: {message}")]
    MalformedBody {
        /// Description of the JSON error.
        message: String,
    },

    /// The envelope carries a type tag the decoder does not recognize.
    #[error("unknown type tag: {tag}")]
    UnknownTag {
        /// The unrecognized tag text.
        tag: String,
    },

    /// The decoded body does not match the envelope's top-level tag.
    #[error("tag mismatch: envelope says {expected}, body decodes as {found}")]
    TagMismatch {
        /// Tag carried by the envelope.
        expected: &'static str,
        /// Tag of the value the body actually decodes to.
        found: &'static str,
    },

    /// A tagged object inside the body is structurally invalid.
    #[error("invalid envelope structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },
}

impl CodecError {
    /// Create a malformed body error.
    pub fn malformed_body(message: impl Into<String>) -> Self {
        Self::MalformedBody {
            message: message.into(),
        }
    }

    /// Create an unknown tag error.
    pub fn unknown_tag(tag: impl Into<String>) -> Self {
        Self::UnknownTag { tag: tag.into() }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}

/// Errors produced while parsing a path string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Two separators in a row, or a trailing separator.
    #[error("empty key in path at position {0}")]
    EmptyKey(usize),

    /// A `[` with no matching `]`.
    #[error("unclosed bracket starting at position {0}")]
    UnclosedBracket(usize),

    /// A quoted bracket key with no closing quote.
    #[error("unclosed quote starting at position {0}")]
    UnclosedQuote(usize),

    /// Bracket content that is neither an index nor a quoted key.
    #[error("invalid index at position {position}: {text:?}")]
    InvalidIndex {
        /// Position of the offending content.
        position: usize,
        /// The content that failed to parse.
        text: String,
    },

    /// A character that cannot appear where it did.
    #[error("unexpected character {ch:?} at position {position}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Its byte position in the input.
        position: usize,
    },
}
