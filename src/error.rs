use std::io;

use thiserror::Error;

/// The result type used by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while collapsing, merging, or rendering.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A reader or writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A parser hit a structural violation it cannot recover from.
    ///
    /// Expected oddities (a stray header line, an unparseable frame) are
    /// skipped with a warning instead; this variant is reserved for input
    /// that would desynchronize the parser's state machine. The message
    /// includes a line number or byte offset when one is cheaply available.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The guess collapser could not match the input to any known format.
    #[error("unable to determine the input format")]
    UnknownFormat,

    /// The input produced no stacks, or its total weight was zero.
    #[error("no stack counts found")]
    EmptyProfile,

    /// A sample count accumulation exceeded the 64-bit range.
    #[error("sample count overflowed a 64-bit accumulator")]
    Overflow,

    /// An invalid option or option combination was supplied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading or writing XML failed.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl Error {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedInput(format!("line {}: {}", line, reason.into()))
    }

    pub(crate) fn malformed_at_byte(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedInput(format!("byte offset {}: {}", offset, reason.into()))
    }
}
