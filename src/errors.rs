//! Error types returned at the boundary of every parser and record
//! constructor in this crate.
use std::fmt;

use thiserror::Error;

/// Which binary/text format a parser or error relates to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Format {
    Fastq,
    Bam,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Fastq => write!(f, "FASTQ"),
            Self::Bam => write!(f, "BAM"),
        }
    }
}

/// Where in a stream an error occurred: an (approximate) line number and,
/// when known, the id of the record being parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorPosition {
    /// Line number, 0-based, synthesized as `4 * records_emitted + offset`.
    pub line: u64,
    /// Id of the record in progress, when it could be recovered.
    pub id: Option<Box<str>>,
}

impl ErrorPosition {
    pub fn new(line: u64) -> Self {
        Self { line, id: None }
    }

    pub fn with_id(line: u64, id: impl Into<Box<str>>) -> Self {
        Self {
            line,
            id: Some(id.into()),
        }
    }
}

impl fmt::Display for ErrorPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(id) = self.id.as_ref() {
            write!(f, "record '{id}' at line {}", self.line)
        } else {
            write!(f, "line {}", self.line)
        }
    }
}

/// Errors raised constructing a [`crate::record::SequenceRecord`] directly
/// (outside of any parser).
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("expected a byte-string-like value for field '{field}'")]
    InvalidType { field: &'static str },

    #[error("field '{field}' contains a non-ASCII byte 0x{byte:02x} at offset {offset}")]
    NonAscii {
        field: &'static str,
        byte: u8,
        offset: usize,
    },

    #[error("sequence length ({seq_len}) does not match qualities length ({qual_len})")]
    LengthMismatch { seq_len: usize, qual_len: usize },

    #[error("fastq_bytes() requires qualities, but this record has none")]
    QualitiesRequired,
}

/// Errors raised while streaming records out of a [`crate::parser::fastq::FastqParser`].
#[derive(Debug, Error)]
pub enum FastqError {
    #[error("non-ASCII byte 0x{byte:02x} in input ({position})")]
    NonAscii { byte: u8, position: ErrorPosition },

    #[error("expected '@' but found '{}' ({position})", (*found as char).escape_default())]
    BadHeader { found: u8, position: ErrorPosition },

    #[error("expected '+' separator but found '{}' ({position})", (*found as char).escape_default())]
    BadSeparator { found: u8, position: ErrorPosition },

    #[error("repeated header does not match original header ({position})")]
    HeaderMismatch { position: ErrorPosition },

    #[error("sequence length ({seq_len}) and qualities length ({qual_len}) differ ({position})")]
    LengthMismatch {
        seq_len: usize,
        qual_len: usize,
        position: ErrorPosition,
    },

    #[error("premature end of input inside a record ({position})")]
    PrematureEof { position: ErrorPosition },

    #[error("reader returned more bytes than requested")]
    ReaderContract,

    #[error("record construction failed: {0}")]
    Record(#[source] RecordError),

    #[error("I/O error reading FASTQ stream: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for FastqError {
    fn from(err: std::io::Error) -> Self {
        FastqError::Io(err)
    }
}

/// Errors raised while streaming records out of a [`crate::parser::bam::BamParser`].
#[derive(Debug, Error)]
pub enum BamError {
    #[error("missing or invalid BAM magic number")]
    BadMagic,

    #[error("truncated BAM stream ({context})")]
    Truncated { context: &'static str },

    #[error(
        "unsupported BAM record (flag {flag:#06x}): this core only decodes unmapped, \
         single reads (flag == 4); for mapped or multi-segment data use samtools fastq"
    )]
    Unsupported { flag: u16 },

    #[error("reader returned more bytes than requested")]
    ReaderContract,

    #[error("I/O error reading BAM stream: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for BamError {
    fn from(err: std::io::Error) -> Self {
        BamError::Io(err)
    }
}
