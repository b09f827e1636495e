//! Streaming parsers: FASTQ (textual, four-line records) and BAM (binary,
//! unmapped single reads), plus the paired-stream resynchronization
//! primitive that operates on raw buffers without parsing either side.

pub mod bam;
pub mod fastq;
pub mod paired;
pub(crate) mod utils;

pub use bam::{BamParser, BamParserConfig};
pub use fastq::{FastqParser, FastqParserConfig, RecordConstructor};
pub use paired::paired_head_scan;
pub use utils::{LineEnding, Position};
