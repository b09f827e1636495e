//! Streaming FASTQ/BAM sequencing-record parsing and serialization.
//!
//! ```
//! use seqstream::parser::FastqParser;
//!
//! let data = &b"@r1\nACGT\n+\n!!!!\n"[..];
//! let mut reader = FastqParser::new(data);
//! let record = reader.next().unwrap().expect("valid record");
//! assert_eq!(record.sequence(), "ACGT");
//! ```

pub mod ascii;
pub mod bam_tags;
pub mod encoder;
pub mod errors;
pub mod mate;
pub mod parser;
pub mod record;
pub mod tables;

pub use ascii::is_ascii;
pub use bam_tags::BamTags;
pub use encoder::encode_fastq;
pub use errors::{BamError, FastqError, Format, RecordError};
pub use mate::{is_mate, records_are_mates, MateId};
pub use parser::{BamParser, BamParserConfig, FastqParser, FastqParserConfig};
pub use record::{BytesSequenceRecord, SequenceRecord};
