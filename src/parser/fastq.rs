//! Streaming, buffer-reusing FASTQ record extractor.
//!
//! The buffer growth/resume discipline (grow when the first record already
//! overflows the buffer, otherwise shift the residual to the front and
//! refill) is adapted from `seq_io::fastq::Reader`, the same lineage the
//! teacher crate's own FASTQ reader traces to.

use std::io;

use memchr::memchr;

use crate::ascii::is_ascii;
use crate::errors::{ErrorPosition, FastqError, RecordError};
use crate::parser::utils::{fill_buf, find_line_ending, grow_to, trim_cr, LineEnding, Position, BUFSIZE};
use crate::record::SequenceRecord;

#[derive(Debug, Clone, Default)]
struct BufferPosition {
    start: usize,
    seq: usize,
    sep: usize,
    qual: usize,
    end: usize,
}

impl BufferPosition {
    #[inline]
    fn is_new(&self) -> bool {
        self.end == 0
    }

    #[inline]
    fn span_len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    fn header<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        trim_cr(&buf[self.start + 1..self.seq - 1])
    }

    #[inline]
    fn sequence<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        trim_cr(&buf[self.seq..self.sep - 1])
    }

    #[inline]
    fn sep_header<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        trim_cr(&buf[self.sep + 1..self.qual - 1])
    }

    #[inline]
    fn qualities<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        trim_cr(&buf[self.qual..self.end])
    }

    #[inline]
    fn all<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.end]
    }

    fn find_line_ending(&self, buf: &[u8]) -> Option<LineEnding> {
        find_line_ending(self.all(buf))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
enum SearchPos {
    Header,
    Sequence,
    Separator,
    Quality,
}

/// Signature of a caller-supplied record constructor: `(name, sequence,
/// qualities) -> SequenceRecord`. One instance is configured per parser.
pub type RecordConstructor =
    dyn Fn(&str, &[u8], Option<&[u8]>) -> Result<SequenceRecord, RecordError>;

/// Builder-style configuration accepted by [`FastqParser::with_config`].
#[derive(Default)]
pub struct FastqParserConfig {
    pub initial_buffer_size: Option<usize>,
    pub custom_record_constructor: Option<Box<RecordConstructor>>,
}

/// Streams [`SequenceRecord`]s out of a FASTQ byte source.
///
/// Implements [`Iterator`]; a single parser is meant to be driven by one
/// logical thread of control and is not reentrant.
pub struct FastqParser<R: io::Read> {
    buf_reader: buffer_redux::BufReader<R>,
    buf_pos: BufferPosition,
    search_pos: SearchPos,
    position: Position,
    finished: bool,
    line_ending: Option<LineEnding>,
    records_emitted: u64,
    first_repeated_header: Option<bool>,
    custom_record_constructor: Option<Box<RecordConstructor>>,
}

impl<R: io::Read> FastqParser<R> {
    /// Creates a parser with the default initial buffer capacity (64 KiB).
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, BUFSIZE)
    }

    /// Creates a parser with a given initial buffer capacity. Minimum 1.
    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self::with_config(
            reader,
            FastqParserConfig {
                initial_buffer_size: Some(capacity),
                custom_record_constructor: None,
            },
        )
    }

    pub fn with_config(reader: R, config: FastqParserConfig) -> Self {
        let capacity = config.initial_buffer_size.unwrap_or(BUFSIZE).max(1);
        FastqParser {
            buf_reader: buffer_redux::BufReader::with_capacity(capacity, reader),
            buf_pos: BufferPosition::default(),
            search_pos: SearchPos::Header,
            position: Position::new(1, 0),
            finished: false,
            line_ending: None,
            records_emitted: 0,
            first_repeated_header: None,
            custom_record_constructor: config.custom_record_constructor,
        }
    }

    /// Number of records successfully emitted so far.
    pub fn records_emitted(&self) -> u64 {
        self.records_emitted
    }

    /// Line ending style observed in the stream, `None` before the first
    /// record is emitted.
    pub fn line_ending(&self) -> Option<LineEnding> {
        self.line_ending
    }

    /// Whether the first record's separator line repeated the header.
    /// `None` until the first record has been emitted; stable afterward.
    pub fn first_record_had_repeated_header(&self) -> Option<bool> {
        self.first_repeated_header
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    #[inline]
    fn get_buf(&self) -> &[u8] {
        self.buf_reader.buffer()
    }

    #[inline]
    fn find_line(&self, search_start: usize) -> Option<usize> {
        memchr(b'\n', &self.get_buf()[search_start..]).map(|pos| search_start + pos + 1)
    }

    /// Scans newly-appended bytes `buf[from..]` for an ASCII violation.
    fn check_ascii(&self, from: usize) -> Result<(), FastqError> {
        let buf = self.get_buf();
        let tail = &buf[from..];
        if is_ascii(tail) {
            return Ok(());
        }
        let (rel_offset, byte) = tail
            .iter()
            .enumerate()
            .find(|&(_, &b)| b >= 0x80)
            .map(|(i, &b)| (i, b))
            .expect("is_ascii returned false");
        let abs_offset = from + rel_offset;
        let newlines_before = memchr::memchr_iter(b'\n', &buf[..abs_offset]).count() as u64;
        let line = self.position.line() + newlines_before;
        Err(FastqError::NonAscii {
            byte,
            position: ErrorPosition::new(line),
        })
    }

    /// Locates all four line boundaries of the next record from scratch.
    fn find(&mut self) -> Result<bool, FastqError> {
        self.buf_pos.seq = match self.find_line(self.buf_pos.start) {
            Some(p) => p,
            None => {
                self.search_pos = SearchPos::Header;
                return Ok(false);
            }
        };
        self.buf_pos.sep = match self.find_line(self.buf_pos.seq) {
            Some(p) => p,
            None => {
                self.search_pos = SearchPos::Sequence;
                return Ok(false);
            }
        };
        self.buf_pos.qual = match self.find_line(self.buf_pos.sep) {
            Some(p) => p,
            None => {
                self.search_pos = SearchPos::Separator;
                return Ok(false);
            }
        };
        self.buf_pos.end = match self.find_line(self.buf_pos.qual) {
            Some(p) => p - 1,
            None => {
                self.search_pos = SearchPos::Quality;
                return Ok(false);
            }
        };
        self.validate()?;
        Ok(true)
    }

    /// Resumes a scan that previously ran out of buffer, without
    /// re-searching positions already found.
    fn find_incomplete(&mut self) -> Result<bool, FastqError> {
        if self.search_pos == SearchPos::Header {
            self.buf_pos.seq = match self.find_line(self.buf_pos.start) {
                Some(p) => p,
                None => return Ok(false),
            };
        }
        if self.search_pos <= SearchPos::Sequence {
            self.buf_pos.sep = match self.find_line(self.buf_pos.seq) {
                Some(p) => p,
                None => {
                    self.search_pos = SearchPos::Sequence;
                    return Ok(false);
                }
            };
        }
        if self.search_pos <= SearchPos::Separator {
            self.buf_pos.qual = match self.find_line(self.buf_pos.sep) {
                Some(p) => p,
                None => {
                    self.search_pos = SearchPos::Separator;
                    return Ok(false);
                }
            };
        }
        if self.search_pos <= SearchPos::Quality {
            self.buf_pos.end = match self.find_line(self.buf_pos.qual) {
                Some(p) => p - 1,
                None => {
                    self.search_pos = SearchPos::Quality;
                    return Ok(false);
                }
            };
        }
        self.search_pos = SearchPos::Header;
        self.validate()?;
        Ok(true)
    }

    fn validate(&mut self) -> Result<(), FastqError> {
        let buf = self.get_buf();

        let start_byte = buf[self.buf_pos.start];
        if start_byte != b'@' {
            self.finished = true;
            return Err(FastqError::BadHeader {
                found: start_byte,
                position: ErrorPosition::new(4 * self.records_emitted),
            });
        }

        let sep_byte = buf[self.buf_pos.sep];
        if sep_byte != b'+' {
            self.finished = true;
            return Err(FastqError::BadSeparator {
                found: sep_byte,
                position: ErrorPosition::new(4 * self.records_emitted + 2),
            });
        }

        let repeated = self.buf_pos.sep_header(buf);
        if !repeated.is_empty() && repeated != self.buf_pos.header(buf) {
            self.finished = true;
            return Err(FastqError::HeaderMismatch {
                position: ErrorPosition::new(4 * self.records_emitted + 2),
            });
        }

        let seq_len = self.buf_pos.sequence(buf).len();
        let qual_len = self.buf_pos.qualities(buf).len();
        if seq_len != qual_len {
            self.finished = true;
            return Err(FastqError::LengthMismatch {
                seq_len,
                qual_len,
                position: ErrorPosition::new(4 * self.records_emitted + 3),
            });
        }

        Ok(())
    }

    /// Called when a scan ran out of buffer: refills (growing or shifting
    /// as needed) until the record completes, fails, or EOF is confirmed.
    fn next_complete(&mut self) -> Result<bool, FastqError> {
        loop {
            if self.get_buf().len() < self.buf_reader.capacity() {
                return self.check_end();
            }

            if self.buf_pos.start == 0 {
                self.grow();
            } else {
                self.make_room();
            }

            let before = self.get_buf().len();
            fill_buf(&mut self.buf_reader)?;
            self.check_ascii(before)?;

            if self.find_incomplete()? {
                return Ok(true);
            }
        }
    }

    /// Reached a short read. Decide whether the residual forms a final,
    /// newline-less record, trailing blank lines, or a truncated one.
    fn check_end(&mut self) -> Result<bool, FastqError> {
        self.finished = true;
        if self.search_pos == SearchPos::Quality {
            self.buf_pos.end = self.get_buf().len();
            self.validate()?;
            return Ok(true);
        }

        let rest = &self.get_buf()[self.buf_pos.start..];
        if rest.split(|&c| c == b'\n').all(|l| trim_cr(l).is_empty()) {
            return Ok(false);
        }

        let local_newlines = memchr::memchr_iter(b'\n', rest).count() as u64;
        Err(FastqError::PrematureEof {
            position: ErrorPosition::new(4 * self.records_emitted + local_newlines),
        })
    }

    fn grow(&mut self) {
        let cap = self.buf_reader.capacity();
        let additional = grow_to(cap) - cap;
        self.buf_reader.reserve(additional);
    }

    fn make_room(&mut self) {
        let consumed = self.buf_pos.start;
        self.buf_reader.consume(consumed);
        self.buf_reader.make_room();
        self.buf_pos.start = 0;
        if self.search_pos >= SearchPos::Sequence {
            self.buf_pos.seq -= consumed;
        }
        if self.search_pos >= SearchPos::Separator {
            self.buf_pos.sep -= consumed;
        }
        if self.search_pos >= SearchPos::Quality {
            self.buf_pos.qual -= consumed;
        }
    }

    fn build_record(&self) -> Result<SequenceRecord, FastqError> {
        let buf = self.get_buf();
        let name = self.buf_pos.header(buf);
        let sequence = self.buf_pos.sequence(buf);
        let qualities = self.buf_pos.qualities(buf);

        let record = if let Some(ctor) = &self.custom_record_constructor {
            // SAFETY-free: ASCII already verified on refill, UTF-8 follows.
            let name_str = std::str::from_utf8(name).expect("ascii-validated on refill");
            ctor(name_str, sequence, Some(qualities))
        } else {
            Ok(SequenceRecord::new_unchecked(name, sequence, Some(qualities), None))
        };
        record.map_err(FastqError::Record)
    }
}

impl<R: io::Read> Iterator for FastqParser<R> {
    type Item = Result<SequenceRecord, FastqError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if self.get_buf().is_empty() {
            match fill_buf(&mut self.buf_reader) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {
                    if let Err(e) = self.check_ascii(0) {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
        }

        if !self.buf_pos.is_new() {
            self.position.byte += self.buf_pos.span_len() as u64;
            self.position.line += 4;
            self.buf_pos.start = self.buf_pos.end + 1;
        }

        let complete = match self.find() {
            Ok(c) => c,
            Err(e) => return Some(Err(e)),
        };

        if !complete {
            match self.next_complete() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }

        if self.line_ending.is_none() {
            self.line_ending = self.buf_pos.find_line_ending(self.get_buf());
        }

        let record = match self.build_record() {
            Ok(r) => r,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };

        if self.first_repeated_header.is_none() {
            let repeated = !self.buf_pos.sep_header(self.get_buf()).is_empty();
            self.first_repeated_header = Some(repeated);
        }
        self.records_emitted += 1;

        Some(Ok(record))
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    fn seq(s: &[u8]) -> Cursor<&[u8]> {
        Cursor::new(s)
    }

    #[test]
    fn s1_single_record_no_repeated_header() {
        let mut parser = FastqParser::new(seq(b"@r1\nACGT\n+\n!!!!\n"));
        assert_eq!(parser.first_record_had_repeated_header(), None);
        let rec = parser.next().unwrap().unwrap();
        assert_eq!(rec.name(), "r1");
        assert_eq!(rec.sequence(), "ACGT");
        assert_eq!(rec.qualities(), Some("!!!!"));
        assert_eq!(parser.first_record_had_repeated_header(), Some(false));
        assert!(parser.next().is_none());
    }

    #[test]
    fn s2_crlf_and_repeated_header() {
        let mut parser = FastqParser::new(seq(b"@r1 desc\r\nAC\r\n+r1 desc\r\nBB\r\n"));
        let rec = parser.next().unwrap().unwrap();
        assert_eq!(rec.name(), "r1 desc");
        assert_eq!(rec.sequence(), "AC");
        assert_eq!(rec.qualities(), Some("BB"));
        assert_eq!(parser.first_record_had_repeated_header(), Some(true));
        assert_eq!(rec.id(), "r1");
        assert_eq!(rec.comment(), Some("desc"));
        assert_eq!(parser.line_ending(), Some(LineEnding::Windows));
    }

    #[test]
    fn s3_missing_final_newline() {
        let mut parser = FastqParser::new(seq(b"@r\nA\n+\n!"));
        let rec = parser.next().unwrap().unwrap();
        assert_eq!(rec.name(), "r");
        assert_eq!(rec.sequence(), "A");
        assert_eq!(rec.qualities(), Some("!"));
        assert!(parser.next().is_none());
    }

    #[test]
    fn s4_header_mismatch() {
        let mut parser = FastqParser::new(seq(b"@r1\nAC\n+r2\n!!\n"));
        let err = parser.next().unwrap().unwrap_err();
        assert!(matches!(err, FastqError::HeaderMismatch { .. }));
    }

    #[test]
    fn empty_input_yields_no_records() {
        let mut parser = FastqParser::new(seq(b""));
        assert!(parser.next().is_none());
    }

    #[test]
    fn length_mismatch_is_reported() {
        let mut parser = FastqParser::new(seq(b"@r\nACGT\n+\n!!\n"));
        let err = parser.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            FastqError::LengthMismatch {
                seq_len: 4,
                qual_len: 2,
                ..
            }
        ));
    }

    #[test]
    fn bad_header_is_reported() {
        let mut parser = FastqParser::new(seq(b"r1\nACGT\n+\n!!!!\n"));
        let err = parser.next().unwrap().unwrap_err();
        assert!(matches!(err, FastqError::BadHeader { found: b'r', .. }));
    }

    #[test]
    fn bad_separator_is_reported() {
        let mut parser = FastqParser::new(seq(b"@r1\nACGT\n-\n!!!!\n"));
        let err = parser.next().unwrap().unwrap_err();
        assert!(matches!(err, FastqError::BadSeparator { found: b'-', .. }));
    }

    #[test]
    fn truncated_stream_is_premature_eof() {
        let mut parser = FastqParser::new(seq(b"@r1\nACGT\n+\n!!"));
        let err = parser.next().unwrap().unwrap_err();
        assert!(matches!(err, FastqError::PrematureEof { .. }));
    }

    #[test]
    fn trailing_blank_lines_are_tolerated() {
        let mut parser = FastqParser::new(seq(b"@r1\nACGT\n+\n!!!!\n\n"));
        assert!(parser.next().unwrap().is_ok());
        assert!(parser.next().is_none());
    }

    #[test]
    fn non_ascii_byte_is_rejected() {
        let mut parser = FastqParser::new(seq(b"@r1\nAC\xffT\n+\n!!!!\n"));
        let err = parser.next().unwrap().unwrap_err();
        assert!(matches!(err, FastqError::NonAscii { byte: 0xff, .. }));
    }

    #[test]
    fn transparent_growth_past_initial_capacity() {
        let long_seq = vec![b'A'; 1000];
        let long_qual = vec![b'!'; 1000];
        let mut input = Vec::new();
        input.extend_from_slice(b"@r1\n");
        input.extend_from_slice(&long_seq);
        input.push(b'\n');
        input.push(b'+');
        input.push(b'\n');
        input.extend_from_slice(&long_qual);
        input.push(b'\n');

        let mut parser = FastqParser::with_capacity(seq(&input), 16);
        let rec = parser.next().unwrap().unwrap();
        assert_eq!(rec.len(), 1000);
    }

    #[test]
    fn multiple_records_advance_line_and_byte_position() {
        let mut parser = FastqParser::new(seq(b"@a\nAC\n+\n!!\n@b\nGT\n+\n!!\n"));
        let r1 = parser.next().unwrap().unwrap();
        assert_eq!(r1.name(), "a");
        let r2 = parser.next().unwrap().unwrap();
        assert_eq!(r2.name(), "b");
        assert_eq!(parser.position().line(), 5);
        assert!(parser.next().is_none());
        assert_eq!(parser.records_emitted(), 2);
    }

    #[test]
    fn custom_record_constructor_is_invoked() {
        let config = FastqParserConfig {
            initial_buffer_size: None,
            custom_record_constructor: Some(Box::new(|name, sequence, qualities| {
                SequenceRecord::new(format!("custom:{name}").as_bytes(), sequence, qualities)
            })),
        };
        let mut parser = FastqParser::with_config(seq(b"@r1\nACGT\n+\n!!!!\n"), config);
        let rec = parser.next().unwrap().unwrap();
        assert_eq!(rec.name(), "custom:r1");
    }
}
