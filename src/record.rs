//! The record model: a single parsed sequence, generic over whether its
//! fields are exposed as `&str` or `&[u8]`.

use std::sync::OnceLock;

use crate::ascii::is_ascii;
use crate::bam_tags::BamTags;
use crate::encoder::encode_fastq;
use crate::errors::RecordError;
use crate::mate::is_mate;
use crate::tables::COMPLEMENT;

mod sealed {
    pub trait Sealed {}
}

/// The string-vs-bytes axis a [`SequenceRecord`] is generic over. Sealed:
/// only [`StrFlavor`] and [`BytesFlavor`] implement it.
pub trait RecordFlavor: sealed::Sealed {
    /// The type `name()`/`sequence()`/`comment()` return borrows of.
    type Borrowed: ?Sized + 'static;

    fn wrap(bytes: &[u8]) -> &Self::Borrowed;
    fn unwrap(value: &Self::Borrowed) -> &[u8];
}

/// Marker for records whose fields are exposed as validated UTF-8 `&str`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrFlavor;

/// Marker for records whose fields are exposed as raw `&[u8]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytesFlavor;

impl sealed::Sealed for StrFlavor {}
impl sealed::Sealed for BytesFlavor {}

impl RecordFlavor for StrFlavor {
    type Borrowed = str;

    fn wrap(bytes: &[u8]) -> &str {
        // SAFETY: every byte slice stored on a `StrFlavor` record has
        // already passed `is_ascii`, which is a stricter condition than
        // UTF-8 validity.
        unsafe { std::str::from_utf8_unchecked(bytes) }
    }

    fn unwrap(value: &str) -> &[u8] {
        value.as_bytes()
    }
}

impl RecordFlavor for BytesFlavor {
    type Borrowed = [u8];

    fn wrap(bytes: &[u8]) -> &[u8] {
        bytes
    }

    fn unwrap(value: &[u8]) -> &[u8] {
        value
    }
}

/// A single parsed sequencing record with string-typed fields.
pub type SequenceRecord = SequenceRecordGeneric<StrFlavor>;
/// A single parsed sequencing record with raw byte-typed fields.
pub type BytesSequenceRecord = SequenceRecordGeneric<BytesFlavor>;

/// A parsed name, sequence, and optional qualities, plus (for BAM-sourced
/// records) the preserved auxiliary tag block.
///
/// Immutable once constructed and `Send + Sync`: the `id`/`comment` split
/// point is memoized behind a [`OnceLock`], never a `Cell`.
pub struct SequenceRecordGeneric<F: RecordFlavor> {
    name: Box<[u8]>,
    sequence: Box<[u8]>,
    qualities: Option<Box<[u8]>>,
    bam_tags: Option<BamTags>,
    id_split: OnceLock<usize>,
    _flavor: std::marker::PhantomData<F>,
}

impl<F: RecordFlavor> SequenceRecordGeneric<F> {
    /// Builds a record from raw bytes, validating that `name`, `sequence`,
    /// and `qualities` (if present) are all 7-bit ASCII and that a supplied
    /// `qualities` is the same length as `sequence`.
    pub fn new(
        name: &[u8],
        sequence: &[u8],
        qualities: Option<&[u8]>,
    ) -> Result<Self, RecordError> {
        if !is_ascii(name) {
            return Err(non_ascii("name", name));
        }
        if !is_ascii(sequence) {
            return Err(non_ascii("sequence", sequence));
        }
        if let Some(qual) = qualities {
            if !is_ascii(qual) {
                return Err(non_ascii("qualities", qual));
            }
            if qual.len() != sequence.len() {
                return Err(RecordError::LengthMismatch {
                    seq_len: sequence.len(),
                    qual_len: qual.len(),
                });
            }
        }
        Ok(Self::new_unchecked(name, sequence, qualities, None))
    }

    /// Builds a record without re-validating ASCII or length — used by
    /// parsers that have already scanned the whole buffer for ASCII
    /// violations and checked lengths themselves.
    pub(crate) fn new_unchecked(
        name: &[u8],
        sequence: &[u8],
        qualities: Option<&[u8]>,
        bam_tags: Option<BamTags>,
    ) -> Self {
        SequenceRecordGeneric {
            name: name.into(),
            sequence: sequence.into(),
            qualities: qualities.map(Into::into),
            bam_tags,
            id_split: OnceLock::new(),
            _flavor: std::marker::PhantomData,
        }
    }

    pub fn name(&self) -> &F::Borrowed {
        F::wrap(&self.name)
    }

    pub fn sequence(&self) -> &F::Borrowed {
        F::wrap(&self.sequence)
    }

    pub fn qualities(&self) -> Option<&F::Borrowed> {
        self.qualities.as_deref().map(F::wrap)
    }

    pub fn qualities_as_bytes(&self) -> Option<&[u8]> {
        self.qualities.as_deref()
    }

    pub fn bam_tags(&self) -> Option<&BamTags> {
        self.bam_tags.as_ref()
    }

    /// Number of bases in `sequence`.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    fn split_point(&self) -> usize {
        *self.id_split.get_or_init(|| {
            self.name
                .iter()
                .position(|&b| b == b' ' || b == b'\t')
                .unwrap_or(self.name.len())
        })
    }

    /// The header up to (not including) the first space or tab.
    pub fn id(&self) -> &F::Borrowed {
        F::wrap(&self.name[..self.split_point()])
    }

    /// The header after the first run of spaces/tabs, or `None` if there
    /// isn't one (no whitespace in `name`, or nothing follows the run).
    pub fn comment(&self) -> Option<&F::Borrowed> {
        let split = self.split_point();
        let rest = &self.name[split..];
        let skip = rest.iter().take_while(|&&b| b == b' ' || b == b'\t').count();
        if skip == rest.len() {
            None
        } else {
            Some(F::wrap(&rest[skip..]))
        }
    }

    /// A new record covering `sequence[start..stop]` (and the matching
    /// `qualities` range, if present). BAM auxiliary tags are re-trimmed via
    /// [`BamTags::retrim`] for a unit-step range and dropped otherwise.
    pub fn slice(&self, start: usize, stop: usize) -> Self {
        assert!(start <= stop && stop <= self.len(), "slice out of bounds");
        let bam_tags = self
            .bam_tags
            .as_ref()
            .and_then(|tags| tags.retrim(start, stop));
        SequenceRecordGeneric {
            name: self.name.clone(),
            sequence: self.sequence[start..stop].into(),
            qualities: self
                .qualities
                .as_ref()
                .map(|q| q[start..stop].into()),
            bam_tags,
            id_split: OnceLock::new(),
            _flavor: std::marker::PhantomData,
        }
    }

    /// A new record with `sequence` reverse-complemented and `qualities`
    /// reversed. BAM tags are dropped: the move table has no defined meaning
    /// under reversal.
    pub fn reverse_complement(&self) -> Self {
        let sequence: Box<[u8]> = self
            .sequence
            .iter()
            .rev()
            .map(|&b| COMPLEMENT[b as usize])
            .collect();
        let qualities = self
            .qualities
            .as_ref()
            .map(|q| q.iter().rev().copied().collect());
        SequenceRecordGeneric {
            name: self.name.clone(),
            sequence,
            qualities,
            bam_tags: None,
            id_split: OnceLock::new(),
            _flavor: std::marker::PhantomData,
        }
    }

    /// Structural equality over `name`, `sequence`, and `qualities` only —
    /// BAM tags are not compared.
    pub fn equals(&self, other: &Self) -> bool {
        self.name == other.name
            && self.sequence == other.sequence
            && self.qualities == other.qualities
    }

    /// True iff this record's header and `other`'s header name the same
    /// sequencing fragment. See [`is_mate`].
    pub fn is_mate(&self, other: &Self) -> bool {
        is_mate(&self.name, &other.name)
    }

    /// The FASTQ-encoded bytes of this record. Fails if it has no
    /// qualities.
    pub fn fastq_bytes(&self, two_headers: bool) -> Result<Vec<u8>, RecordError> {
        let qualities = self
            .qualities
            .as_deref()
            .ok_or(RecordError::QualitiesRequired)?;
        Ok(encode_fastq(&self.name, &self.sequence, qualities, two_headers))
    }
}

fn non_ascii(field: &'static str, bytes: &[u8]) -> RecordError {
    let (offset, byte) = bytes
        .iter()
        .enumerate()
        .find(|&(_, &b)| b >= 0x80)
        .map(|(i, &b)| (i, b))
        .unwrap_or((0, 0));
    RecordError::NonAscii {
        field,
        byte,
        offset,
    }
}

impl<F: RecordFlavor> Clone for SequenceRecordGeneric<F> {
    fn clone(&self) -> Self {
        SequenceRecordGeneric {
            name: self.name.clone(),
            sequence: self.sequence.clone(),
            qualities: self.qualities.clone(),
            bam_tags: self.bam_tags.clone(),
            id_split: self.id_split.clone(),
            _flavor: std::marker::PhantomData,
        }
    }
}

impl<F: RecordFlavor> PartialEq for SequenceRecordGeneric<F> {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl<F: RecordFlavor> std::fmt::Debug for SequenceRecordGeneric<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceRecord")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("sequence", &String::from_utf8_lossy(&self.sequence))
            .field("qualities", &self.qualities.as_ref().map(|q| q.len()))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn is_send_sync<T: Send + Sync>() {}

    #[test]
    fn record_is_send_and_sync() {
        is_send_sync::<SequenceRecord>();
        is_send_sync::<BytesSequenceRecord>();
    }

    #[test]
    fn rejects_non_ascii_sequence() {
        let err = SequenceRecord::new(b"r1", b"AC\xffT", None).unwrap_err();
        assert!(matches!(err, RecordError::NonAscii { field: "sequence", .. }));
    }

    #[test]
    fn rejects_length_mismatch() {
        let err = SequenceRecord::new(b"r1", b"ACGT", Some(b"!!!")).unwrap_err();
        assert!(matches!(err, RecordError::LengthMismatch { seq_len: 4, qual_len: 3 }));
    }

    #[test]
    fn id_and_comment_split_on_first_space() {
        let rec = SequenceRecord::new(b"r1 extra info", b"ACGT", None).unwrap();
        assert_eq!(rec.id(), "r1");
        assert_eq!(rec.comment(), Some("extra info"));
    }

    #[test]
    fn no_comment_when_no_whitespace() {
        let rec = SequenceRecord::new(b"r1", b"ACGT", None).unwrap();
        assert_eq!(rec.id(), "r1");
        assert_eq!(rec.comment(), None);
    }

    #[test]
    fn comment_collapses_a_run_of_whitespace() {
        let rec = SequenceRecord::new(b"r1  extra", b"ACGT", None).unwrap();
        assert_eq!(rec.id(), "r1");
        assert_eq!(rec.comment(), Some("extra"));
    }

    #[test]
    fn comment_is_none_when_only_trailing_whitespace() {
        let rec = SequenceRecord::new(b"r1 ", b"ACGT", None).unwrap();
        assert_eq!(rec.id(), "r1");
        assert_eq!(rec.comment(), None);
    }

    #[test]
    fn slice_keeps_matching_quality_range() {
        let rec = SequenceRecord::new(b"r1", b"ACGTAC", Some(b"!!!!!!")).unwrap();
        let sliced = rec.slice(1, 4);
        assert_eq!(sliced.sequence(), "CGT");
        assert_eq!(sliced.qualities(), Some("!!!"));
    }

    #[test]
    fn reverse_complement_matches_expected() {
        let rec = SequenceRecord::new(b"r1", b"ACGT", Some(b"1234")).unwrap();
        let rc = rec.reverse_complement();
        assert_eq!(rc.sequence(), "ACGT");
        assert_eq!(rc.qualities(), Some("4321"));
    }

    #[test]
    fn fastq_bytes_requires_qualities() {
        let rec = SequenceRecord::new(b"r1", b"ACGT", None).unwrap();
        assert!(matches!(
            rec.fastq_bytes(false),
            Err(RecordError::QualitiesRequired)
        ));
    }

    #[test]
    fn fastq_bytes_roundtrip() {
        let rec = SequenceRecord::new(b"r1", b"ACGT", Some(b"!!!!")).unwrap();
        assert_eq!(rec.fastq_bytes(false).unwrap(), b"@r1\nACGT\n+\n!!!!\n");
    }

    #[test]
    fn bytes_flavor_exposes_raw_slices() {
        let rec = BytesSequenceRecord::new(b"r1", b"ACGT", None).unwrap();
        assert_eq!(rec.sequence(), b"ACGT");
    }
}
