//! Decodes an unaligned, single-read BAM stream into [`SequenceRecord`]s,
//! preserving the nanopore auxiliary tag block per record.

use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian};

use crate::bam_tags::BamTags;
use crate::errors::BamError;
use crate::parser::utils::{fill_buf, grow_to, BUFSIZE};
use crate::record::BytesSequenceRecord;
use crate::tables::{NT16_ALPHABET, NT16_BYTE_LUT};

const FIXED_HEADER_LEN: usize = 32;

#[derive(Default)]
pub struct BamParserConfig {
    pub read_in_size: Option<usize>,
}

/// Streams [`BytesSequenceRecord`]s out of a BAM byte source.
pub struct BamParser<R: Read> {
    buf_reader: buffer_redux::BufReader<R>,
    cursor: usize,
    header: Box<[u8]>,
    records_emitted: u64,
    finished: bool,
    read_in_size: usize,
}

fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<(), BamError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(BamError::Truncated { context }),
        Err(e) => Err(BamError::Io(e)),
    }
}

impl<R: Read> BamParser<R> {
    pub fn new(reader: R) -> Result<Self, BamError> {
        Self::with_config(reader, BamParserConfig::default())
    }

    pub fn with_config(mut reader: R, config: BamParserConfig) -> Result<Self, BamError> {
        let mut magic = [0u8; 4];
        read_exact_or_truncated(&mut reader, &mut magic, "magic")?;
        if magic != *b"BAM\x01" {
            return Err(BamError::BadMagic);
        }

        let mut word = [0u8; 4];
        read_exact_or_truncated(&mut reader, &mut word, "l_text")?;
        let l_text = LittleEndian::read_u32(&word) as usize;

        let mut header = vec![0u8; l_text];
        read_exact_or_truncated(&mut reader, &mut header, "header text")?;

        read_exact_or_truncated(&mut reader, &mut word, "n_ref")?;
        let n_ref = LittleEndian::read_u32(&word);
        for _ in 0..n_ref {
            read_exact_or_truncated(&mut reader, &mut word, "l_name")?;
            let l_name = LittleEndian::read_u32(&word) as usize;
            let mut skip = vec![0u8; l_name + 4];
            read_exact_or_truncated(&mut reader, &mut skip, "reference entry")?;
        }

        let read_in_size = config.read_in_size.unwrap_or(BUFSIZE).max(4);
        Ok(BamParser {
            buf_reader: buffer_redux::BufReader::with_capacity(read_in_size, reader),
            cursor: 0,
            header: header.into_boxed_slice(),
            records_emitted: 0,
            finished: false,
            read_in_size,
        })
    }

    /// The verbatim BAM text header (`@HD`/`@SQ`/... lines), if any.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn records_emitted(&self) -> u64 {
        self.records_emitted
    }

    #[inline]
    fn available(&self) -> usize {
        self.buf_reader.buffer().len() - self.cursor
    }

    fn grow_capacity_to(&mut self, want: usize) {
        while self.buf_reader.capacity() < want {
            let cap = self.buf_reader.capacity();
            let additional = grow_to(cap) - cap;
            self.buf_reader.reserve(additional);
        }
    }

    fn make_room(&mut self) {
        self.buf_reader.consume(self.cursor);
        self.buf_reader.make_room();
        self.cursor = 0;
    }

    /// Ensures at least `needed` bytes are buffered from `cursor`. Returns
    /// `Ok(true)` once satisfied, `Ok(false)` on a clean EOF with nothing
    /// left to decode, or `Err(Truncated)` on EOF mid-record.
    fn ensure_available(&mut self, needed: usize) -> Result<bool, BamError> {
        loop {
            if self.available() >= needed {
                return Ok(true);
            }
            if self.cursor != 0 {
                self.make_room();
            }
            self.grow_capacity_to(self.cursor + needed.max(self.read_in_size));

            let n = fill_buf(&mut self.buf_reader).map_err(BamError::Io)?;
            if n == 0 {
                return if self.available() == 0 {
                    Ok(false)
                } else {
                    Err(BamError::Truncated { context: "record" })
                };
            }
        }
    }

    fn decode_record(&mut self, block_size: usize) -> Result<BytesSequenceRecord, BamError> {
        let buf = self.buf_reader.buffer();
        let record_start = self.cursor + 4;
        let record = &buf[record_start..record_start + block_size];

        if record.len() < FIXED_HEADER_LEN {
            return Err(BamError::Truncated {
                context: "fixed record header",
            });
        }

        let l_read_name = record[8] as usize;
        let n_cigar_op = LittleEndian::read_u16(&record[12..14]) as usize;
        let flag = LittleEndian::read_u16(&record[14..16]);
        let l_seq = LittleEndian::read_u32(&record[16..20]) as usize;

        if flag != 4 {
            return Err(BamError::Unsupported { flag });
        }

        let mut offset = FIXED_HEADER_LEN;
        let name_end = offset + l_read_name;
        if name_end > record.len() || l_read_name == 0 {
            return Err(BamError::Truncated { context: "read name" });
        }
        let name = &record[offset..name_end - 1]; // drop trailing NUL
        offset = name_end;

        offset += n_cigar_op * 4;

        let packed_len = (l_seq + 1) / 2;
        let seq_end = offset + packed_len;
        if seq_end > record.len() {
            return Err(BamError::Truncated { context: "packed sequence" });
        }
        let sequence = decode_nt16(&record[offset..seq_end], l_seq);
        offset = seq_end;

        let qual_end = offset + l_seq;
        if qual_end > record.len() {
            return Err(BamError::Truncated { context: "qualities" });
        }
        let qualities = decode_qualities(&record[offset..qual_end]);

        let tags = BamTags::from_bytes(record[qual_end..].to_vec());

        Ok(BytesSequenceRecord::new_unchecked(
            name,
            &sequence,
            qualities.as_deref(),
            Some(tags),
        ))
    }
}

impl<R: Read> Iterator for BamParser<R> {
    type Item = Result<BytesSequenceRecord, BamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.ensure_available(4) {
            Ok(true) => {}
            Ok(false) => {
                self.finished = true;
                return None;
            }
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        }

        let block_size =
            LittleEndian::read_u32(&self.buf_reader.buffer()[self.cursor..self.cursor + 4]) as usize;

        match self.ensure_available(4 + block_size) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                self.finished = true;
                return Some(Err(BamError::Truncated {
                    context: "block_size payload",
                }));
            }
        }

        let record = match self.decode_record(block_size) {
            Ok(r) => r,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };

        self.cursor += 4 + block_size;
        self.records_emitted += 1;
        Some(Ok(record))
    }
}

/// Decodes `packed` (two 4-bit bases per byte, high nibble first) into
/// `l_seq` ASCII bases, using the SIMD shuffle fast path when available.
pub(crate) fn decode_nt16(packed: &[u8], l_seq: usize) -> Vec<u8> {
    #[cfg(target_arch = "x86_64")]
    {
        if packed.len() >= 16 && is_x86_feature_detected!("ssse3") {
            // SAFETY: guarded by the runtime feature check above.
            return unsafe { decode_nt16_ssse3(packed, l_seq) };
        }
    }
    decode_nt16_scalar(packed, l_seq)
}

fn decode_nt16_scalar(packed: &[u8], l_seq: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(l_seq);
    let full_bytes = l_seq / 2;
    for &byte in &packed[..full_bytes] {
        let [hi, lo] = NT16_BYTE_LUT[byte as usize];
        out.push(hi);
        out.push(lo);
    }
    if l_seq % 2 == 1 {
        out.push(NT16_BYTE_LUT[packed[full_bytes] as usize][0]);
    }
    out
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "ssse3")]
unsafe fn decode_nt16_ssse3(packed: &[u8], l_seq: usize) -> Vec<u8> {
    use std::arch::x86_64::*;

    let lut = _mm_loadu_si128(NT16_ALPHABET.as_ptr().cast());
    let nibble_mask = _mm_set1_epi8(0x0F);
    let mut out = Vec::with_capacity(packed.len() * 2);

    let mut chunks = packed.chunks_exact(16);
    for chunk in &mut chunks {
        let bytes = _mm_loadu_si128(chunk.as_ptr().cast());
        let hi_nibbles = _mm_and_si128(_mm_srli_epi16(bytes, 4), nibble_mask);
        let lo_nibbles = _mm_and_si128(bytes, nibble_mask);
        let hi_chars = _mm_shuffle_epi8(lut, hi_nibbles);
        let lo_chars = _mm_shuffle_epi8(lut, lo_nibbles);

        let mut block = [0u8; 32];
        _mm_storeu_si128(block[0..16].as_mut_ptr().cast(), _mm_unpacklo_epi8(hi_chars, lo_chars));
        _mm_storeu_si128(block[16..32].as_mut_ptr().cast(), _mm_unpackhi_epi8(hi_chars, lo_chars));
        out.extend_from_slice(&block);
    }

    for &byte in chunks.remainder() {
        let [hi, lo] = NT16_BYTE_LUT[byte as usize];
        out.push(hi);
        out.push(lo);
    }

    out.truncate(l_seq);
    out
}

/// Translates raw BAM quality bytes into Phred+33 ASCII. `None` if the
/// sequence carries no qualities (first byte `0xFF`).
fn decode_qualities(raw: &[u8]) -> Option<Vec<u8>> {
    if raw.is_empty() {
        return Some(Vec::new());
    }
    if raw[0] == 0xFF {
        return None;
    }
    let mut out = raw.to_vec();
    add33(&mut out);
    Some(out)
}

fn add33(bytes: &mut [u8]) {
    #[cfg(target_arch = "x86_64")]
    {
        if bytes.len() >= 16 && is_x86_feature_detected!("sse2") {
            // SAFETY: guarded by the runtime feature check above.
            unsafe { add33_sse2(bytes) };
            return;
        }
    }
    for b in bytes {
        *b = b.wrapping_add(33);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn add33_sse2(bytes: &mut [u8]) {
    use std::arch::x86_64::*;

    let offset = _mm_set1_epi8(33);
    let mut chunks = bytes.chunks_exact_mut(16);
    for chunk in &mut chunks {
        let v = _mm_loadu_si128(chunk.as_ptr().cast());
        let added = _mm_add_epi8(v, offset);
        _mm_storeu_si128(chunk.as_mut_ptr().cast(), added);
    }
    for b in chunks.into_remainder() {
        *b = b.wrapping_add(33);
    }
}
