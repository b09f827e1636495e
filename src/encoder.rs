//! Assembling the FASTQ byte layout from a record's three fields.
//!
//! `'@' name '\n' sequence '\n' '+' [name] '\n' qualities '\n'`

/// Writes the FASTQ encoding of `(name, sequence, qualities)` into a freshly
/// allocated, precisely-sized buffer. `two_headers` repeats `name` after the
/// `+` separator.
pub fn encode_fastq(name: &[u8], sequence: &[u8], qualities: &[u8], two_headers: bool) -> Vec<u8> {
    let repeated_len = if two_headers { name.len() } else { 0 };
    // '@' name '\n' sequence '\n' '+' [name] '\n' qualities '\n'
    let total = 1 + name.len() + 1 + sequence.len() + 1 + 1 + repeated_len + 1 + qualities.len() + 1;

    let mut out = Vec::with_capacity(total);
    out.push(b'@');
    out.extend_from_slice(name);
    out.push(b'\n');
    out.extend_from_slice(sequence);
    out.push(b'\n');
    out.push(b'+');
    if two_headers {
        out.extend_from_slice(name);
    }
    out.push(b'\n');
    out.extend_from_slice(qualities);
    out.push(b'\n');

    debug_assert_eq!(out.len(), total);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_header() {
        let bytes = encode_fastq(b"r1", b"ACGT", b"!!!!", false);
        assert_eq!(bytes, b"@r1\nACGT\n+\n!!!!\n");
    }

    #[test]
    fn repeated_header() {
        let bytes = encode_fastq(b"r1 desc", b"AC", b"BB", true);
        assert_eq!(bytes, b"@r1 desc\nAC\n+r1 desc\nBB\n");
    }

    #[test]
    fn empty_fields() {
        let bytes = encode_fastq(b"", b"", b"", false);
        assert_eq!(bytes, b"@\n\n+\n\n");
    }
}
