//! Lazy access to the BAM auxiliary-tag block preserved on BAM-sourced
//! records, and the slice-time re-trimming of the nanopore move-table tags
//! (`mv`, `ns`, `ts`).

/// The verbatim tag block of a BAM record: a sequence of
/// `name(2) type(1) value(...)` entries, starting right after the quality
/// bytes and running to the end of the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BamTags(Box<[u8]>);

/// One decoded tag entry: its two-byte name, its type byte, and the raw
/// bytes of its value (header bytes for `B` arrays included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag<'a> {
    pub name: [u8; 2],
    pub type_byte: u8,
    pub value: &'a [u8],
}

impl BamTags {
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        BamTags(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn iter(&self) -> TagIter<'_> {
        TagIter { rest: &self.0 }
    }

    pub fn get(&self, name: &[u8; 2]) -> Option<Tag<'_>> {
        self.iter().find(|t| &t.name == name)
    }

    /// Recomputes `mv`/`ns`/`ts` for the base sub-range `[start, stop)` of a
    /// unit-step slice, drops `MN`/`du`, and copies every other tag
    /// unchanged. Returns `None` (caller drops all tags) if the tag block
    /// carries no `mv` table or it is malformed.
    pub fn retrim(&self, start: usize, stop: usize) -> Option<BamTags> {
        let mv = self.get(b"mv")?;
        let (stride, flags) = decode_move_table(mv.value)?;

        let boundaries = base_boundaries(flags);
        if stop > boundaries.len() {
            return None;
        }
        let sample_start = if start < boundaries.len() {
            boundaries[start]
        } else {
            flags.len()
        };
        let sample_end = if stop < boundaries.len() {
            boundaries[stop]
        } else {
            flags.len()
        };
        if sample_start > sample_end || sample_end > flags.len() {
            return None;
        }

        let old_ts: i64 = self.get(b"ts").and_then(|t| decode_int(&t)).unwrap_or(0);
        let new_ts = old_ts + (sample_start as i64) * i64::from(stride);
        let new_mv_len = sample_end - sample_start;
        let new_ns = new_mv_len as i64 * i64::from(stride) + new_ts.max(0);

        let mut out = Vec::with_capacity(self.0.len());
        for tag in self.iter() {
            match &tag.name {
                b"mv" => encode_move_table(&mut out, stride, &flags[sample_start..sample_end]),
                b"ns" => encode_int_like(&mut out, *b"ns", tag.type_byte, new_ns),
                b"ts" => encode_int_like(&mut out, *b"ts", tag.type_byte, new_ts),
                b"MN" | b"du" => {}
                _ => encode_tag_verbatim(&mut out, &tag),
            }
        }
        Some(BamTags(out.into_boxed_slice()))
    }
}

pub struct TagIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for TagIter<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        if self.rest.len() < 3 {
            return None;
        }
        let name = [self.rest[0], self.rest[1]];
        let type_byte = self.rest[2];
        let header_len = 3;
        let value_len = tag_value_len(type_byte, &self.rest[header_len..])?;
        let total = header_len + value_len;
        if self.rest.len() < total {
            return None;
        }
        let value = &self.rest[header_len..total];
        self.rest = &self.rest[total..];
        Some(Tag {
            name,
            type_byte,
            value,
        })
    }
}

fn array_item_size(subtype: u8) -> Option<usize> {
    match subtype {
        b'c' | b'C' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        _ => None,
    }
}

fn tag_value_len(type_byte: u8, value: &[u8]) -> Option<usize> {
    match type_byte {
        b'A' | b'c' | b'C' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        b'Z' | b'H' => value.iter().position(|&b| b == 0).map(|p| p + 1),
        b'B' => {
            if value.len() < 5 {
                return None;
            }
            let item_size = array_item_size(value[0])?;
            let count = u32::from_le_bytes(value[1..5].try_into().ok()?) as usize;
            Some(5 + count * item_size)
        }
        _ => None,
    }
}

fn decode_int(tag: &Tag<'_>) -> Option<i64> {
    match tag.type_byte {
        b'c' => Some(i64::from(tag.value[0] as i8)),
        b'C' => Some(i64::from(tag.value[0])),
        b's' => Some(i64::from(i16::from_le_bytes(tag.value[..2].try_into().ok()?))),
        b'S' => Some(i64::from(u16::from_le_bytes(tag.value[..2].try_into().ok()?))),
        b'i' => Some(i64::from(i32::from_le_bytes(tag.value[..4].try_into().ok()?))),
        b'I' => Some(i64::from(u32::from_le_bytes(tag.value[..4].try_into().ok()?))),
        _ => None,
    }
}

fn decode_move_table(value: &[u8]) -> Option<(i8, Vec<u8>)> {
    if value.is_empty() || value[0] != b'c' {
        return None;
    }
    let count = u32::from_le_bytes(value[1..5].try_into().ok()?) as usize;
    let items = &value[5..];
    if items.len() < count || count == 0 {
        return None;
    }
    let stride = items[0] as i8;
    let flags = items[1..count].to_vec();
    Some((stride, flags))
}

fn base_boundaries(flags: Vec<u8>) -> Vec<usize> {
    flags
        .iter()
        .enumerate()
        .filter(|&(_, &f)| f == 1)
        .map(|(i, _)| i)
        .collect()
}

fn encode_move_table(out: &mut Vec<u8>, stride: i8, flags: &[u8]) {
    out.extend_from_slice(b"mv");
    out.push(b'B');
    out.push(b'c');
    let count = (flags.len() + 1) as u32;
    out.extend_from_slice(&count.to_le_bytes());
    out.push(stride as u8);
    out.extend_from_slice(flags);
}

fn encode_int_like(out: &mut Vec<u8>, name: [u8; 2], type_byte: u8, value: i64) {
    out.extend_from_slice(&name);
    out.push(type_byte);
    match type_byte {
        b'c' => out.push(value as i8 as u8),
        b'C' => out.push(value as u8),
        b's' => out.extend_from_slice(&(value as i16).to_le_bytes()),
        b'S' => out.extend_from_slice(&(value as u16).to_le_bytes()),
        b'i' => out.extend_from_slice(&(value as i32).to_le_bytes()),
        b'I' => out.extend_from_slice(&(value as u32).to_le_bytes()),
        _ => out.extend_from_slice(&(value as i32).to_le_bytes()),
    }
}

fn encode_tag_verbatim(out: &mut Vec<u8>, tag: &Tag<'_>) {
    out.extend_from_slice(&tag.name);
    out.push(tag.type_byte);
    out.extend_from_slice(tag.value);
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_int_tag(name: &[u8; 2], type_byte: u8, value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        encode_int_like(&mut out, *name, type_byte, value);
        out
    }

    #[test]
    fn iterates_simple_tags() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&make_int_tag(b"ns", b'i', 10));
        buf.extend_from_slice(&make_int_tag(b"ts", b'i', 2));
        let tags = BamTags::from_bytes(buf);
        let names: Vec<_> = tags.iter().map(|t| t.name).collect();
        assert_eq!(names, vec![*b"ns", *b"ts"]);
    }

    #[test]
    fn retrims_move_table() {
        let mut buf = Vec::new();
        // mv: stride=5, flags for 3 bases: base0 at sample0, base1 at sample2, base2 at sample4
        let mut mv_value = vec![b'c'];
        mv_value.extend_from_slice(&7u32.to_le_bytes()); // stride + 6 flags
        mv_value.push(5); // stride
        mv_value.extend_from_slice(&[1, 0, 1, 0, 1, 0]);
        buf.extend_from_slice(b"mv");
        buf.push(b'B');
        buf.extend_from_slice(&mv_value);
        buf.extend_from_slice(&make_int_tag(b"ns", b'i', 6 * 5));
        buf.extend_from_slice(&make_int_tag(b"ts", b'i', 0));

        let tags = BamTags::from_bytes(buf);
        let sliced = tags.retrim(1, 3).expect("retrim succeeds");

        let ns = decode_int(&sliced.get(b"ns").unwrap()).unwrap();
        let ts = decode_int(&sliced.get(b"ts").unwrap()).unwrap();
        // base 1 starts at sample 2 -> ts advances by 2*5=10
        assert_eq!(ts, 10);
        // kept samples = [2,6) = 4 samples -> ns = 4*5 + ts = 30
        assert_eq!(ns, 30);
        assert!(sliced.get(b"mv").is_some());
    }

    #[test]
    fn drops_mn_and_du_on_retrim() {
        let mut buf = Vec::new();
        let mut mv_value = vec![b'c'];
        mv_value.extend_from_slice(&3u32.to_le_bytes());
        mv_value.push(1);
        mv_value.extend_from_slice(&[1, 1]);
        buf.extend_from_slice(b"mv");
        buf.push(b'B');
        buf.extend_from_slice(&mv_value);
        buf.extend_from_slice(&make_int_tag(b"MN", b'i', 99));
        let tags = BamTags::from_bytes(buf);
        let sliced = tags.retrim(0, 1).unwrap();
        assert!(sliced.get(b"MN").is_none());
    }
}
