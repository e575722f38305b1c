//! Self-describing map blobs.
//!
//! ```text
//! 0x00  u32  version
//! 0x04  u32  entry size
//! 0x08  u32  entry count
//! 0x0c  u32  text region size
//! 0x10  u64  text region offset
//! 0x18  [u8; 16] reserved
//! 0x28  map specific header
//!       entry array
//!       text region (NUL separated UTF-8, offset 0 is the empty string)
//! ```
//!
//! String fields inside entries are `u32` offsets into the text region.

use crate::error::Error;
use std::collections::HashMap;

pub const COMMON_HEADER_SIZE: usize = 0x28;

/// Interned NUL separated strings.
#[derive(Debug)]
pub struct TextRegion {
    bytes: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for TextRegion {
    fn default() -> Self {
        Self {
            bytes: vec![0],
            offsets: HashMap::new(),
        }
    }
}

impl TextRegion {
    pub fn intern(&mut self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        if let Some(&offset) = self.offsets.get(text) {
            return offset;
        }
        let offset = self.bytes.len() as u32;
        // an embedded NUL would truncate the string on the reader side
        self.bytes.extend(text.bytes().map(|b| if b == 0 { b'?' } else { b }));
        self.bytes.push(0);
        self.offsets.insert(text.to_owned(), offset);
        offset
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len() <= 1
    }
}

/// Little endian field writer shared by headers and entries.
pub struct FieldWriter<'a> {
    out: &'a mut Vec<u8>,
    text: &'a mut TextRegion,
}

impl<'a> FieldWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>, text: &'a mut TextRegion) -> Self {
        Self { out, text }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.out.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.out.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.out.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.out.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn flag(&mut self, value: bool) -> &mut Self {
        self.u32(u32::from(value))
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.out.extend_from_slice(value);
        self
    }

    pub fn text(&mut self, value: &str) -> &mut Self {
        let offset = self.text.intern(value);
        self.u32(offset)
    }

    pub fn pad(&mut self, n: usize) -> &mut Self {
        self.out.resize(self.out.len() + n, 0);
        self
    }
}

/// A record with a fixed wire size.
pub trait WireEntry {
    const VERSION: u32;
    const SIZE: usize;

    fn encode(&self, w: &mut FieldWriter<'_>);
}

/// Encode `entries` with the map specific `header` fields.
pub fn encode_map<E: WireEntry>(entries: &[E], header: impl FnOnce(&mut FieldWriter<'_>)) -> Vec<u8> {
    let mut text = TextRegion::default();

    let mut extra = Vec::new();
    header(&mut FieldWriter::new(&mut extra, &mut text));

    let mut body = Vec::with_capacity(entries.len() * E::SIZE);
    for entry in entries {
        let before = body.len();
        entry.encode(&mut FieldWriter::new(&mut body, &mut text));
        debug_assert_eq!(body.len() - before, E::SIZE, "entry size mismatch");
    }

    let text_offset = COMMON_HEADER_SIZE + extra.len() + body.len();
    let mut blob = Vec::with_capacity(text_offset + text.len());
    blob.extend_from_slice(&E::VERSION.to_le_bytes());
    blob.extend_from_slice(&(E::SIZE as u32).to_le_bytes());
    blob.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    blob.extend_from_slice(&(text.len() as u32).to_le_bytes());
    blob.extend_from_slice(&(text_offset as u64).to_le_bytes());
    blob.extend_from_slice(&[0; 16]);
    blob.extend_from_slice(&extra);
    blob.extend_from_slice(&body);
    blob.extend_from_slice(&text.bytes);
    blob
}

/// Two-call copy out: `None` reports the size, a short buffer is refused.
pub fn copy_out(blob: &[u8], buf: Option<&mut [u8]>) -> Result<usize, Error> {
    let Some(buf) = buf else {
        return Ok(blob.len());
    };
    if buf.len() < blob.len() {
        return Err(Error::BufferTooSmall {
            required: blob.len(),
        });
    }
    buf[..blob.len()].copy_from_slice(blob);
    Ok(blob.len())
}

pub fn le_u16(bytes: &[u8], at: usize) -> u16 {
    bytes
        .get(at..at + 2)
        .and_then(|b| b.try_into().ok())
        .map_or(0, u16::from_le_bytes)
}

pub fn le_u32(bytes: &[u8], at: usize) -> u32 {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map_or(0, u32::from_le_bytes)
}

pub fn le_u64(bytes: &[u8], at: usize) -> u64 {
    bytes
        .get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map_or(0, u64::from_le_bytes)
}

/// Read side of a blob.
#[derive(Debug, Clone, Copy)]
pub struct BlobView<'a> {
    bytes: &'a [u8],
}

impl<'a> BlobView<'a> {
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < COMMON_HEADER_SIZE {
            return None;
        }
        let view = Self { bytes };
        let entries_end = view.entries_start()?.checked_add(view.entry_size() * view.count())?;
        let text_end = view.text_offset().checked_add(le_u32(bytes, 0x0c) as usize)?;
        (entries_end <= view.text_offset() && text_end <= bytes.len()).then_some(view)
    }

    pub fn version(&self) -> u32 {
        le_u32(self.bytes, 0)
    }

    pub fn entry_size(&self) -> usize {
        le_u32(self.bytes, 4) as usize
    }

    pub fn count(&self) -> usize {
        le_u32(self.bytes, 8) as usize
    }

    fn text_offset(&self) -> usize {
        le_u64(self.bytes, 0x10) as usize
    }

    fn entries_start(&self) -> Option<usize> {
        self.text_offset()
            .checked_sub(self.entry_size() * self.count())
            .filter(|&start| start >= COMMON_HEADER_SIZE)
    }

    /// Map specific header bytes.
    pub fn header(&self) -> &'a [u8] {
        let start = self.entries_start().unwrap_or(COMMON_HEADER_SIZE);
        &self.bytes[COMMON_HEADER_SIZE..start]
    }

    pub fn entry(&self, index: usize) -> Option<&'a [u8]> {
        if index >= self.count() {
            return None;
        }
        let start = self.entries_start()? + index * self.entry_size();
        self.bytes.get(start..start + self.entry_size())
    }

    pub fn entries(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.count()).filter_map(|i| self.entry(i))
    }

    pub fn text(&self, offset: u32) -> Option<&'a str> {
        let region = &self.bytes[self.text_offset()..];
        let tail = region.get(offset as usize..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..end]).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Pair {
        value: u64,
        name: &'static str,
    }

    impl WireEntry for Pair {
        const VERSION: u32 = 7;
        const SIZE: usize = 16;

        fn encode(&self, w: &mut FieldWriter<'_>) {
            w.u64(self.value).text(self.name).pad(4);
        }
    }

    fn sample() -> Vec<u8> {
        let entries = [
            Pair { value: 1, name: "one" },
            Pair { value: 2, name: "" },
            Pair { value: 3, name: "one" },
        ];
        encode_map(&entries, |w| {
            w.u64(0xfeed);
        })
    }

    #[test]
    fn blob_is_self_describing() {
        let blob = sample();
        let view = BlobView::parse(&blob).unwrap();
        assert_eq!(view.version(), 7);
        assert_eq!(view.count(), 3);
        assert_eq!(view.entry_size(), 16);
        assert_eq!(le_u64(view.header(), 0), 0xfeed);

        let names: Vec<&str> = view
            .entries()
            .map(|e| view.text(le_u32(e, 8)).unwrap())
            .collect();
        assert_eq!(names, ["one", "", "one"]);
        // interned once
        assert_eq!(le_u32(view.entry(0).unwrap(), 8), le_u32(view.entry(2).unwrap(), 8));
    }

    #[test]
    fn two_call_convention() {
        let blob = sample();
        let size = copy_out(&blob, None).unwrap();
        assert_eq!(size, blob.len());

        let mut short = vec![0; size - 1];
        assert!(matches!(
            copy_out(&blob, Some(&mut short)),
            Err(Error::BufferTooSmall { required }) if required == size
        ));

        let mut exact = vec![0; size];
        assert_eq!(copy_out(&blob, Some(&mut exact)).unwrap(), size);
        assert_eq!(exact, blob);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let blob = sample();
        assert!(BlobView::parse(&blob[..blob.len() - 2]).is_none());
        assert!(BlobView::parse(&blob[..8]).is_none());
    }
}
