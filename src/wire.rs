//! Byte-level encoding of relocation payloads.
//!
//! Values are written back to back with `bincode`, so a reader must consume
//! them in exactly the order the writer produced them. A *segment* is a
//! length-prefixed run of values; readers can hand a segment to a decoder as
//! its own bounded reader, or skip it without decoding.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Cursor;

/// Append-only payload buffer.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Append one value.
    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        bincode::serialize_into(&mut self.buf, value)?;
        Ok(())
    }

    /// Append a length-prefixed segment filled by `fill`.
    pub fn write_segment(&mut self, fill: impl FnOnce(&mut ByteWriter) -> Result<()>) -> Result<()> {
        let mut segment = ByteWriter::new();
        fill(&mut segment)?;
        self.append_segment(&segment.buf)
    }

    /// Append already-encoded bytes as a segment.
    pub fn append_segment(&mut self, bytes: &[u8]) -> Result<()> {
        self.write(&(bytes.len() as u64))?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Sequential reader over a payload produced by [`ByteWriter`].
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    /// Read the next value.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(bincode::deserialize_from(&mut self.cursor)?)
    }

    fn segment_bounds(&mut self) -> Result<(usize, usize)> {
        let len = self.read::<u64>()? as usize;
        let start = self.cursor.position() as usize;
        let end = start.saturating_add(len);
        if end > self.cursor.get_ref().len() {
            return Err(Box::new(bincode::ErrorKind::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("segment of {len} bytes runs past the end of the payload"),
            )))
            .into());
        }
        self.cursor.set_position(end as u64);
        Ok((start, end))
    }

    /// Reader bounded to the next segment; this reader moves past it.
    pub fn read_segment(&mut self) -> Result<ByteReader<'a>> {
        let (start, end) = self.segment_bounds()?;
        let bytes: &'a [u8] = *self.cursor.get_ref();
        Ok(ByteReader::new(&bytes[start..end]))
    }

    /// Move past the next segment without decoding it.
    pub fn skip_segment(&mut self) -> Result<()> {
        self.segment_bounds().map(|_| ())
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.cursor.position() as usize
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::error::DistError;
    use crate::range::Interval;

    #[test]
    fn test_values_read_in_write_order() {
        let mut writer = ByteWriter::new();
        writer.write(&7u32).unwrap();
        writer.write("seven").unwrap();
        writer.write(&Interval::new(3, 9).unwrap()).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read::<u32>().unwrap(), 7);
        assert_eq!(reader.read::<String>().unwrap(), "seven");
        assert_eq!(reader.read::<Interval>().unwrap(), Interval::new(3, 9).unwrap());
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_segments_can_be_skipped() {
        let mut writer = ByteWriter::new();
        writer
            .write_segment(|w| w.write(&vec![1u64, 2, 3]))
            .unwrap();
        writer
            .write_segment(|w| w.write(&Chunk::from_fn(Interval::new(0, 2).unwrap(), |i| i).unwrap()))
            .unwrap();
        writer.write(&99u8).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        reader.skip_segment().unwrap();
        let mut segment = reader.read_segment().unwrap();
        let chunk: Chunk<i64> = segment.read().unwrap();
        assert!(segment.is_exhausted());
        assert_eq!(chunk.into_vec(), vec![0, 1]);
        assert_eq!(reader.read::<u8>().unwrap(), 99);
    }

    #[test]
    fn test_truncated_segment_is_codec_error() {
        let mut writer = ByteWriter::new();
        writer.write(&100u64).unwrap();
        writer.write(&1u8).unwrap();
        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(reader.read_segment(), Err(DistError::Codec(_))));
    }

    #[test]
    fn test_malformed_interval_rejected_on_decode() {
        let mut writer = ByteWriter::new();
        writer.write(&(5i64, 1i64)).unwrap();
        let bytes = writer.into_bytes();
        assert!(ByteReader::new(&bytes).read::<Interval>().is_err());
    }
}
