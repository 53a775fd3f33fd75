//! Fixed-layout binary helpers shared by the replica codecs.
//!
//! Strings are written as UTF-8 followed by a NUL terminator. Numeric fields
//! are fixed width in native byte order; peers are expected to share the
//! host's endianness.

use crate::error::ReplicaError;

/// Appends fields to a payload buffer.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buffer: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Writes `value` followed by a NUL byte. Interior NULs are not escaped.
    pub fn write_str(&mut self, value: &str) -> &mut Self {
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.push(0);
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Reads fields back in the order they were written.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    type_tag: &'a str,
    data: &'a [u8],
    position: usize,
}

impl<'a> PayloadReader<'a> {
    /// `type_tag` only labels errors.
    pub fn new(type_tag: &'a str, data: &'a [u8]) -> Self {
        Self {
            type_tag,
            data,
            position: 0,
        }
    }

    /// Fails unless the whole buffer is at least `min_len` bytes.
    pub fn require_len(&self, min_len: usize) -> Result<(), ReplicaError> {
        if self.data.len() < min_len {
            return Err(ReplicaError::malformed(
                self.type_tag,
                format!(
                    "payload too short: {} bytes, need at least {}",
                    self.data.len(),
                    min_len
                ),
            ));
        }
        Ok(())
    }

    pub fn read_str(&mut self) -> Result<String, ReplicaError> {
        let rest = &self.data[self.position..];
        let Some(end) = rest.iter().position(|&b| b == 0) else {
            return Err(ReplicaError::malformed(
                self.type_tag,
                format!("unterminated string at offset {}", self.position),
            ));
        };
        let value = std::str::from_utf8(&rest[..end]).map_err(|e| {
            ReplicaError::malformed(self.type_tag, format!("invalid UTF-8: {}", e))
        })?;
        self.position += end + 1;
        Ok(value.to_string())
    }

    pub fn read_u8(&mut self) -> Result<u8, ReplicaError> {
        let [byte] = self.take::<1>()?;
        Ok(byte)
    }

    pub fn read_u32(&mut self) -> Result<u32, ReplicaError> {
        Ok(u32::from_ne_bytes(self.take::<4>()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReplicaError> {
        Ok(u64::from_ne_bytes(self.take::<8>()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ReplicaError> {
        Ok(f32::from_ne_bytes(self.take::<4>()?))
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ReplicaError> {
        let end = self.position + N;
        if end > self.data.len() {
            return Err(ReplicaError::malformed(
                self.type_tag,
                format!(
                    "need {} bytes at offset {}, only {} left",
                    N,
                    self.position,
                    self.remaining()
                ),
            ));
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[self.position..end]);
        self.position = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_nul_terminated() {
        let mut writer = PayloadWriter::new();
        writer.write_str("ab").write_str("");
        assert_eq!(writer.into_bytes(), vec![b'a', b'b', 0, 0]);
    }

    #[test]
    fn fixed_width_fields_use_native_order() {
        let mut writer = PayloadWriter::new();
        writer.write_f32(1.5).write_u32(7);
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..4], &1.5f32.to_ne_bytes());
        assert_eq!(&bytes[4..], &7u32.to_ne_bytes());
    }

    #[test]
    fn reader_consumes_fields_in_order() {
        let mut writer = PayloadWriter::new();
        writer.write_str("url").write_u8(2).write_u64(99).write_f32(0.25);
        let bytes = writer.into_bytes();

        let mut reader = PayloadReader::new("Test", &bytes);
        assert_eq!(reader.read_str().unwrap(), "url");
        assert_eq!(reader.read_u8().unwrap(), 2);
        assert_eq!(reader.read_u64().unwrap(), 99);
        assert_eq!(reader.read_f32().unwrap(), 0.25);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn unterminated_string_is_malformed() {
        let mut reader = PayloadReader::new("Test", b"abc");
        assert!(matches!(
            reader.read_str(),
            Err(ReplicaError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn short_numeric_read_is_malformed() {
        let mut reader = PayloadReader::new("Test", &[1, 2]);
        let err = reader.read_f32().unwrap_err();
        assert!(err.to_string().contains("Test"));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut reader = PayloadReader::new("Test", &[0xff, 0xfe, 0]);
        assert!(reader.read_str().is_err());
    }
}
