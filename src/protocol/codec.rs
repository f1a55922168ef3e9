//! Primitive and composite wire codec.
//!
//! [`Decoder`] and [`Encoder`] are the single, non-branching implementation of
//! the wire format. Scalars go through `bincode` configured big-endian with
//! fixed-width integers, so a `u8` is one byte, an `i16` two, an `i32` four
//! and an `i64` eight. Composite frames are built on top:
//!
//! ```text
//! string / bytes   i32 length (-1 = null) + length bytes
//! collection       i32 count  (-1 = null) + count strings
//! rid              i16 cluster id + i64 cluster position
//! ```
//!
//! Every declared length or count is checked against the configured chunk
//! limit before anything is allocated.
use std::{
    collections::HashSet,
    io::{self, BufReader, Cursor, ErrorKind, Read, Write},
    net::TcpStream,
};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    decode_from_std_read, encode_into_std_write,
};

use super::{ChannelError, ProtocolViolation, Rid};

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Length or count prefix marking a null frame.
pub const NULL_LENGTH: i32 = -1;

/// Longest preview kept when discarding unread input.
pub const MAX_PREVIEW: usize = 150;

/// Outcome of [`WireRead::drain_pending`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cleared {
    /// Bytes discarded.
    pub bytes: usize,
    /// Up to [`MAX_PREVIEW`] of the discarded bytes, decoded lossily.
    pub preview: String,
}

/// Reading half of the wire format.
pub trait WireRead {
    fn read_u8(&mut self) -> Result<u8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;

    fn read_string(&mut self) -> Result<Option<String>>;
    fn read_bytes(&mut self) -> Result<Option<Vec<u8>>>;
    fn read_string_list(&mut self) -> Result<Option<Vec<String>>>;
    fn read_string_set(&mut self) -> Result<Option<HashSet<String>>>;
    fn read_rid(&mut self) -> Result<Rid>;

    /// Discards whatever input has already arrived, without waiting for more.
    /// `scratch` is used as the drain buffer.
    fn drain_pending(&mut self, scratch: &mut [u8]) -> Result<Cleared>;
}

/// Writing half of the wire format.
pub trait WireWrite {
    fn write_u8(&mut self, value: u8) -> Result<()>;
    fn write_i16(&mut self, value: i16) -> Result<()>;
    fn write_i32(&mut self, value: i32) -> Result<()>;
    fn write_i64(&mut self, value: i64) -> Result<()>;

    fn write_string(&mut self, value: Option<&str>) -> Result<()>;
    fn write_bytes(&mut self, value: Option<&[u8]>) -> Result<()>;
    fn write_string_collection(&mut self, items: Option<&[&str]>) -> Result<()>;
    fn write_rid(&mut self, rid: &Rid) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// A byte source that can hand over input which has already arrived without
/// blocking for more. `Ok(0)` means nothing is pending.
pub trait Drain: Read {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl Drain for BufReader<TcpStream> {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.buffer().is_empty() {
            return self.read(buf);
        }

        self.get_ref().set_nonblocking(true)?;
        let read = match self.read(buf) {
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            res => res,
        };
        self.get_ref().set_nonblocking(false)?;
        read
    }
}

impl<T: AsRef<[u8]>> Drain for Cursor<T> {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

impl Drain for &[u8] {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

/// Decodes frames from `R`, rejecting anything larger than `max_chunk`.
pub struct Decoder<R> {
    reader: R,
    max_chunk: usize,
    config: Configuration<BigEndian, Fixint>,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R, max_chunk: usize) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        Self {
            reader,
            max_chunk,
            config,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn decode<T: Decode<()>>(&mut self) -> Result<T> {
        Ok(decode_from_std_read(&mut self.reader, self.config)?)
    }

    /// Reads a length or count prefix. `None` for null, otherwise a value
    /// already checked against the chunk limit.
    fn read_prefix(&mut self) -> Result<Option<usize>> {
        let declared: i32 = self.decode()?;
        if declared < 0 {
            return Ok(None);
        }

        let declared = declared as usize;
        if declared > self.max_chunk {
            return Err(ProtocolViolation::OversizedFrame {
                declared,
                limit: self.max_chunk,
            }
            .into());
        }
        Ok(Some(declared))
    }

    fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(len) = self.read_prefix()? else {
            return Ok(None);
        };

        let mut buf = vec![0; len];
        self.reader.read_exact(&mut buf)?;
        Ok(Some(buf))
    }
}

impl<R: Drain> Decoder<R> {
    fn read_element(&mut self) -> Result<String> {
        self.read_string()?
            .ok_or(ChannelError::Protocol(ProtocolViolation::NullElement))
    }
}

impl<R: Drain> WireRead for Decoder<R> {
    fn read_u8(&mut self) -> Result<u8> {
        self.decode()
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.decode()
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.decode()
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.decode()
    }

    fn read_string(&mut self) -> Result<Option<String>> {
        match self.read_frame()? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| ProtocolViolation::InvalidUtf8.into()),
            None => Ok(None),
        }
    }

    fn read_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        self.read_frame()
    }

    fn read_string_list(&mut self) -> Result<Option<Vec<String>>> {
        let Some(count) = self.read_prefix()? else {
            return Ok(None);
        };

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read_element()?);
        }
        Ok(Some(items))
    }

    fn read_string_set(&mut self) -> Result<Option<HashSet<String>>> {
        let Some(count) = self.read_prefix()? else {
            return Ok(None);
        };

        let mut items = HashSet::with_capacity(count);
        for _ in 0..count {
            items.insert(self.read_element()?);
        }
        Ok(Some(items))
    }

    fn read_rid(&mut self) -> Result<Rid> {
        self.decode()
    }

    fn drain_pending(&mut self, scratch: &mut [u8]) -> Result<Cleared> {
        let mut cleared = Cleared::default();
        let mut preview = Vec::with_capacity(MAX_PREVIEW);

        loop {
            let n = match self.reader.read_available(scratch) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            let keep = n.min(MAX_PREVIEW - preview.len());
            preview.extend_from_slice(&scratch[..keep]);
            cleared.bytes += n;
        }

        cleared.preview = String::from_utf8_lossy(&preview).into_owned();
        Ok(cleared)
    }
}

/// Encodes frames into `W`. Nothing reaches the peer until [`WireWrite::flush`].
pub struct Encoder<W> {
    writer: W,
    config: Configuration<BigEndian, Fixint>,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        Self { writer, config }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn encode<T: Encode>(&mut self, value: T) -> Result<()> {
        encode_into_std_write(value, &mut self.writer, self.config)?;
        Ok(())
    }

    fn write_prefix(&mut self, len: Option<usize>) -> Result<()> {
        let prefix = match len {
            Some(len) => {
                i32::try_from(len).map_err(|_| ProtocolViolation::UnencodableLength(len))?
            }
            None => NULL_LENGTH,
        };
        self.encode(prefix)
    }
}

impl<W: Write> WireWrite for Encoder<W> {
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.encode(value)
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.encode(value)
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.encode(value)
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.encode(value)
    }

    fn write_string(&mut self, value: Option<&str>) -> Result<()> {
        self.write_bytes(value.map(str::as_bytes))
    }

    fn write_bytes(&mut self, value: Option<&[u8]>) -> Result<()> {
        self.write_prefix(value.map(<[u8]>::len))?;
        if let Some(bytes) = value {
            self.writer.write_all(bytes)?;
        }
        Ok(())
    }

    fn write_string_collection(&mut self, items: Option<&[&str]>) -> Result<()> {
        self.write_prefix(items.map(<[&str]>::len))?;
        for item in items.unwrap_or_default() {
            self.write_string(Some(item))?;
        }
        Ok(())
    }

    fn write_rid(&mut self, rid: &Rid) -> Result<()> {
        self.encode(*rid)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Seek, SeekFrom};

    use super::*;

    const LIMIT: usize = 1024;

    fn encoded(f: impl FnOnce(&mut Encoder<Vec<u8>>)) -> Vec<u8> {
        let mut encoder = Encoder::new(Vec::new());
        f(&mut encoder);
        encoder.into_inner()
    }

    fn decoder(bytes: Vec<u8>) -> Decoder<Cursor<Vec<u8>>> {
        Decoder::new(Cursor::new(bytes), LIMIT)
    }

    #[test]
    fn primitives_are_big_endian() {
        let bytes = encoded(|e| {
            e.write_u8(0xAB).unwrap();
            e.write_i16(0x0102).unwrap();
            e.write_i32(-2).unwrap();
            e.write_i64(0x0102030405060708).unwrap();
        });

        assert_eq!(
            bytes,
            vec![
                0xAB, 0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
                0x07, 0x08
            ]
        );

        let mut decoder = decoder(bytes);
        assert_eq!(decoder.read_u8().unwrap(), 0xAB);
        assert_eq!(decoder.read_i16().unwrap(), 0x0102);
        assert_eq!(decoder.read_i32().unwrap(), -2);
        assert_eq!(decoder.read_i64().unwrap(), 0x0102030405060708);
    }

    #[test]
    fn short_read_is_io_fault() {
        let mut decoder = decoder(vec![0x00, 0x00, 0x01]);

        match decoder.read_i32() {
            Err(ChannelError::Io(_)) => {}
            other => panic!("expected io fault, got {other:?}"),
        }
    }

    #[test]
    fn truncated_string_body_is_io_fault() {
        let mut bytes = 5i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");

        assert!(matches!(
            decoder(bytes).read_string(),
            Err(ChannelError::Io(_))
        ));
    }

    #[test]
    fn strings_round_trip() {
        let values = [Some("SELECT 1"), Some(""), None, Some("żółć ✓")];
        let bytes = encoded(|e| {
            for v in values {
                e.write_string(v).unwrap();
            }
        });

        let mut decoder = decoder(bytes);
        for v in values {
            assert_eq!(decoder.read_string().unwrap().as_deref(), v);
        }
    }

    #[test]
    fn null_and_empty_prefixes_differ() {
        let null = encoded(|e| e.write_string(None).unwrap());
        let empty = encoded(|e| e.write_string(Some("")).unwrap());
        let null_list = encoded(|e| e.write_string_collection(None).unwrap());
        let empty_list = encoded(|e| e.write_string_collection(Some(&[] as &[&str])).unwrap());

        assert_eq!(null, (-1i32).to_be_bytes());
        assert_eq!(empty, 0i32.to_be_bytes());
        assert_eq!(null_list, (-1i32).to_be_bytes());
        assert_eq!(empty_list, 0i32.to_be_bytes());

        assert_eq!(decoder(null_list).read_string_list().unwrap(), None);
        assert_eq!(decoder(empty_list).read_string_list().unwrap(), Some(vec![]));
    }

    #[test]
    fn bytes_round_trip() {
        let payload = vec![0u8, 1, 2, 255, 128];
        let bytes = encoded(|e| {
            e.write_bytes(Some(payload.as_slice())).unwrap();
            e.write_bytes(None).unwrap();
            e.write_bytes(Some(&[] as &[u8])).unwrap();
        });

        assert_eq!(&bytes[9..13], (-1i32).to_be_bytes());
        assert_eq!(&bytes[13..], 0i32.to_be_bytes());

        let mut decoder = decoder(bytes);
        assert_eq!(decoder.read_bytes().unwrap(), Some(payload));
        assert_eq!(decoder.read_bytes().unwrap(), None);
        assert_eq!(decoder.read_bytes().unwrap(), Some(vec![]));
    }

    #[test]
    fn any_negative_length_is_null() {
        let mut decoder = decoder((-7i32).to_be_bytes().to_vec());

        assert_eq!(decoder.read_bytes().unwrap(), None);
    }

    #[test]
    fn list_keeps_order_and_set_deduplicates() {
        let items = ["b", "a", "b", "c"];
        let bytes = encoded(|e| e.write_string_collection(Some(&items[..])).unwrap());

        let list = decoder(bytes.clone()).read_string_list().unwrap().unwrap();
        assert_eq!(list, vec!["b", "a", "b", "c"]);

        let set = decoder(bytes).read_string_set().unwrap().unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains("a") && set.contains("b") && set.contains("c"));
    }

    #[test]
    fn null_collection_element_is_rejected() {
        let bytes = encoded(|e| {
            e.write_i32(2).unwrap();
            e.write_string(Some("a")).unwrap();
            e.write_string(None).unwrap();
        });

        assert!(matches!(
            decoder(bytes).read_string_list(),
            Err(ChannelError::Protocol(ProtocolViolation::NullElement))
        ));
    }

    #[test]
    fn rid_is_ten_bytes() {
        let rid = Rid::new(-3, 1 << 40);
        let bytes = encoded(|e| e.write_rid(&rid).unwrap());

        assert_eq!(bytes.len(), crate::protocol::RID_SIZE);
        assert_eq!(&bytes[..2], &(-3i16).to_be_bytes());
        assert_eq!(&bytes[2..], &(1i64 << 40).to_be_bytes());
        assert_eq!(decoder(bytes).read_rid().unwrap(), rid);
    }

    #[test]
    fn oversized_length_is_rejected_before_reading_body() {
        let mut bytes = ((LIMIT + 1) as i32).to_be_bytes().to_vec();
        bytes.extend_from_slice(b"trailing");
        let mut decoder = decoder(bytes);

        match decoder.read_bytes() {
            Err(ChannelError::Protocol(ProtocolViolation::OversizedFrame { declared, limit })) => {
                assert_eq!(declared, LIMIT + 1);
                assert_eq!(limit, LIMIT);
            }
            other => panic!("expected oversized frame, got {other:?}"),
        }

        // Only the prefix was consumed.
        assert_eq!(decoder.into_inner().position(), 4);
    }

    #[test]
    fn oversized_count_is_rejected() {
        let bytes = i32::MAX.to_be_bytes().to_vec();

        assert!(matches!(
            decoder(bytes.clone()).read_string_list(),
            Err(ChannelError::Protocol(ProtocolViolation::OversizedFrame { .. }))
        ));
        assert!(matches!(
            decoder(bytes).read_string_set(),
            Err(ChannelError::Protocol(ProtocolViolation::OversizedFrame { .. }))
        ));
    }

    #[test]
    fn limit_is_inclusive() {
        let payload = vec![7u8; LIMIT];
        let bytes = encoded(|e| e.write_bytes(Some(payload.as_slice())).unwrap());

        assert_eq!(decoder(bytes).read_bytes().unwrap(), Some(payload));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let bytes = encoded(|e| e.write_bytes(Some(&[0xFF, 0xFE][..])).unwrap());

        assert!(matches!(
            decoder(bytes).read_string(),
            Err(ChannelError::Protocol(ProtocolViolation::InvalidUtf8))
        ));
    }

    #[test]
    fn drain_discards_pending_bytes() {
        let mut stream = Cursor::new(Vec::new());
        stream.write_all(&[b'x'; 400]).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();

        let mut decoder = Decoder::new(stream, LIMIT);
        let mut scratch = vec![0; 64];
        let cleared = decoder.drain_pending(&mut scratch).unwrap();

        assert_eq!(cleared.bytes, 400);
        assert_eq!(cleared.preview.len(), MAX_PREVIEW);
        assert_eq!(decoder.drain_pending(&mut scratch).unwrap(), Cleared::default());
    }
}
