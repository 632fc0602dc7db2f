//! Binary frame codec: header bit-packing and sub-field serialization.
//!
//! The fixed prefix packs three nibble pairs:
//!
//! ```text
//! byte 0: (version << 4) | header size in 4-byte words
//! byte 1: (message type << 4) | flags
//! byte 2: serialization (high nibble) | compression (low nibble)
//! bytes 3 .. 4*words-1: zero padding
//! ```
//!
//! followed by the ordered optional sub-fields (sequence, error code,
//! event, session id, connect id) and the always-present length-prefixed
//! payload. All integers are big-endian; all length prefixes are 4-byte
//! big-endian.
//!
//! Decoding consumes exactly the whole frame; anything left over is a
//! protocol error. Decoders never auto-decompress: a configured compressor
//! applies on encode only, and the consumer that set it knows when to run
//! the inverse.

use std::io::{Read, Write};

use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::message::{
    Message, MessageFlags, MessageType, SequencePredicate, contains_sequence, events,
};

/// Protocol version nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
}

/// Header size expressed in 4-byte words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSize {
    Bytes4 = 1,
    Bytes8 = 2,
    Bytes12 = 3,
    Bytes16 = 4,
}

/// Payload serialization method, pre-shifted into the high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    Raw = 0x00,
    Json = 0x10,
    Thrift = 0x30,
    Custom = 0xF0,
}

impl Serialization {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(Serialization::Raw),
            0x10 => Some(Serialization::Json),
            0x30 => Some(Serialization::Thrift),
            0xF0 => Some(Serialization::Custom),
            _ => None,
        }
    }
}

/// Payload compression method, carried in the low nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None = 0x00,
    Gzip = 0x01,
    Custom = 0x0F,
}

impl CompressionMethod {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(CompressionMethod::None),
            0x01 => Some(CompressionMethod::Gzip),
            0x0F => Some(CompressionMethod::Custom),
            _ => None,
        }
    }
}

/// Payload transform applied by the encoder when a compression method other
/// than `None` is configured.
pub type Compressor = fn(&[u8]) -> std::io::Result<Vec<u8>>;

/// Gzip compressor suitable for [`CompressionMethod::Gzip`].
pub fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inverse of [`gzip_compress`], for consumers that configured gzip and
/// need to unwrap a received payload themselves.
pub fn gzip_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Codec failure, one distinct kind per malformed region of a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame shorter than its declared header")]
    TruncatedHeader,
    #[error("unknown message type bits: {0:#06b}")]
    UnknownMessageType(u8),
    #[error("unknown serialization bits: {0:#x}")]
    UnknownSerialization(u8),
    #[error("unknown compression bits: {0:#x}")]
    UnknownCompression(u8),
    #[error("frame ends inside the {0} sub-field")]
    TruncatedField(&'static str),
    #[error("{field} is not valid UTF-8")]
    InvalidString { field: &'static str },
    #[error("{0} redundant bytes after a complete frame")]
    RedundantBytes(usize),
    #[error("message requires a {0} but none was provided")]
    MissingField(&'static str),
    #[error("payload compression failed: {0}")]
    Compression(String),
}

/// Sequential big-endian reader over one frame.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        FrameReader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() - self.pos < n {
            return Err(ProtocolError::TruncatedField(field));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_i32(&mut self, field: &'static str) -> Result<i32, ProtocolError> {
        let bytes = self.take(4, field)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        let bytes = self.take(4, field)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_string(
        &mut self,
        size_field: &'static str,
        body_field: &'static str,
    ) -> Result<String, ProtocolError> {
        let len = self.read_u32(size_field)? as usize;
        let bytes = self.take(len, body_field)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::InvalidString { field: body_field })
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// The frame codec: nibble-packed configuration plus the injected sequence
/// predicate and optional payload compressor.
///
/// The two configuration bytes are stored packed, exactly as they appear on
/// the wire; the setters mask only their own nibble.
#[derive(Clone)]
pub struct BinaryProtocol {
    version_and_header_size: u8,
    serialization_and_compression: u8,
    contains_sequence: SequencePredicate,
    compressor: Option<Compressor>,
}

impl Default for BinaryProtocol {
    /// Version 1, 4-byte header, JSON serialization, no compression, and
    /// the client sequence predicate.
    fn default() -> Self {
        let mut protocol = BinaryProtocol {
            version_and_header_size: 0,
            serialization_and_compression: 0,
            contains_sequence,
            compressor: None,
        };
        protocol.set_version(ProtocolVersion::V1);
        protocol.set_header_size(HeaderSize::Bytes4);
        protocol.set_serialization(Serialization::Json);
        protocol.set_compression(CompressionMethod::None, None);
        protocol
    }
}

impl BinaryProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version_and_header_size =
            (self.version_and_header_size & 0x0F) | ((version as u8) << 4);
    }

    pub fn version_bits(&self) -> u8 {
        self.version_and_header_size >> 4
    }

    pub fn set_header_size(&mut self, size: HeaderSize) {
        self.version_and_header_size = (self.version_and_header_size & 0xF0) | (size as u8);
    }

    /// Declared header size in bytes.
    pub fn header_len(&self) -> usize {
        ((self.version_and_header_size & 0x0F) as usize) * 4
    }

    pub fn set_serialization(&mut self, serialization: Serialization) {
        self.serialization_and_compression =
            (self.serialization_and_compression & 0x0F) | serialization as u8;
    }

    pub fn serialization(&self) -> Serialization {
        // Always valid: the setter is the only writer of this nibble.
        Serialization::from_bits(self.serialization_and_compression & 0xF0)
            .unwrap_or(Serialization::Raw)
    }

    pub fn set_compression(&mut self, method: CompressionMethod, compressor: Option<Compressor>) {
        self.serialization_and_compression =
            (self.serialization_and_compression & 0xF0) | method as u8;
        self.compressor = compressor;
    }

    pub fn set_sequence_predicate(&mut self, predicate: SequencePredicate) {
        self.contains_sequence = predicate;
    }

    /// Encode one message into a self-contained frame.
    ///
    /// Sub-field order: sequence, error code (type `Error` only), event,
    /// session id, connect id, payload. Fields demanded by the type/flag
    /// rules but absent from the message are a [`ProtocolError::MissingField`].
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        let header_len = self.header_len();
        let mut frame = Vec::with_capacity(header_len + message.payload.len() + 32);
        frame.push(self.version_and_header_size);
        frame.push((message.msg_type.bits() << 4) | message.flags.bits());
        frame.push(self.serialization_and_compression);
        frame.resize(header_len, 0);

        if (self.contains_sequence)(message.flags) {
            let sequence = message
                .sequence
                .ok_or(ProtocolError::MissingField("sequence"))?;
            frame.extend_from_slice(&sequence.to_be_bytes());
        }
        if message.msg_type == MessageType::Error {
            let code = message
                .error_code
                .ok_or(ProtocolError::MissingField("error code"))?;
            frame.extend_from_slice(&code.to_be_bytes());
        }
        if message.flags.with_event() {
            let event = message.event.ok_or(ProtocolError::MissingField("event"))?;
            frame.extend_from_slice(&event.to_be_bytes());
            if !events::omits_session_id(event) {
                let session_id = message
                    .session_id
                    .as_deref()
                    .ok_or(ProtocolError::MissingField("session id"))?;
                write_string(&mut frame, session_id);
            }
            if events::carries_connect_id(event) {
                let connect_id = message
                    .connect_id
                    .as_deref()
                    .ok_or(ProtocolError::MissingField("connect id"))?;
                write_string(&mut frame, connect_id);
            }
        }

        let payload = self.compressed_payload(&message.payload)?;
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    fn compressed_payload(&self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self.compressor {
            Some(compress) if !payload.is_empty() => {
                compress(payload).map_err(|e| ProtocolError::Compression(e.to_string()))
            }
            _ => Ok(payload.to_vec()),
        }
    }

    /// Decode one frame. The entire slice must be consumed; residual bytes
    /// after the payload are a [`ProtocolError::RedundantBytes`].
    pub fn decode(&self, frame: &[u8]) -> Result<Message, ProtocolError> {
        if frame.is_empty() {
            return Err(ProtocolError::TruncatedHeader);
        }
        let header_len = ((frame[0] & 0x0F) as usize) * 4;
        if header_len < 4 || frame.len() < header_len {
            return Err(ProtocolError::TruncatedHeader);
        }

        let type_bits = frame[1] >> 4;
        let msg_type = MessageType::from_bits(type_bits)
            .ok_or(ProtocolError::UnknownMessageType(type_bits))?;
        let flags = MessageFlags::from_bits(frame[1] & 0x0F);
        Serialization::from_bits(frame[2] & 0xF0)
            .ok_or(ProtocolError::UnknownSerialization(frame[2] & 0xF0))?;
        CompressionMethod::from_bits(frame[2] & 0x0F)
            .ok_or(ProtocolError::UnknownCompression(frame[2] & 0x0F))?;

        let mut reader = FrameReader::new(&frame[header_len..]);
        let mut message = Message {
            msg_type,
            flags,
            event: None,
            session_id: None,
            connect_id: None,
            sequence: None,
            error_code: None,
            payload: Vec::new(),
        };

        if (self.contains_sequence)(flags) {
            message.sequence = Some(reader.read_i32("sequence")?);
        }
        if msg_type == MessageType::Error {
            message.error_code = Some(reader.read_u32("error code")?);
        }
        if flags.with_event() {
            let event = reader.read_i32("event")?;
            message.event = Some(event);
            if !events::omits_session_id(event) {
                message.session_id = Some(reader.read_string("session id size", "session id")?);
            }
            if events::carries_connect_id(event) {
                message.connect_id = Some(reader.read_string("connect id size", "connect id")?);
            }
        }

        let payload_len = reader.read_u32("payload size")? as usize;
        message.payload = reader.take(payload_len, "payload")?.to_vec();

        if reader.remaining() != 0 {
            return Err(ProtocolError::RedundantBytes(reader.remaining()));
        }
        Ok(message)
    }
}

fn write_string(frame: &mut Vec<u8>, value: &str) {
    frame.extend_from_slice(&(value.len() as u32).to_be_bytes());
    frame.extend_from_slice(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> BinaryProtocol {
        BinaryProtocol::new()
    }

    #[test]
    fn header_prefix_matches_configuration() {
        let frame = codec()
            .encode(&Message::full_client(
                events::START_CONNECTION,
                None,
                b"{}".to_vec(),
            ))
            .unwrap();
        // Version 1, 1-word header, full-client + with-event, JSON, no compression.
        assert_eq!(frame[0], 0x11);
        assert_eq!(frame[1], 0x14);
        assert_eq!(frame[2], 0x10);
        assert_eq!(frame[3], 0x00);
    }

    #[test]
    fn nibble_setters_leave_sibling_nibble_intact() {
        let mut protocol = codec();
        protocol.set_header_size(HeaderSize::Bytes8);
        assert_eq!(protocol.version_bits(), 1);
        assert_eq!(protocol.header_len(), 8);
        protocol.set_version(ProtocolVersion::V3);
        assert_eq!(protocol.header_len(), 8);
        assert_eq!(protocol.version_bits(), 3);

        protocol.set_serialization(Serialization::Raw);
        protocol.set_compression(CompressionMethod::Gzip, Some(gzip_compress));
        assert_eq!(protocol.serialization(), Serialization::Raw);
        protocol.set_serialization(Serialization::Json);
        assert_eq!(protocol.serialization(), Serialization::Json);
        // Compression nibble survived the serialization change.
        let frame = protocol
            .encode(&Message::full_client(events::START_CONNECTION, None, vec![]))
            .unwrap();
        assert_eq!(frame[2], 0x11);
    }

    #[test]
    fn wide_header_is_zero_padded() {
        let mut protocol = codec();
        protocol.set_header_size(HeaderSize::Bytes16);
        let message = Message::full_client(events::SAY_HELLO, Some("s-1"), b"{}".to_vec());
        let frame = protocol.encode(&message).unwrap();
        assert!(frame[3..16].iter().all(|&b| b == 0));
        assert_eq!(protocol.decode(&frame).unwrap(), message);
    }

    #[test]
    fn error_frame_carries_code_without_event_flag() {
        let message = Message {
            msg_type: MessageType::Error,
            flags: MessageFlags::NO_SEQ,
            event: None,
            session_id: None,
            connect_id: None,
            sequence: None,
            error_code: Some(55_000_001),
            payload: b"quota exceeded".to_vec(),
        };
        let frame = codec().encode(&message).unwrap();
        let decoded = codec().decode(&frame).unwrap();
        assert_eq!(decoded.error_code, Some(55_000_001));
        assert_eq!(decoded, message);
    }

    #[test]
    fn sequence_written_only_when_predicate_holds() {
        let mut message = Message::audio_chunk("s-1", vec![0, 1]);
        message.flags = message.flags.union(MessageFlags::POSITIVE_SEQ);
        message.sequence = Some(7);
        let frame = codec().encode(&message).unwrap();
        assert_eq!(codec().decode(&frame).unwrap().sequence, Some(7));

        let without = Message::audio_chunk("s-1", vec![0, 1]);
        let frame = codec().encode(&without).unwrap();
        assert_eq!(codec().decode(&frame).unwrap().sequence, None);
    }

    #[test]
    fn missing_required_fields_are_rejected_at_encode() {
        let mut message = Message::full_client(events::SAY_HELLO, None, vec![]);
        assert_eq!(
            codec().encode(&message),
            Err(ProtocolError::MissingField("session id"))
        );
        message.event = None;
        assert_eq!(
            codec().encode(&message),
            Err(ProtocolError::MissingField("event"))
        );
    }

    #[test]
    fn gzip_round_trips_through_the_payload() {
        let mut protocol = codec();
        protocol.set_compression(CompressionMethod::Gzip, Some(gzip_compress));
        let body = vec![42u8; 4096];
        let frame = protocol
            .encode(&Message::full_client(
                events::SAY_HELLO,
                Some("s"),
                body.clone(),
            ))
            .unwrap();
        // Compressed payload is smaller than the input on this data.
        assert!(frame.len() < body.len());
        let decoded = protocol.decode(&frame).unwrap();
        assert_eq!(gzip_decompress(&decoded.payload).unwrap(), body);
    }

    #[test]
    fn empty_payload_skips_the_compressor() {
        let mut protocol = codec();
        protocol.set_compression(CompressionMethod::Gzip, Some(gzip_compress));
        let frame = protocol
            .encode(&Message::full_client(events::START_CONNECTION, None, vec![]))
            .unwrap();
        let decoded = protocol.decode(&frame).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn unknown_bits_are_distinct_errors() {
        let mut frame = codec()
            .encode(&Message::full_client(events::START_CONNECTION, None, vec![]))
            .unwrap();
        frame[1] = (0b0111 << 4) | (frame[1] & 0x0F);
        assert_eq!(
            codec().decode(&frame),
            Err(ProtocolError::UnknownMessageType(0b0111))
        );

        let mut frame = codec()
            .encode(&Message::full_client(events::START_CONNECTION, None, vec![]))
            .unwrap();
        frame[2] = 0x20;
        assert_eq!(
            codec().decode(&frame),
            Err(ProtocolError::UnknownSerialization(0x20))
        );

        let mut frame = codec()
            .encode(&Message::full_client(events::START_CONNECTION, None, vec![]))
            .unwrap();
        frame[2] = 0x13;
        assert_eq!(
            codec().decode(&frame),
            Err(ProtocolError::UnknownCompression(0x03))
        );
    }
}
