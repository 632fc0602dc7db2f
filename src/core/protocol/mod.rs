//! Binary dialog protocol: message model and frame codec.

mod codec;
mod message;

pub use codec::{
    BinaryProtocol, CompressionMethod, Compressor, HeaderSize, ProtocolError, ProtocolVersion,
    Serialization, gzip_compress, gzip_decompress,
};
pub use message::{
    Message, MessageFlags, MessageType, SequencePredicate, contains_sequence, events,
};
