use std::io::{Read, Write};

/// Trait to serialize stuff
pub trait Encode {
    /// Serializes into writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), crate::Error>;

    /// Serializes into vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];

        // NOTE: Encoding into a vec is not expected to fail
        #[allow(clippy::expect_used)]
        self.encode_into(&mut v).expect("cannot fail");
        v
    }
}

/// Trait to deserialize stuff
pub trait Decode {
    /// Deserializes from reader.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, crate::Error>
    where
        Self: Sized;
}

/// Maps a short read during decoding to [`crate::DecodeError::UnexpectedEof`].
///
/// Used by block and trailer decoders which read from in-memory buffers, where
/// the only possible I/O failure is running off the end of the buffer.
pub(crate) fn eof<T>(result: std::io::Result<T>) -> Result<T, crate::DecodeError> {
    result.map_err(|_| crate::DecodeError::UnexpectedEof)
}
