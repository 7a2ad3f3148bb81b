use crate::Block;
use std::{
    fmt,
    io::{Read, Write},
};

/// Errors produced while encoding or decoding block frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The underlying byte stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The frame could not be serialized or deserialized.
    #[error("invalid block frame: {0}")]
    Frame(#[from] serde_json::Error),
}

/// Serializes blocks to a byte stream and restores them back.
///
/// Frames must be self-delimited: a merged bundle is a plain concatenation of
/// frames with no header, and [`BlockCodec::decode_all`] must be able to walk
/// such a concatenation.
pub trait BlockCodec: fmt::Debug + Send + Sync {
    /// Appends one encoded block frame to `out`.
    fn encode(&self, block: &Block, out: &mut dyn Write) -> Result<(), CodecError>;

    /// Decodes every frame from `input` until end of stream.
    fn decode_all(&self, input: &mut dyn Read) -> Result<Vec<Block>, CodecError>;
}

/// The default codec: one JSON object per block.
///
/// JSON objects are self-delimited, so concatenated frames round-trip without
/// any extra framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBlockCodec;

impl BlockCodec for JsonBlockCodec {
    fn encode(&self, block: &Block, out: &mut dyn Write) -> Result<(), CodecError> {
        serde_json::to_writer(out, block)?;
        Ok(())
    }

    fn decode_all(&self, input: &mut dyn Read) -> Result<Vec<Block>, CodecError> {
        serde_json::Deserializer::from_reader(input)
            .into_iter::<Block>()
            .map(|frame| frame.map_err(CodecError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn block(number: u64) -> Block {
        Block {
            number,
            id: format!("{number:08x}a"),
            previous_id: format!("{:08x}a", number.saturating_sub(1)),
            lib_num: number.saturating_sub(12),
            timestamp: Utc.timestamp_opt(1_700_000_000 + number as i64, 0).unwrap(),
            payload: vec![0x01, 0x02],
        }
    }

    #[test]
    fn concatenated_frames_round_trip() {
        let codec = JsonBlockCodec;
        let mut buf = Vec::new();
        for num in [100, 101, 102] {
            codec.encode(&block(num), &mut buf).unwrap();
        }

        let decoded = codec.decode_all(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, vec![block(100), block(101), block(102)]);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let codec = JsonBlockCodec;
        let mut buf = Vec::new();
        codec.encode(&block(1), &mut buf).unwrap();
        buf.truncate(buf.len() - 3);

        assert!(codec.decode_all(&mut buf.as_slice()).is_err());
    }
}
