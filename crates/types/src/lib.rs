//! Core block record and serialization seams shared by the scribe crates.

mod block;
mod codec;

pub use block::Block;
pub use codec::{BlockCodec, CodecError, JsonBlockCodec};
