//! Streaming pipeline: byte framing and live relay to the client

mod framer;
mod relay;

pub use framer::{ChunkFramer, Frame, FramedStream};
pub use relay::{
    RelayHandle, RelayOutcome, RelaySummary, ResponseChunk, StreamFormat, StreamRelay,
};
