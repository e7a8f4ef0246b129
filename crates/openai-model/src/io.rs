//! Byte-level plumbing for streamed responses.

mod chunks;
mod sse;

pub use chunks::{Chunks, Error as ChunksError};
pub use sse::{Error as SseError, Sse};
