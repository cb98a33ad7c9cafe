//! Frame data, buffering, spooling and encoding.

pub mod encode;
pub mod frame;
pub mod queue;
pub mod spool;

pub use encode::{FrameEncoder, ImageEncoder};
pub use frame::{FrameKind, FrameRecord};
pub use queue::BoundedQueue;
pub use spool::{ChunkReader, ChunkWriter, SharedSpool, SpoolChunk, SpoolStore};
