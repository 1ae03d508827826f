//! Tessera Segments
//!
//! Client-side storage pipelines:
//! - `SegmentPipeline`: encrypts, erasure codes and places one segment,
//!   and reads it back from any sufficient subset of pieces
//! - `StreamPipeline`: cuts objects into segments with bounded pipelining
//!   and keeps their pointers in the pointer database
//! - `PieceTransport`: the seam to storage nodes
//! - `fanout`: quorum-bounded parallel piece transfers

pub mod fanout;
pub mod pointer;
pub mod segment;
pub mod stream;
pub mod transport;

pub use fanout::{FanoutOutcome, NodeResult, PieceTask, Quorum};
pub use pointer::{
    segment_sizes, PieceAssignment, PointerStore, RemoteSegment, Segment, SegmentContent,
    StreamMeta,
};
pub use segment::SegmentPipeline;
pub use stream::{StreamInfo, StreamPipeline};
pub use transport::{MemoryTransport, PieceTransport};
