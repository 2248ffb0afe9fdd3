//! Binary replay container decoding and heuristic frame walking.
//!
//! Output of this crate is approximate and feeds analytics only; the
//! authoritative action trace is built from structured records by
//! `trace_runtime`.

pub mod container;
pub mod frames;

pub use container::{
    append_raw_block, encode_block, inflate_container, write_container, Block, BlockReader,
    DecodeError, InflatedContainer,
};
pub use frames::{
    walk_frames, FrameStats, FrameWalker, ASSUMED_PAYLOAD_LEN, FRAME_STRIDE, HEADER_LEN,
};
pub use trace_schema::RawFrame;
