//! Framed transport and per-tag demultiplexing over one duplex stream.

pub mod demux;
pub mod error;
pub mod frame;

pub use demux::{Demultiplexer, DEFAULT_MAX_TAGS};
pub use error::{DemuxError, TransportError};
pub use frame::{Frame, FramedTransport, DEFAULT_MAX_FRAME_LEN, HEADER_SIZE};
