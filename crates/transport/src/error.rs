use std::io;
use std::sync::Arc;

/// Stream-level failures of a [`FramedTransport`](crate::FramedTransport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: u32 },

    #[error("transport closed")]
    Closed,

    #[error("peer used more than {limit} distinct tags")]
    TooManyTags { limit: usize },
}

impl TransportError {
    /// True when the peer went away rather than the stream being corrupt.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            TransportError::FrameTooLarge { .. } | TransportError::TooManyTags { .. } => false,
        }
    }
}

/// Errors returned by [`Demultiplexer`](crate::Demultiplexer) receivers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DemuxError {
    /// The reader thread hit a terminal error. Every receiver on every tag
    /// sees the same shared value from then on.
    #[error("transport failed: {0}")]
    Transport(Arc<TransportError>),

    #[error("timed out waiting for a frame on tag {tag}")]
    Timeout { tag: i32 },
}

impl DemuxError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DemuxError::Timeout { .. })
    }
}
