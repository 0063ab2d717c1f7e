//! Tagged, length-prefixed framing over a duplex byte stream.
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────────────────┐
//! │     Tag      │    Length    │            Payload               │
//! │  (i32, BE)   │  (u32, BE)   │         (Length bytes)           │
//! └──────────────┴──────────────┴──────────────────────────────────┘
//! ```
//!
//! The send and receive paths are guarded by separate mutexes, so a thread
//! blocked writing never holds up a thread reading and vice versa. Within
//! one direction a frame's three fields are written (or read) under the
//! lock, so two frames never interleave on the wire.

use std::fmt;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::TransportError;

/// Size of the frame header in bytes (tag + length).
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: i32,
    pub payload: Bytes,
}

pub struct FramedTransport {
    reader: Mutex<BufReader<Box<dyn Read + Send>>>,
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    /// Present for socket-backed transports so `close` can interrupt a
    /// reader blocked in the kernel.
    socket: Option<TcpStream>,
    closed: AtomicBool,
    max_frame_len: u32,
}

impl fmt::Debug for FramedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedTransport")
            .field("socket", &self.socket)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("max_frame_len", &self.max_frame_len)
            .finish_non_exhaustive()
    }
}

impl FramedTransport {
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        let mut transport = Self::from_parts(reader, writer);
        transport.socket = Some(stream);
        Ok(transport)
    }

    /// Builds a transport from independent halves. `close` cannot interrupt
    /// a reader blocked inside `reader`; that is up to whoever owns it.
    pub fn from_parts<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let reader: Box<dyn Read + Send> = Box::new(reader);
        let writer: Box<dyn Write + Send> = Box::new(writer);
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(BufWriter::new(writer)),
            socket: None,
            closed: AtomicBool::new(false),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: u32) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn max_frame_len(&self) -> u32 {
        self.max_frame_len
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes and flushes one frame.
    pub fn send(&self, tag: i32, payload: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= self.max_frame_len)
            .ok_or(TransportError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            })?;

        let mut writer = self.writer.lock();
        write_frame(&mut *writer, tag, len, payload).map_err(|err| self.classify(err))?;
        drop(writer);

        trace!(tag, len, "frame sent");
        Ok(())
    }

    /// Blocks until one whole frame has been read.
    pub fn receive(&self) -> Result<Frame, TransportError> {
        let mut reader = self.reader.lock();

        let mut header = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut header)
            .map_err(|err| self.classify(err))?;
        let mut header = &header[..];
        let tag = header.get_i32();
        let len = header.get_u32();

        if len > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len: len as usize,
                max: self.max_frame_len,
            });
        }

        let mut payload = vec![0u8; len as usize];
        reader
            .read_exact(&mut payload)
            .map_err(|err| self.classify(err))?;
        drop(reader);

        trace!(tag, len, "frame received");
        Ok(Frame {
            tag,
            payload: Bytes::from(payload),
        })
    }

    /// Shuts the stream down in both directions. Idempotent.
    pub fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(socket) = &self.socket {
            match socket.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn classify(&self, err: io::Error) -> TransportError {
        if self.is_closed() {
            TransportError::Closed
        } else {
            TransportError::Io(err)
        }
    }
}

fn write_frame<W: Write>(writer: &mut W, tag: i32, len: u32, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&tag.to_be_bytes())?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}
