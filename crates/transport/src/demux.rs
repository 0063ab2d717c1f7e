//! Tag-addressed logical channels over one [`FramedTransport`].
//!
//! A single background thread owns the receive path. Each incoming frame is
//! queued under its tag and wakes one waiter of that tag. When the transport
//! fails, the error is recorded once and every waiter on every tag is woken;
//! from then on every `receive*` call returns that same error.
//!
//! A tag only has an entry while it has queued payloads or waiters. A peer
//! that fills more than `max_tags` entries at once fails the reader with
//! [`TransportError::TooManyTags`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{DemuxError, TransportError};
use crate::frame::FramedTransport;

/// Upper bound on tags holding queued payloads or waiters at once.
pub const DEFAULT_MAX_TAGS: usize = 1024;

struct Entry {
    queue: VecDeque<Bytes>,
    ready: Arc<Condvar>,
    waiters: usize,
}

impl Entry {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            ready: Arc::new(Condvar::new()),
            waiters: 0,
        }
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<i32, Entry>,
    error: Option<Arc<TransportError>>,
}

impl State {
    fn entry(&mut self, tag: i32) -> &mut Entry {
        self.entries.entry(tag).or_insert_with(Entry::new)
    }

    /// Drops the entry for `tag` once nothing is queued or waiting on it.
    fn release(&mut self, tag: i32) {
        let idle = self
            .entries
            .get(&tag)
            .is_some_and(|entry| entry.queue.is_empty() && entry.waiters == 0);
        if idle {
            self.entries.remove(&tag);
        }
    }
}

struct Shared {
    transport: Arc<FramedTransport>,
    state: Mutex<State>,
    max_tags: usize,
}

impl Shared {
    fn read_loop(&self) {
        loop {
            match self.transport.receive() {
                Ok(frame) => {
                    let mut state = self.state.lock();
                    if !state.entries.contains_key(&frame.tag)
                        && state.entries.len() >= self.max_tags
                    {
                        drop(state);
                        self.fail(TransportError::TooManyTags {
                            limit: self.max_tags,
                        });
                        return;
                    }
                    let entry = state.entry(frame.tag);
                    entry.queue.push_back(frame.payload);
                    entry.ready.notify_one();
                }
                Err(err) => {
                    self.fail(err);
                    return;
                }
            }
        }
    }

    fn fail(&self, err: TransportError) {
        let mut state = self.state.lock();
        if state.error.is_none() {
            if err.is_disconnect() {
                debug!(error = %err, "demultiplexer reader stopped");
            } else {
                warn!(error = %err, "demultiplexer reader failed");
            }
            state.error = Some(Arc::new(err));
        }
        for entry in state.entries.values() {
            entry.ready.notify_all();
        }
    }
}

/// Dropping the demultiplexer closes the transport, which stops the reader.
pub struct Demultiplexer {
    shared: Arc<Shared>,
}

impl Demultiplexer {
    /// Starts the background reader for `transport`. Nothing else may call
    /// `transport.receive()` afterwards.
    pub fn spawn(transport: Arc<FramedTransport>) -> Result<Self, TransportError> {
        Self::spawn_with_max_tags(transport, DEFAULT_MAX_TAGS)
    }

    pub fn spawn_with_max_tags(
        transport: Arc<FramedTransport>,
        max_tags: usize,
    ) -> Result<Self, TransportError> {
        let shared = Arc::new(Shared {
            transport,
            state: Mutex::new(State::default()),
            max_tags,
        });

        let reader = Arc::clone(&shared);
        thread::Builder::new()
            .name("demux-reader".into())
            .spawn(move || reader.read_loop())?;

        Ok(Self { shared })
    }

    pub fn send(&self, tag: i32, payload: &[u8]) -> Result<(), TransportError> {
        self.shared.transport.send(tag, payload)
    }

    /// Returns the oldest undelivered payload for `tag`, blocking until one
    /// arrives or the transport fails.
    pub fn receive(&self, tag: i32) -> Result<Bytes, DemuxError> {
        self.wait(tag, None)
    }

    pub fn receive_timeout(&self, tag: i32, timeout: Duration) -> Result<Bytes, DemuxError> {
        self.wait(tag, Some(Instant::now() + timeout))
    }

    /// Like [`receive`](Self::receive) but gives up at `deadline` with
    /// [`DemuxError::Timeout`]. A payload arriving later stays queued.
    pub fn receive_deadline(&self, tag: i32, deadline: Instant) -> Result<Bytes, DemuxError> {
        self.wait(tag, Some(deadline))
    }

    /// The terminal error, if the reader has stopped.
    pub fn error(&self) -> Option<Arc<TransportError>> {
        self.shared.state.lock().error.clone()
    }

    /// Closes the transport. Payloads already queued are not drained.
    pub fn close(&self) -> Result<(), TransportError> {
        self.shared.transport.close()
    }

    fn wait(&self, tag: i32, deadline: Option<Instant>) -> Result<Bytes, DemuxError> {
        let mut state = self.shared.state.lock();
        if let Some(err) = &state.error {
            return Err(DemuxError::Transport(Arc::clone(err)));
        }

        let mut expired = false;
        let received = loop {
            let entry = state.entry(tag);
            if let Some(payload) = entry.queue.pop_front() {
                break Ok(payload);
            }
            let ready = Arc::clone(&entry.ready);

            if let Some(err) = &state.error {
                break Err(DemuxError::Transport(Arc::clone(err)));
            }
            if expired {
                break Err(DemuxError::Timeout { tag });
            }

            state.entry(tag).waiters += 1;
            match deadline {
                None => ready.wait(&mut state),
                Some(deadline) => expired = ready.wait_until(&mut state, deadline).timed_out(),
            }
            state.entry(tag).waiters -= 1;
        };
        state.release(tag);
        received
    }
}

impl Drop for Demultiplexer {
    fn drop(&mut self) {
        let _ = self.shared.transport.close();
    }
}
