//! Per-connection request loop.
//!
//! Each request frame is answered on its own tag. Notification requests can
//! block for a whole day, so they are answered from a short-lived thread and
//! the loop moves on to the next frame.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use ss_core::protocol::{bool_response, float_response, text_response};
use ss_core::{Request, Tag};
use ss_transport::{Frame, FramedTransport};
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::state::ServiceState;
use crate::Result;

const NOT_AUTHENTICATED: &str = "error: not authenticated";
const NO_RUN: &str = "null";

pub struct ConnectionWorker {
    transport: Arc<FramedTransport>,
    state: Arc<ServiceState>,
    auth: Arc<dyn Authenticator>,
    peer: String,
    user: Option<String>,
}

impl ConnectionWorker {
    pub fn new(
        transport: Arc<FramedTransport>,
        state: Arc<ServiceState>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            transport,
            state,
            auth,
            peer: String::from("unknown"),
            user: None,
        }
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    /// Serves frames until the peer disconnects. Only stream corruption or
    /// a failed reply is returned as an error.
    pub fn run(mut self) -> Result<()> {
        loop {
            let frame = match self.transport.receive() {
                Ok(frame) => frame,
                Err(err) if err.is_disconnect() => {
                    info!(peer = %self.peer, user = self.user.as_deref().unwrap_or("anonymous"), "client disconnected");
                    return Ok(());
                }
                Err(err) => {
                    let _ = self.transport.close();
                    return Err(err.into());
                }
            };
            self.state.metrics().inc_frames_received(1);
            self.dispatch(frame)?;
        }
    }

    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let Ok(tag) = Tag::try_from(frame.tag) else {
            warn!(peer = %self.peer, tag = frame.tag, "unknown request tag");
            let message = format!("error: unknown command {}", frame.tag);
            return self.reply(frame.tag, text_response(&message)?);
        };

        let request = match Request::decode(tag, &frame.payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(peer = %self.peer, ?tag, error = %err, "malformed request");
                return self.reply(tag, refusal(tag)?);
            }
        };
        debug!(peer = %self.peer, ?tag, "request");

        match request {
            Request::Register { user, password } => {
                let created = self.auth.register(&user, &password);
                if created {
                    info!(peer = %self.peer, %user, "user registered");
                }
                self.reply(tag, bool_response(created))
            }
            Request::Login { user, password } => {
                let ok = self.auth.authenticate(&user, &password);
                if ok {
                    info!(peer = %self.peer, %user, "user logged in");
                    self.user = Some(user);
                }
                self.reply(tag, bool_response(ok))
            }
            _ if self.user.is_none() => self.reply(tag, refusal(tag)?),
            Request::AddEvent {
                product,
                quantity,
                price,
            } => {
                let message = match self.state.add_event(&product, quantity, price) {
                    Ok(_) => String::from("event recorded"),
                    Err(err) => {
                        warn!(peer = %self.peer, %product, error = %err, "event rejected");
                        format!("error: {err}")
                    }
                };
                self.reply(tag, text_response(&message)?)
            }
            Request::Aggregate {
                kind,
                product,
                days,
            } => {
                let value = self
                    .state
                    .aggregate(kind, &product, days)
                    .unwrap_or_else(|err| {
                        warn!(peer = %self.peer, ?kind, %product, error = %err, "aggregation failed");
                        -1.0
                    });
                self.reply(tag, float_response(value))
            }
            Request::Simultaneous { first, second } => {
                self.answer_later(tag, move |state| {
                    let sold = state.notifications().wait_simultaneous(&first, &second, None);
                    Ok(bool_response(sold))
                });
                Ok(())
            }
            Request::Consecutive { product, n } => {
                self.answer_later(tag, move |state| {
                    let run = state.notifications().wait_consecutive(&product, n, None);
                    text_response(run.as_deref().unwrap_or(NO_RUN)).map_err(Into::into)
                });
                Ok(())
            }
            Request::NewDay => {
                let message = match self.state.start_new_day() {
                    Ok(date) => format!("new day started: {date}"),
                    Err(err) => {
                        warn!(peer = %self.peer, error = %err, "rollover failed");
                        format!("error: {err}")
                    }
                };
                self.reply(tag, text_response(&message)?)
            }
            Request::FilterEvents {
                days_back,
                products,
            } => {
                let products: HashSet<String> = products.into_iter().collect();
                let payload = self
                    .state
                    .filtered_events(days_back, &products)
                    .unwrap_or_else(|err| {
                        debug!(peer = %self.peer, days_back, error = %err, "filter refused");
                        Bytes::new()
                    });
                self.reply(tag, payload)
            }
        }
    }

    /// Unknown tags are answered on the tag they arrived with.
    fn reply(&self, tag: impl Into<i32>, payload: Bytes) -> Result<()> {
        self.transport.send(tag.into(), &payload)?;
        self.state.metrics().inc_frames_sent(1);
        Ok(())
    }

    /// Computes the response for `tag` on its own thread and sends it when
    /// ready. A send failure there only means the client is gone.
    fn answer_later<F>(&self, tag: Tag, answer: F)
    where
        F: FnOnce(&ServiceState) -> Result<Bytes> + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let state = Arc::clone(&self.state);
        let peer = self.peer.clone();
        let spawned = thread::Builder::new()
            .name(format!("notify-{}", tag.code()))
            .spawn(move || {
                let sent = answer(state.as_ref()).and_then(|payload| {
                    transport.send(tag.code(), &payload)?;
                    state.metrics().inc_frames_sent(1);
                    Ok(())
                });
                if let Err(err) = sent {
                    debug!(%peer, ?tag, error = %err, "notification not delivered");
                }
            });
        if let Err(err) = spawned {
            warn!(peer = %self.peer, ?tag, error = %err, "could not start notification thread");
        }
    }
}

/// The answer sent for requests that cannot be served: unauthenticated or
/// unreadable.
fn refusal(tag: Tag) -> Result<Bytes> {
    let payload = match tag {
        Tag::Register | Tag::Login | Tag::SimultaneousSales => bool_response(false),
        Tag::AggregateQuantity | Tag::AggregateVolume | Tag::AggregateAverage | Tag::AggregateMax => {
            float_response(-1.0)
        }
        Tag::AddEvent | Tag::NewDay => text_response(NOT_AUTHENTICATED)?,
        Tag::ConsecutiveSales => text_response("error")?,
        Tag::FilterEvents => Bytes::new(),
    };
    Ok(payload)
}
