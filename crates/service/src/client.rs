//! Typed client for the sales service.
//!
//! All calls go through one [`Demultiplexer`], so a client can be shared by
//! several threads: a thread blocked on a notification does not hold up
//! aggregations issued by another.
//!
//! Replies carry no request id, only the request's tag. At most one request
//! per tag is therefore in flight on a connection; a second caller on the
//! same tag waits for the first exchange to finish. Two threads waiting for
//! simultaneous sales on one client are served one after the other.
//!
//! A request that times out closes the connection. Its reply may still
//! arrive, and would otherwise be taken as the answer to the next request
//! on that tag.

use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use ss_core::protocol::{read_bool, read_float, read_text};
use ss_core::{AggregateKind, Price, Quantity, Request, SalesEvent, Tag};
use ss_series::DaySeries;
use ss_transport::{Demultiplexer, FramedTransport};
use tracing::warn;

use crate::{Result, ServiceError};

pub struct SalesClient {
    demux: Demultiplexer,
    timeout: Option<Duration>,
    in_flight: Mutex<HashMap<Tag, Arc<Mutex<()>>>>,
}

impl SalesClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Self::from_transport(Arc::new(FramedTransport::from_tcp(stream)?))
    }

    pub fn from_transport(transport: Arc<FramedTransport>) -> Result<Self> {
        Ok(Self {
            demux: Demultiplexer::spawn(transport)?,
            timeout: None,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Bounds every request/response exchange except the notification
    /// waits, which block until the condition holds or the day ends.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn close(&self) -> Result<()> {
        self.demux.close()?;
        Ok(())
    }

    fn lane(&self, tag: Tag) -> Arc<Mutex<()>> {
        Arc::clone(self.in_flight.lock().entry(tag).or_default())
    }

    fn call(&self, request: &Request, timeout: Option<Duration>) -> Result<Bytes> {
        let lane = self.lane(request.tag());
        let _exchange = lane.lock();

        let tag = request.tag().code();
        self.demux.send(tag, &request.encode()?)?;
        let received = match timeout {
            Some(timeout) => self.demux.receive_timeout(tag, timeout),
            None => self.demux.receive(tag),
        };
        match received {
            Ok(payload) => Ok(payload),
            Err(err) if err.is_timeout() => {
                warn!(tag, "request timed out, closing connection");
                let _ = self.demux.close();
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn register(&self, user: &str, password: &str) -> Result<bool> {
        let request = Request::Register {
            user: user.to_owned(),
            password: password.to_owned(),
        };
        Ok(read_bool(&self.call(&request, self.timeout)?)?)
    }

    pub fn login(&self, user: &str, password: &str) -> Result<bool> {
        let request = Request::Login {
            user: user.to_owned(),
            password: password.to_owned(),
        };
        Ok(read_bool(&self.call(&request, self.timeout)?)?)
    }

    /// Returns the server's acknowledgement text.
    pub fn add_event(&self, product: &str, quantity: Quantity, price: Price) -> Result<String> {
        let request = Request::AddEvent {
            product: product.to_owned(),
            quantity,
            price,
        };
        Ok(read_text(&self.call(&request, self.timeout)?)?)
    }

    /// `-1.0` means the server refused the request.
    pub fn aggregate(&self, kind: AggregateKind, product: &str, days: i32) -> Result<f64> {
        let request = Request::Aggregate {
            kind,
            product: product.to_owned(),
            days,
        };
        Ok(read_float(&self.call(&request, self.timeout)?)?)
    }

    pub fn quantity(&self, product: &str, days: i32) -> Result<f64> {
        self.aggregate(AggregateKind::Quantity, product, days)
    }

    pub fn volume(&self, product: &str, days: i32) -> Result<f64> {
        self.aggregate(AggregateKind::Volume, product, days)
    }

    pub fn average(&self, product: &str, days: i32) -> Result<f64> {
        self.aggregate(AggregateKind::Average, product, days)
    }

    pub fn max_price(&self, product: &str, days: i32) -> Result<f64> {
        self.aggregate(AggregateKind::Max, product, days)
    }

    /// Blocks until both products have sold today; `false` if the day ends
    /// first.
    pub fn wait_simultaneous(&self, first: &str, second: &str) -> Result<bool> {
        let request = Request::Simultaneous {
            first: first.to_owned(),
            second: second.to_owned(),
        };
        Ok(read_bool(&self.call(&request, None)?)?)
    }

    /// Blocks until `product` sells `n` times in a row; `None` if the day
    /// ends first.
    pub fn wait_consecutive(&self, product: &str, n: i32) -> Result<Option<String>> {
        let request = Request::Consecutive {
            product: product.to_owned(),
            n,
        };
        let answer = read_text(&self.call(&request, None)?)?;
        Ok((answer != "null").then_some(answer))
    }

    pub fn new_day(&self) -> Result<String> {
        Ok(read_text(&self.call(&Request::NewDay, self.timeout)?)?)
    }

    /// Events of `products` on the closed day `days_back` days ago.
    pub fn filter_events(&self, days_back: i32, products: &[&str]) -> Result<Vec<SalesEvent>> {
        let request = Request::FilterEvents {
            days_back,
            products: products.iter().map(|p| p.to_string()).collect(),
        };
        let payload = self.call(&request, self.timeout)?;
        if payload.is_empty() {
            return Err(ServiceError::InvalidRequest(format!(
                "server refused to filter day -{days_back}"
            )));
        }
        Ok(DaySeries::decode_filtered_compacted(&mut &payload[..])?)
    }
}
