//! Request bodies and scalar responses carried inside frames.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{get_bool, get_f64, get_i32, get_len, get_utf, put_bool, put_len, put_utf};
use crate::{AggregateKind, Price, Quantity, Result, Tag};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Register { user: String, password: String },
    Login { user: String, password: String },
    AddEvent { product: String, quantity: Quantity, price: Price },
    Aggregate { kind: AggregateKind, product: String, days: i32 },
    Simultaneous { first: String, second: String },
    Consecutive { product: String, n: i32 },
    NewDay,
    FilterEvents { days_back: i32, products: Vec<String> },
}

impl Request {
    pub fn tag(&self) -> Tag {
        match self {
            Request::Register { .. } => Tag::Register,
            Request::Login { .. } => Tag::Login,
            Request::AddEvent { .. } => Tag::AddEvent,
            Request::Aggregate { kind, .. } => kind.tag(),
            Request::Simultaneous { .. } => Tag::SimultaneousSales,
            Request::Consecutive { .. } => Tag::ConsecutiveSales,
            Request::NewDay => Tag::NewDay,
            Request::FilterEvents { .. } => Tag::FilterEvents,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        match self {
            Request::Register { user, password } | Request::Login { user, password } => {
                put_utf(&mut buf, user)?;
                put_utf(&mut buf, password)?;
            }
            Request::AddEvent {
                product,
                quantity,
                price,
            } => {
                put_utf(&mut buf, product)?;
                buf.put_i32(*quantity);
                buf.put_f64(*price);
            }
            Request::Aggregate { product, days, .. } => {
                put_utf(&mut buf, product)?;
                buf.put_i32(*days);
            }
            Request::Simultaneous { first, second } => {
                put_utf(&mut buf, first)?;
                put_utf(&mut buf, second)?;
            }
            Request::Consecutive { product, n } => {
                put_utf(&mut buf, product)?;
                buf.put_i32(*n);
            }
            Request::NewDay => {}
            Request::FilterEvents {
                days_back,
                products,
            } => {
                buf.put_i32(*days_back);
                put_len(&mut buf, products.len())?;
                for product in products {
                    put_utf(&mut buf, product)?;
                }
            }
        }
        Ok(buf.freeze())
    }

    pub fn decode(tag: Tag, payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        let request = match tag {
            Tag::Register => Request::Register {
                user: get_utf(&mut buf)?,
                password: get_utf(&mut buf)?,
            },
            Tag::Login => Request::Login {
                user: get_utf(&mut buf)?,
                password: get_utf(&mut buf)?,
            },
            Tag::AddEvent => Request::AddEvent {
                product: get_utf(&mut buf)?,
                quantity: get_i32(&mut buf)?,
                price: get_f64(&mut buf)?,
            },
            Tag::AggregateQuantity => decode_aggregate(AggregateKind::Quantity, &mut buf)?,
            Tag::AggregateVolume => decode_aggregate(AggregateKind::Volume, &mut buf)?,
            Tag::AggregateAverage => decode_aggregate(AggregateKind::Average, &mut buf)?,
            Tag::AggregateMax => decode_aggregate(AggregateKind::Max, &mut buf)?,
            Tag::SimultaneousSales => Request::Simultaneous {
                first: get_utf(&mut buf)?,
                second: get_utf(&mut buf)?,
            },
            Tag::ConsecutiveSales => Request::Consecutive {
                product: get_utf(&mut buf)?,
                n: get_i32(&mut buf)?,
            },
            Tag::NewDay => Request::NewDay,
            Tag::FilterEvents => {
                let days_back = get_i32(&mut buf)?;
                let count = get_len(&mut buf)?;
                let mut products = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    products.push(get_utf(&mut buf)?);
                }
                Request::FilterEvents {
                    days_back,
                    products,
                }
            }
        };
        Ok(request)
    }
}

fn decode_aggregate(kind: AggregateKind, buf: &mut &[u8]) -> Result<Request> {
    Ok(Request::Aggregate {
        kind,
        product: get_utf(buf)?,
        days: get_i32(buf)?,
    })
}

pub fn bool_response(value: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(1);
    put_bool(&mut buf, value);
    buf.freeze()
}

pub fn float_response(value: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_f64(value);
    buf.freeze()
}

pub fn text_response(value: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(value.len() + 2);
    put_utf(&mut buf, value)?;
    Ok(buf.freeze())
}

pub fn read_bool(mut payload: &[u8]) -> Result<bool> {
    get_bool(&mut payload)
}

pub fn read_float(mut payload: &[u8]) -> Result<f64> {
    get_f64(&mut payload)
}

pub fn read_text(mut payload: &[u8]) -> Result<String> {
    get_utf(&mut payload)
}
