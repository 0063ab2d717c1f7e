use bytes::{Buf, BufMut};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::codec::{get_f64, get_i32, get_i64, get_utf, put_utf};
use crate::{CoreError, Price, Quantity, Result};

/// One immutable sale of a product. Timestamps are UTC wall-clock values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalesEvent {
    product: String,
    quantity: Quantity,
    unit_price: Price,
    timestamp: NaiveDateTime,
}

impl SalesEvent {
    pub fn new(
        product: impl Into<String>,
        quantity: Quantity,
        unit_price: Price,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            product: product.into(),
            quantity,
            unit_price,
            timestamp,
        }
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn unit_price(&self) -> Price {
        self.unit_price
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn total_value(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }

    /// `name:utf quantity:i32 price:f64 epochSec:i64 nanos:i32`
    pub fn encode_full<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        put_utf(buf, &self.product)?;
        self.encode_compacted(buf);
        Ok(())
    }

    /// Same as [`encode_full`](Self::encode_full) without the product name,
    /// which the reader must already know from a surrounding dictionary.
    pub fn encode_compacted<B: BufMut>(&self, buf: &mut B) {
        let utc = self.timestamp.and_utc();
        buf.put_i32(self.quantity);
        buf.put_f64(self.unit_price);
        buf.put_i64(utc.timestamp());
        // subsec nanos stay below 2e9 even across a leap second.
        buf.put_i32(utc.timestamp_subsec_nanos() as i32);
    }

    pub fn decode_full<B: Buf>(buf: &mut B) -> Result<Self> {
        let product = get_utf(buf)?;
        Self::decode_compacted(buf, product)
    }

    pub fn decode_compacted<B: Buf>(buf: &mut B, product: impl Into<String>) -> Result<Self> {
        let quantity = get_i32(buf)?;
        let unit_price = get_f64(buf)?;
        let secs = get_i64(buf)?;
        let nanos = get_i32(buf)?;

        let timestamp = u32::try_from(nanos)
            .ok()
            .and_then(|n| DateTime::from_timestamp(secs, n))
            .ok_or(CoreError::InvalidTimestamp { secs, nanos })?
            .naive_utc();

        Ok(Self {
            product: product.into(),
            quantity,
            unit_price,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, nanos: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_nano_opt(h, m, s, nanos)
            .unwrap()
    }

    #[test]
    fn full_encoding_round_trips() {
        let event = SalesEvent::new("Widget", 3, 9.99, at(10, 15, 0, 123_456_789));
        let mut buf = BytesMut::new();
        event.encode_full(&mut buf).unwrap();
        assert_eq!(buf.len(), 2 + 6 + 4 + 8 + 8 + 4);

        let mut read = &buf[..];
        assert_eq!(SalesEvent::decode_full(&mut read).unwrap(), event);
        assert!(read.is_empty());
    }

    #[test]
    fn compacted_encoding_takes_name_from_caller() {
        let event = SalesEvent::new("Gadget", -2, 0.5, at(23, 59, 59, 999_999_999));
        let mut buf = BytesMut::new();
        event.encode_compacted(&mut buf);
        assert_eq!(buf.len(), 4 + 8 + 8 + 4);

        let mut read = &buf[..];
        let decoded = SalesEvent::decode_compacted(&mut read, "Gadget").unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn pre_epoch_timestamps_survive() {
        let ts = NaiveDate::from_ymd_opt(1969, 7, 20)
            .unwrap()
            .and_hms_nano_opt(20, 17, 40, 500)
            .unwrap();
        let event = SalesEvent::new("Lander", 1, 1.0, ts);
        let mut buf = BytesMut::new();
        event.encode_full(&mut buf).unwrap();
        assert_eq!(SalesEvent::decode_full(&mut &buf[..]).unwrap(), event);
    }

    #[test]
    fn negative_nanos_are_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32(1);
        buf.put_f64(1.0);
        buf.put_i64(0);
        buf.put_i32(-1);
        assert_eq!(
            SalesEvent::decode_compacted(&mut &buf[..], "x"),
            Err(CoreError::InvalidTimestamp { secs: 0, nanos: -1 })
        );
    }

    #[test]
    fn truncated_event_is_an_error() {
        let event = SalesEvent::new("Widget", 3, 9.99, at(1, 2, 3, 0));
        let mut buf = BytesMut::new();
        event.encode_full(&mut buf).unwrap();
        let cut = &buf[..buf.len() - 3];
        assert!(matches!(
            SalesEvent::decode_full(&mut &cut[..]),
            Err(CoreError::Truncated { .. })
        ));
    }

    #[test]
    fn total_value_is_derived() {
        let event = SalesEvent::new("Widget", 4, 2.5, at(0, 0, 0, 0));
        assert_eq!(event.total_value(), 10.0);
    }
}
