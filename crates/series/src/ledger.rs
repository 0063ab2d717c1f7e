use bytes::{Buf, BufMut};
use parking_lot::RwLock;
use ss_core::codec::{get_len, put_len};
use ss_core::{CoreError, SalesEvent};

/// Append-only events of one product within one day.
///
/// One reader/writer lock guards the whole sequence: aggregate reads run in
/// parallel with each other and never observe a half-applied append.
#[derive(Debug, Default)]
pub struct ProductLedger {
    events: RwLock<Vec<SalesEvent>>,
}

impl ProductLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_events(events: Vec<SalesEvent>) -> Self {
        Self {
            events: RwLock::new(events),
        }
    }

    pub fn append(&self, event: SalesEvent) {
        self.events.write().push(event);
    }

    /// Copy of the events in insertion order.
    pub fn snapshot(&self) -> Vec<SalesEvent> {
        self.events.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn count(&self) -> usize {
        self.events.read().len()
    }

    pub fn total_quantity(&self) -> i64 {
        self.events
            .read()
            .iter()
            .map(|e| i64::from(e.quantity()))
            .sum()
    }

    pub fn total_volume(&self) -> f64 {
        self.events.read().iter().map(SalesEvent::total_value).sum()
    }

    /// Highest unit price seen, or `-1.0` when the ledger is empty.
    pub fn max_price(&self) -> f64 {
        self.events
            .read()
            .iter()
            .map(SalesEvent::unit_price)
            .fold(-1.0, f64::max)
    }

    /// `count:i32 SalesEvent(full)[count]`
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), CoreError> {
        let events = self.events.read();
        put_len(buf, events.len())?;
        for event in events.iter() {
            event.encode_full(buf)?;
        }
        Ok(())
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, CoreError> {
        let count = get_len(buf)?;
        let mut events = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            events.push(SalesEvent::decode_full(buf)?);
        }
        Ok(Self::from_events(events))
    }
}
