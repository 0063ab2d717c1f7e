//! One calendar day of sales, keyed by product.
//!
//! Locking is two-level. The product directory has its own lock, held only
//! to look up, create or enumerate ledgers; each ledger then carries its own
//! lock for its events. Creating a new product therefore never waits on
//! appends or reads of existing products.
//!
//! Enumeration (`all_events`, `encode`, `encode_filtered_compacted`) copies
//! the ledger handles under the directory read lock and releases it before
//! reading any events. A ledger created after that copy is not part of the
//! result; events appended to an already-copied ledger up to the moment it
//! is read are.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut};
use chrono::NaiveDate;
use parking_lot::RwLock;
use ss_core::codec::{
    date_from_epoch_day, epoch_day, get_bool, get_i16, get_i64, get_len, get_utf, put_bool,
    put_len, put_utf,
};
use ss_core::{CoreError, SalesEvent};

use crate::ledger::ProductLedger;
use crate::{Result, SeriesError};

#[derive(Debug)]
pub struct DaySeries {
    date: NaiveDate,
    current: AtomicBool,
    products: RwLock<HashMap<String, Arc<ProductLedger>>>,
}

impl DaySeries {
    pub fn new(date: NaiveDate, is_current_day: bool) -> Self {
        Self {
            date,
            current: AtomicBool::new(is_current_day),
            products: RwLock::new(HashMap::new()),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn is_current_day(&self) -> bool {
        self.current.load(Ordering::Acquire)
    }

    pub fn set_current_day(&self, current: bool) {
        self.current.store(current, Ordering::Release);
    }

    /// Appends `event` to its product's ledger, creating the ledger on first
    /// use. Rejected once the day has been demoted; callers that race
    /// appends against rollover must order the two themselves.
    pub fn add_event(&self, event: SalesEvent) -> Result<()> {
        if !self.is_current_day() {
            return Err(SeriesError::DayClosed(self.date));
        }
        self.ledger_or_insert(event.product()).append(event);
        Ok(())
    }

    fn ledger(&self, product: &str) -> Option<Arc<ProductLedger>> {
        self.products.read().get(product).cloned()
    }

    fn ledger_or_insert(&self, product: &str) -> Arc<ProductLedger> {
        if let Some(ledger) = self.ledger(product) {
            return ledger;
        }
        let mut products = self.products.write();
        Arc::clone(products.entry(product.to_owned()).or_default())
    }

    /// Ledger handles in product-name order.
    fn ledgers(&self) -> Vec<(String, Arc<ProductLedger>)> {
        let mut ledgers: Vec<_> = self
            .products
            .read()
            .iter()
            .map(|(name, ledger)| (name.clone(), Arc::clone(ledger)))
            .collect();
        ledgers.sort_by(|a, b| a.0.cmp(&b.0));
        ledgers
    }

    /// Every event of the day, grouped by product (name order) and in
    /// insertion order within a product.
    pub fn all_events(&self) -> Vec<SalesEvent> {
        self.ledgers()
            .into_iter()
            .flat_map(|(_, ledger)| ledger.snapshot())
            .collect()
    }

    /// True when the product has at least one event today.
    pub fn has_product(&self, product: &str) -> bool {
        self.ledger(product).is_some_and(|l| !l.is_empty())
    }

    pub fn product_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.products.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn product_count(&self) -> usize {
        self.products.read().len()
    }

    pub fn quantity(&self, product: &str) -> i64 {
        self.ledger(product).map_or(0, |l| l.total_quantity())
    }

    pub fn total_value(&self, product: &str) -> f64 {
        self.ledger(product).map_or(0.0, |l| l.total_volume())
    }

    pub fn max_price(&self, product: &str) -> f64 {
        self.ledger(product).map_or(-1.0, |l| l.max_price())
    }

    /// `productCount:i32 {name:utf ProductLedger}[productCount] epochDay:i64 isCurrentDay:bool`
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), CoreError> {
        let ledgers = self.ledgers();
        put_len(buf, ledgers.len())?;
        for (name, ledger) in &ledgers {
            put_utf(buf, name)?;
            ledger.encode(buf)?;
        }
        buf.put_i64(epoch_day(self.date));
        put_bool(buf, self.is_current_day());
        Ok(())
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, CoreError> {
        let count = get_len(buf)?;
        let mut products = HashMap::with_capacity(count.min(4096));
        for _ in 0..count {
            let name = get_utf(buf)?;
            let ledger = ProductLedger::decode(buf)?;
            match products.entry(name) {
                Entry::Occupied(slot) => {
                    return Err(CoreError::DuplicateProduct(slot.key().clone()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(ledger));
                }
            }
        }
        let date = date_from_epoch_day(get_i64(buf)?)?;
        let current = get_bool(buf)?;

        Ok(Self {
            date,
            current: AtomicBool::new(current),
            products: RwLock::new(products),
        })
    }

    /// Writes the events of the products in `filter` with the product names
    /// factored into a dictionary:
    ///
    /// `dictSize:i32 name:utf[dictSize] eventCount:i32 {dictIndex:i16 SalesEvent(compacted)}[eventCount]`
    ///
    /// Dictionary ids are dense and assigned in first-seen order.
    pub fn encode_filtered_compacted<B: BufMut>(
        &self,
        filter: &HashSet<String>,
        buf: &mut B,
    ) -> Result<(), CoreError> {
        let events: Vec<SalesEvent> = self
            .ledgers()
            .into_iter()
            .filter(|(name, _)| filter.contains(name))
            .flat_map(|(_, ledger)| ledger.snapshot())
            .collect();

        let mut names: Vec<&str> = Vec::new();
        let mut ids: HashMap<&str, i16> = HashMap::new();
        for event in &events {
            if ids.contains_key(event.product()) {
                continue;
            }
            let id = i16::try_from(names.len())
                .map_err(|_| CoreError::DictionaryOverflow { size: names.len() + 1 })?;
            ids.insert(event.product(), id);
            names.push(event.product());
        }

        put_len(buf, names.len())?;
        for name in &names {
            put_utf(buf, name)?;
        }
        put_len(buf, events.len())?;
        for event in &events {
            buf.put_i16(ids[event.product()]);
            event.encode_compacted(buf);
        }
        Ok(())
    }

    /// Inverse of [`encode_filtered_compacted`](Self::encode_filtered_compacted).
    pub fn decode_filtered_compacted<B: Buf>(buf: &mut B) -> Result<Vec<SalesEvent>, CoreError> {
        let size = get_len(buf)?;
        let mut names = Vec::with_capacity(size.min(4096));
        for _ in 0..size {
            names.push(get_utf(buf)?);
        }

        let count = get_len(buf)?;
        let mut events = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let index = get_i16(buf)?;
            let name = usize::try_from(index)
                .ok()
                .and_then(|i| names.get(i))
                .ok_or(CoreError::InvalidDictionaryIndex {
                    index,
                    size: names.len(),
                })?;
            events.push(SalesEvent::decode_compacted(buf, name.as_str())?);
        }
        Ok(events)
    }
}

/// The filtered encoding of a day with no matching events.
pub fn encode_empty_filtered<B: BufMut>(buf: &mut B) {
    buf.put_i32(0);
    buf.put_i32(0);
}

impl PartialEq for DaySeries {
    fn eq(&self, other: &Self) -> bool {
        if self.date != other.date || self.is_current_day() != other.is_current_day() {
            return false;
        }
        let ours = self.ledgers();
        let theirs = other.ledgers();
        ours.len() == theirs.len()
            && ours
                .iter()
                .zip(&theirs)
                .all(|((a, la), (b, lb))| a == b && la.snapshot() == lb.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use chrono::NaiveDateTime;
    use std::sync::Barrier;
    use std::thread;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    fn ts(second: u32) -> NaiveDateTime {
        day().and_hms_opt(9, 0, second).unwrap()
    }

    fn sale(product: &str, quantity: i32, price: f64, second: u32) -> SalesEvent {
        SalesEvent::new(product, quantity, price, ts(second))
    }

    fn abc_series() -> DaySeries {
        let series = DaySeries::new(day(), true);
        series.add_event(sale("B", 1, 2.0, 0)).unwrap();
        series.add_event(sale("A", 2, 3.0, 1)).unwrap();
        series.add_event(sale("C", 3, 4.0, 2)).unwrap();
        series.add_event(sale("A", 4, 5.0, 3)).unwrap();
        series.add_event(sale("B", 5, 6.0, 4)).unwrap();
        series.add_event(sale("C", 6, 7.0, 5)).unwrap();
        series
    }

    #[test]
    fn closed_day_rejects_events() {
        let series = DaySeries::new(day(), true);
        series.add_event(sale("A", 1, 1.0, 0)).unwrap();
        series.set_current_day(false);

        let err = series.add_event(sale("A", 1, 1.0, 1)).unwrap_err();
        assert!(matches!(err, SeriesError::DayClosed(d) if d == day()));
        assert_eq!(series.quantity("A"), 1);
    }

    #[test]
    fn absent_products_have_defined_values() {
        let series = abc_series();
        assert!(!series.has_product("Z"));
        assert_eq!(series.quantity("Z"), 0);
        assert_eq!(series.total_value("Z"), 0.0);
        assert_eq!(series.max_price("Z"), -1.0);

        assert!(series.has_product("A"));
        assert_eq!(series.quantity("A"), 6);
        assert_eq!(series.total_value("A"), 26.0);
        assert_eq!(series.max_price("A"), 5.0);
        assert_eq!(series.product_names(), vec!["A", "B", "C"]);
    }

    #[test]
    fn product_names_are_case_sensitive() {
        let series = DaySeries::new(day(), true);
        series.add_event(sale("widget", 1, 1.0, 0)).unwrap();
        series.add_event(sale("Widget", 1, 1.0, 1)).unwrap();
        assert_eq!(series.product_count(), 2);
    }

    #[test]
    fn ledger_is_created_exactly_once_under_contention() {
        let series = Arc::new(DaySeries::new(day(), true));
        let start = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let series = Arc::clone(&series);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    series.add_event(sale("Fresh", 1, 1.0, i)).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(series.product_count(), 1);
        assert_eq!(series.quantity("Fresh"), 8);
    }

    #[test]
    fn all_events_groups_by_product_in_insertion_order() {
        let events = abc_series().all_events();
        let summary: Vec<_> = events.iter().map(|e| (e.product(), e.quantity())).collect();
        assert_eq!(
            summary,
            vec![("A", 2), ("A", 4), ("B", 1), ("B", 5), ("C", 3), ("C", 6)]
        );
    }

    #[test]
    fn all_events_sees_consistent_prefixes_while_products_are_created() {
        const WRITERS: u32 = 4;
        const PER_WRITER: i32 = 300;

        let series = Arc::new(DaySeries::new(day(), true));
        let start = Arc::new(Barrier::new(WRITERS as usize + 1));

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let series = Arc::clone(&series);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    for i in 0..PER_WRITER {
                        // Each writer keeps creating products while scans run.
                        let product = format!("p{w}-{}", i % 50);
                        series.add_event(sale(&product, i, 1.0, 0)).unwrap();
                    }
                })
            })
            .collect();

        start.wait();
        let mut scans = 0;
        while writers.iter().any(|w| !w.is_finished()) || scans == 0 {
            let events = series.all_events();
            let mut per_product: HashMap<&str, Vec<i32>> = HashMap::new();
            for event in &events {
                per_product
                    .entry(event.product())
                    .or_default()
                    .push(event.quantity());
            }
            for quantities in per_product.values() {
                assert!(quantities.windows(2).all(|w| w[0] < w[1]));
            }
            scans += 1;
        }
        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(series.all_events().len(), (WRITERS as i32 * PER_WRITER) as usize);
        assert_eq!(series.product_count(), (WRITERS * 50) as usize);
    }

    #[test]
    fn encoding_round_trips_and_is_deterministic() {
        let series = abc_series();
        let mut first = BytesMut::new();
        series.encode(&mut first).unwrap();

        let decoded = DaySeries::decode(&mut &first[..]).unwrap();
        assert_eq!(decoded, series);
        assert!(decoded.is_current_day());

        let mut second = BytesMut::new();
        decoded.encode(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn repeated_product_name_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32(2);
        for _ in 0..2 {
            put_utf(&mut buf, "A").unwrap();
            ProductLedger::new().encode(&mut buf).unwrap();
        }
        buf.put_i64(epoch_day(day()));
        put_bool(&mut buf, false);

        assert_eq!(
            DaySeries::decode(&mut &buf[..]),
            Err(CoreError::DuplicateProduct("A".into()))
        );
    }

    #[test]
    fn filtered_compaction_keeps_only_requested_products() {
        let series = abc_series();
        let filter: HashSet<String> = ["A", "C", "missing"].iter().map(|s| s.to_string()).collect();

        let mut buf = BytesMut::new();
        series.encode_filtered_compacted(&filter, &mut buf).unwrap();

        let mut header = &buf[..];
        assert_eq!(get_len(&mut header).unwrap(), 2);
        assert_eq!(get_utf(&mut header).unwrap(), "A");
        assert_eq!(get_utf(&mut header).unwrap(), "C");
        assert_eq!(get_len(&mut header).unwrap(), 4);

        let events = DaySeries::decode_filtered_compacted(&mut &buf[..]).unwrap();
        let expected: Vec<_> = series
            .all_events()
            .into_iter()
            .filter(|e| e.product() != "B")
            .collect();
        assert_eq!(events, expected);
    }

    #[test]
    fn filtered_compaction_of_nothing_matches_empty_encoding() {
        let series = abc_series();
        let mut buf = BytesMut::new();
        series
            .encode_filtered_compacted(&HashSet::from(["Z".to_string()]), &mut buf)
            .unwrap();

        let mut empty = BytesMut::new();
        encode_empty_filtered(&mut empty);
        assert_eq!(buf, empty);
        assert!(DaySeries::decode_filtered_compacted(&mut &buf[..])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn dictionary_index_out_of_range_is_rejected() {
        for index in [1i16, -1] {
            let mut buf = BytesMut::new();
            buf.put_i32(1);
            put_utf(&mut buf, "A").unwrap();
            buf.put_i32(1);
            buf.put_i16(index);
            sale("A", 1, 1.0, 0).encode_compacted(&mut buf);

            assert_eq!(
                DaySeries::decode_filtered_compacted(&mut &buf[..]),
                Err(CoreError::InvalidDictionaryIndex { index, size: 1 })
            );
        }
    }
}
