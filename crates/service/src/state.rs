//! Process-wide sales state: the current day, the closed-day history behind
//! the series cache, and the aggregate queries over that history.
//!
//! `today` is a reader/writer lock. Appends and queries share it; rollover
//! takes it exclusively, so no append can land in a day after it has been
//! demoted and no aggregate computed for yesterday's window is cached after
//! the window moved.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{Days, Local, NaiveDate};
use parking_lot::RwLock;
use ss_core::{AggregateKind, Price, Quantity, SalesEvent};
use ss_runtime::MetricsRegistry;
use ss_series::{encode_empty_filtered, DaySeries, SeriesFileStore};
use tracing::{info, warn};

use crate::cache::{AggregateKey, SeriesCache};
use crate::config::ServiceConfig;
use crate::notify::NotificationBoard;
use crate::{Result, ServiceError};

struct Today {
    date: NaiveDate,
    series: Arc<DaySeries>,
    /// Closed days available to queries.
    max_days: usize,
}

pub struct ServiceState {
    cache: SeriesCache,
    notifications: Arc<NotificationBoard>,
    metrics: MetricsRegistry,
    today: RwLock<Today>,
}

impl ServiceState {
    pub fn from_config(
        cfg: &ServiceConfig,
        notifications: Arc<NotificationBoard>,
        metrics: MetricsRegistry,
    ) -> Result<Self> {
        let store = SeriesFileStore::open(&cfg.data_dir)?;
        let today = Local::now().date_naive();
        Self::open(store, cfg.cache_size, today, notifications, metrics)
    }

    /// Starts on the later of `today` and the newest saved day. If that day
    /// already has a file it is reloaded and becomes writable again.
    pub fn open(
        store: SeriesFileStore,
        cache_size: usize,
        today: NaiveDate,
        notifications: Arc<NotificationBoard>,
        metrics: MetricsRegistry,
    ) -> Result<Self> {
        let latest = store.latest_saved_date()?;
        let date = latest.map_or(today, |latest| latest.max(today));
        let mut max_days = store.count_historical_days()?;
        if store.exists(date) {
            max_days = max_days.saturating_sub(1);
        }

        let cache = SeriesCache::new(store, cache_size, metrics.clone());
        let series = match cache.get(date)? {
            Some(series) => {
                series.set_current_day(true);
                info!(%date, products = series.product_count(), "resuming saved day");
                series
            }
            None => {
                let series = Arc::new(DaySeries::new(date, true));
                cache.put(Arc::clone(&series))?;
                series
            }
        };
        if date > today {
            info!(%date, "simulated calendar restored ahead of the system date");
        }
        info!(%date, max_days, cache_size = cache.capacity(), "service state ready");

        Ok(Self {
            cache,
            notifications,
            metrics,
            today: RwLock::new(Today {
                date,
                series,
                max_days,
            }),
        })
    }

    pub fn current_date(&self) -> NaiveDate {
        self.today.read().date
    }

    pub fn max_days(&self) -> usize {
        self.today.read().max_days
    }

    pub fn current_series(&self) -> Arc<DaySeries> {
        Arc::clone(&self.today.read().series)
    }

    pub fn notifications(&self) -> &Arc<NotificationBoard> {
        &self.notifications
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn cache(&self) -> &SeriesCache {
        &self.cache
    }

    /// Records a sale on the current day, stamped with the current day's
    /// date and the wall-clock time of day.
    pub fn add_event(&self, product: &str, quantity: Quantity, price: Price) -> Result<SalesEvent> {
        let today = self.today.read();
        let at = today.date.and_time(Local::now().time());
        let event = SalesEvent::new(product, quantity, price, at);

        today.series.add_event(event.clone())?;
        self.cache.mark_modified(&today.series);
        self.notifications.record_sale(product);
        drop(today);

        self.metrics.inc_events_appended(1);
        Ok(event)
    }

    /// Closes the current day, persists it, and opens the next one.
    pub fn start_new_day(&self) -> Result<NaiveDate> {
        let mut today = self.today.write();
        let closing = Arc::clone(&today.series);
        let next_date = today
            .date
            .succ_opt()
            .ok_or_else(|| ServiceError::InvalidRequest("calendar exhausted".into()))?;

        closing.set_current_day(false);
        if let Err(err) = self.cache.put(Arc::clone(&closing)) {
            closing.set_current_day(true);
            return Err(err.into());
        }

        let next = Arc::new(DaySeries::new(next_date, true));
        if let Err(err) = self.cache.put(Arc::clone(&next)) {
            warn!(date = %next_date, error = %err, "new day not persisted yet; kept as modified");
            self.cache.mark_modified(&next);
        }

        let closed = today.date;
        today.date = next_date;
        today.series = next;
        today.max_days += 1;

        self.cache.clear_aggregates();
        self.notifications.start_new_day();
        self.metrics.inc_days_closed(1);
        info!(%closed, current = %next_date, max_days = today.max_days, "day rolled over");
        Ok(next_date)
    }

    /// Aggregates `product` over the `days` closed days before the current
    /// one, capped at the history available. Days without the product are
    /// skipped; an empty window yields `0.0`.
    pub fn aggregate(&self, kind: AggregateKind, product: &str, days: i32) -> Result<f64> {
        let today = self.today.read();
        let window = usize::try_from(days).unwrap_or(0).min(today.max_days);
        if window == 0 {
            return Ok(0.0);
        }

        let key = AggregateKey {
            kind,
            product: product.to_owned(),
            days,
        };
        if let Some(value) = self.cache.aggregate(&key) {
            return Ok(value);
        }

        let mut total = 0.0f64;
        let mut average_quantity = 0i64;
        for offset in 1..=window as u64 {
            let Some(date) = today.date.checked_sub_days(Days::new(offset)) else {
                break;
            };
            let Some(series) = self.cache.get(date)? else {
                continue;
            };
            match kind {
                AggregateKind::Quantity => total += series.quantity(product) as f64,
                AggregateKind::Volume => total += series.total_value(product),
                AggregateKind::Average => {
                    let quantity = series.quantity(product);
                    if quantity > 0 {
                        total += series.total_value(product);
                        average_quantity += quantity;
                    }
                }
                AggregateKind::Max => total = total.max(series.max_price(product)),
            }
        }
        if kind == AggregateKind::Average && average_quantity > 0 {
            total /= average_quantity as f64;
        }

        self.cache.put_aggregate(key, total);
        Ok(total)
    }

    /// The compacted events of `products` on the day `days_back` days before
    /// the current one. Only closed days inside the available history can
    /// be queried; a day with no file encodes as an empty result.
    pub fn filtered_events(&self, days_back: i32, products: &HashSet<String>) -> Result<Bytes> {
        if products.is_empty() {
            return Err(ServiceError::InvalidRequest("no products given".into()));
        }

        let today = self.today.read();
        let back = u64::try_from(days_back)
            .ok()
            .filter(|back| *back > 0)
            .ok_or_else(|| ServiceError::InvalidRequest("only closed days can be filtered".into()))?;
        if back > today.max_days as u64 {
            return Err(ServiceError::InvalidRequest(format!(
                "day {back} back is outside the {} days of history",
                today.max_days
            )));
        }
        let date = today
            .date
            .checked_sub_days(Days::new(back))
            .ok_or_else(|| ServiceError::InvalidRequest("date out of range".into()))?;

        let mut buf = BytesMut::new();
        match self.cache.get(date)? {
            Some(series) => series.encode_filtered_compacted(products, &mut buf)?,
            None => encode_empty_filtered(&mut buf),
        }
        Ok(buf.freeze())
    }

    /// Writes every modified day back to disk.
    pub fn shutdown(&self) -> Result<usize> {
        let written = self.cache.flush()?;
        info!(written, "series flushed");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn open(tmp: &TempDir, today: NaiveDate) -> ServiceState {
        ServiceState::open(
            SeriesFileStore::open(tmp.path()).unwrap(),
            2,
            today,
            Arc::new(NotificationBoard::new()),
            MetricsRegistry::default(),
        )
        .unwrap()
    }

    /// Three closed days:
    /// day 1: Widget 2 @ 10.0
    /// day 2: nothing for Widget
    /// day 3: Widget 3 @ 20.0, Widget 1 @ 5.0
    fn with_history(tmp: &TempDir) -> ServiceState {
        let state = open(tmp, date(1));
        state.add_event("Widget", 2, 10.0).unwrap();
        state.start_new_day().unwrap();
        state.add_event("Gadget", 7, 1.0).unwrap();
        state.start_new_day().unwrap();
        state.add_event("Widget", 3, 20.0).unwrap();
        state.add_event("Widget", 1, 5.0).unwrap();
        state.start_new_day().unwrap();
        state
    }

    #[test]
    fn events_are_stamped_with_the_current_day() {
        let tmp = TempDir::new().unwrap();
        let state = open(&tmp, date(10));
        let event = state.add_event("Widget", 1, 2.5).unwrap();
        assert_eq!(event.timestamp().date(), date(10));
        assert_eq!(state.current_series().quantity("Widget"), 1);
        assert!(state.cache().is_dirty(date(10)));
    }

    #[test]
    fn rollover_persists_and_advances() {
        let tmp = TempDir::new().unwrap();
        let state = open(&tmp, date(10));
        let before = state.current_series();
        state.add_event("Widget", 4, 1.0).unwrap();

        assert_eq!(state.start_new_day().unwrap(), date(11));
        assert_eq!(state.current_date(), date(11));
        assert_eq!(state.max_days(), 1);
        assert!(!before.is_current_day());
        assert!(before.add_event(SalesEvent::new("Widget", 1, 1.0, date(10).and_hms_opt(1, 0, 0).unwrap())).is_err());

        let store = state.cache().store();
        let saved = store.load(date(10)).unwrap().unwrap();
        assert_eq!(saved.quantity("Widget"), 4);
        assert!(!saved.is_current_day());
        assert!(store.exists(date(11)));
        assert_eq!(state.metrics().snapshot().days_closed, 1);
    }

    #[test]
    fn aggregates_over_the_closed_window() {
        let tmp = TempDir::new().unwrap();
        let state = with_history(&tmp);
        assert_eq!(state.current_date(), date(4));
        assert_eq!(state.max_days(), 3);

        assert_eq!(state.aggregate(AggregateKind::Quantity, "Widget", 3).unwrap(), 6.0);
        assert_eq!(state.aggregate(AggregateKind::Volume, "Widget", 3).unwrap(), 85.0);
        let average = state.aggregate(AggregateKind::Average, "Widget", 3).unwrap();
        assert!((average - 85.0 / 6.0).abs() < 1e-9);
        assert_eq!(state.aggregate(AggregateKind::Max, "Widget", 3).unwrap(), 20.0);

        // Only the most recent closed day.
        assert_eq!(state.aggregate(AggregateKind::Quantity, "Widget", 1).unwrap(), 4.0);
        // Window capped at the history available.
        assert_eq!(state.aggregate(AggregateKind::Quantity, "Widget", 50).unwrap(), 6.0);
    }

    #[test]
    fn empty_windows_and_unknown_products_are_zero() {
        let tmp = TempDir::new().unwrap();
        let state = with_history(&tmp);
        for kind in [
            AggregateKind::Quantity,
            AggregateKind::Volume,
            AggregateKind::Average,
            AggregateKind::Max,
        ] {
            assert_eq!(state.aggregate(kind, "Widget", 0).unwrap(), 0.0);
            assert_eq!(state.aggregate(kind, "Widget", -2).unwrap(), 0.0);
            assert_eq!(state.aggregate(kind, "Nothing", 3).unwrap(), 0.0);
        }
    }

    #[test]
    fn todays_sales_are_not_aggregated_and_cache_resets_at_rollover() {
        let tmp = TempDir::new().unwrap();
        let state = with_history(&tmp);
        assert_eq!(state.aggregate(AggregateKind::Quantity, "Widget", 1).unwrap(), 4.0);

        state.add_event("Widget", 100, 1.0).unwrap();
        assert_eq!(state.aggregate(AggregateKind::Quantity, "Widget", 1).unwrap(), 4.0);

        state.start_new_day().unwrap();
        assert_eq!(state.aggregate(AggregateKind::Quantity, "Widget", 1).unwrap(), 100.0);
    }

    #[test]
    fn filtered_events_validate_the_requested_day() {
        let tmp = TempDir::new().unwrap();
        let state = with_history(&tmp);
        let widget: HashSet<String> = HashSet::from(["Widget".to_string()]);

        let bytes = state.filtered_events(1, &widget).unwrap();
        let events = DaySeries::decode_filtered_compacted(&mut &bytes[..]).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.product() == "Widget"));

        let bytes = state.filtered_events(2, &widget).unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 0, 0, 0, 0, 0]);

        for bad in [0, -1, 4] {
            assert!(matches!(
                state.filtered_events(bad, &widget),
                Err(ServiceError::InvalidRequest(_))
            ));
        }
        assert!(matches!(
            state.filtered_events(1, &HashSet::new()),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn day_without_a_file_inside_history_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = SeriesFileStore::open(tmp.path()).unwrap();
        for day in [date(1), date(3)] {
            let series = DaySeries::new(day, true);
            let at = day.and_hms_opt(9, 0, 0).unwrap();
            series.add_event(SalesEvent::new("Widget", 1, 1.0, at)).unwrap();
            series.set_current_day(false);
            store.save(&series, day).unwrap();
        }

        let state = open(&tmp, date(4));
        assert_eq!(state.max_days(), 2);
        let widget = HashSet::from(["Widget".to_string()]);
        let bytes = state.filtered_events(2, &widget).unwrap();
        assert!(DaySeries::decode_filtered_compacted(&mut &bytes[..])
            .unwrap()
            .is_empty());
        assert_eq!(state.aggregate(AggregateKind::Quantity, "Widget", 2).unwrap(), 1.0);
    }

    #[test]
    fn restart_resumes_the_latest_day() {
        let tmp = TempDir::new().unwrap();
        {
            let state = with_history(&tmp);
            state.add_event("Widget", 9, 3.0).unwrap();
            state.shutdown().unwrap();
        }

        // System clock behind the simulated calendar.
        let state = open(&tmp, date(2));
        assert_eq!(state.current_date(), date(4));
        assert_eq!(state.max_days(), 3);
        assert!(state.current_series().is_current_day());
        assert_eq!(state.current_series().quantity("Widget"), 9);
        state.add_event("Widget", 1, 3.0).unwrap();
        assert_eq!(state.current_series().quantity("Widget"), 10);
    }

    #[test]
    fn restart_on_a_later_system_date_opens_a_fresh_day() {
        let tmp = TempDir::new().unwrap();
        with_history(&tmp).shutdown().unwrap();

        let state = open(&tmp, date(20));
        assert_eq!(state.current_date(), date(20));
        assert_eq!(state.max_days(), 4);
        assert_eq!(state.current_series().product_count(), 0);
    }
}
