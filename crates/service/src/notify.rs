//! Blocking sales notifications scoped to the current day.
//!
//! Every waiter parks on one condition variable and re-checks its own
//! predicate when woken. A day epoch distinguishes "still today" from "the
//! day rolled over while I slept": rollover bumps it and wakes everyone,
//! and a waiter that sees a different epoch gives up.
//!
//! Consecutive-sale waiters are registered so that `record_sale` can mark
//! them satisfied at the moment the run reaches their threshold. A waiter
//! that wakes after the run has already been broken still succeeds.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

struct ConsecutiveWait {
    product: String,
    threshold: u32,
    met: bool,
}

#[derive(Default)]
struct Board {
    epoch: u64,
    sold_today: HashSet<String>,
    last_product: Option<String>,
    run: u32,
    next_waiter: u64,
    consecutive: HashMap<u64, ConsecutiveWait>,
    parked: usize,
}

impl Board {
    fn both_sold(&self, first: &str, second: &str) -> bool {
        self.sold_today.contains(first) && self.sold_today.contains(second)
    }

    fn run_of(&self, product: &str) -> u32 {
        match &self.last_product {
            Some(last) if last == product => self.run,
            _ => 0,
        }
    }

    /// Unregisters waiter `id`, reporting whether it had been satisfied.
    fn settle(&mut self, id: u64) -> bool {
        self.consecutive.remove(&id).is_some_and(|w| w.met)
    }
}

#[derive(Default)]
pub struct NotificationBoard {
    board: Mutex<Board>,
    changed: Condvar,
}

impl NotificationBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sale(&self, product: &str) {
        let mut board = self.board.lock();
        board.sold_today.insert(product.to_owned());

        if board.last_product.as_deref() == Some(product) {
            board.run += 1;
        } else {
            board.last_product = Some(product.to_owned());
            board.run = 1;
        }

        let run = board.run;
        for wait in board.consecutive.values_mut() {
            if wait.product == product && run >= wait.threshold {
                wait.met = true;
            }
        }
        drop(board);
        self.changed.notify_all();
    }

    /// Resets today's state and releases every waiter as unsuccessful.
    pub fn start_new_day(&self) {
        let mut board = self.board.lock();
        board.epoch += 1;
        board.sold_today.clear();
        board.last_product = None;
        board.run = 0;
        board.consecutive.clear();
        debug!(epoch = board.epoch, released = board.parked, "notification day advanced");
        drop(board);
        self.changed.notify_all();
    }

    /// Number of threads currently blocked in a `wait_*` call.
    pub fn waiting(&self) -> usize {
        self.board.lock().parked
    }

    /// Blocks until both products have been sold today. Returns `false` if
    /// the day ends first or `deadline` passes.
    pub fn wait_simultaneous(&self, first: &str, second: &str, deadline: Option<Instant>) -> bool {
        let mut board = self.board.lock();
        let epoch = board.epoch;
        board.parked += 1;

        let sold = loop {
            if board.epoch != epoch {
                break false;
            }
            if board.both_sold(first, second) {
                break true;
            }
            match deadline {
                None => self.changed.wait(&mut board),
                Some(deadline) => {
                    if self.changed.wait_until(&mut board, deadline).timed_out() {
                        break board.epoch == epoch && board.both_sold(first, second);
                    }
                }
            }
        };

        board.parked -= 1;
        sold
    }

    /// Blocks until `product` has been sold `n` times in a row today.
    /// Returns the product name on success, `None` if the day ends first or
    /// `deadline` passes. `n <= 1` is satisfied by a single sale.
    pub fn wait_consecutive(
        &self,
        product: &str,
        n: i32,
        deadline: Option<Instant>,
    ) -> Option<String> {
        let threshold = u32::try_from(n).unwrap_or(0).max(1);
        let mut board = self.board.lock();
        if board.run_of(product) >= threshold {
            return Some(product.to_owned());
        }

        let epoch = board.epoch;
        let id = board.next_waiter;
        board.next_waiter += 1;
        board.consecutive.insert(
            id,
            ConsecutiveWait {
                product: product.to_owned(),
                threshold,
                met: false,
            },
        );
        board.parked += 1;

        let met = loop {
            if board.epoch != epoch {
                break false;
            }
            if board.consecutive.get(&id).is_some_and(|w| w.met) {
                break true;
            }
            match deadline {
                None => self.changed.wait(&mut board),
                Some(deadline) => {
                    if self.changed.wait_until(&mut board, deadline).timed_out() {
                        break board.epoch == epoch && board.consecutive.get(&id).is_some_and(|w| w.met);
                    }
                }
            }
        };

        board.settle(id);
        board.parked -= 1;
        met.then(|| product.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn wait_for_parked(board: &NotificationBoard, n: usize) {
        let until = Instant::now() + Duration::from_secs(5);
        while board.waiting() < n {
            assert!(Instant::now() < until, "waiters never parked");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn simultaneous_already_met_returns_immediately() {
        let board = NotificationBoard::new();
        board.record_sale("A");
        board.record_sale("B");
        assert!(board.wait_simultaneous("B", "A", None));
    }

    #[test]
    fn simultaneous_wakes_once_both_are_sold() {
        let board = Arc::new(NotificationBoard::new());
        let waiter = {
            let board = Arc::clone(&board);
            thread::spawn(move || board.wait_simultaneous("A", "B", None))
        };
        wait_for_parked(&board, 1);

        board.record_sale("A");
        board.record_sale("C");
        board.record_sale("B");
        assert!(waiter.join().unwrap());
        assert_eq!(board.waiting(), 0);
    }

    #[test]
    fn consecutive_run_is_caught_even_if_broken_before_wakeup() {
        let board = Arc::new(NotificationBoard::new());
        let waiter = {
            let board = Arc::clone(&board);
            thread::spawn(move || board.wait_consecutive("A", 3, None))
        };
        wait_for_parked(&board, 1);

        board.record_sale("A");
        board.record_sale("A");
        board.record_sale("B");
        board.record_sale("A");
        board.record_sale("A");
        board.record_sale("A");
        board.record_sale("B");
        assert_eq!(waiter.join().unwrap().as_deref(), Some("A"));
    }

    #[test]
    fn consecutive_already_running_returns_immediately() {
        let board = NotificationBoard::new();
        board.record_sale("A");
        board.record_sale("A");
        assert_eq!(board.wait_consecutive("A", 2, None).as_deref(), Some("A"));
        assert_eq!(board.wait_consecutive("A", 0, None).as_deref(), Some("A"));
    }

    #[test]
    fn new_day_releases_every_waiter_unsuccessfully() {
        let board = Arc::new(NotificationBoard::new());
        board.record_sale("A");

        let simultaneous = {
            let board = Arc::clone(&board);
            thread::spawn(move || board.wait_simultaneous("A", "B", None))
        };
        let consecutive = {
            let board = Arc::clone(&board);
            thread::spawn(move || board.wait_consecutive("A", 5, None))
        };
        wait_for_parked(&board, 2);

        board.start_new_day();
        assert!(!simultaneous.join().unwrap());
        assert_eq!(consecutive.join().unwrap(), None);

        // Yesterday's sales no longer count.
        board.record_sale("B");
        let soon = Some(Instant::now() + Duration::from_millis(30));
        assert!(!board.wait_simultaneous("A", "B", soon));
    }

    #[test]
    fn deadline_gives_up_without_leaking_registrations() {
        let board = NotificationBoard::new();
        let soon = Some(Instant::now() + Duration::from_millis(30));
        assert_eq!(board.wait_consecutive("A", 2, soon), None);
        assert_eq!(board.waiting(), 0);
        assert!(board.board.lock().consecutive.is_empty());
    }
}
