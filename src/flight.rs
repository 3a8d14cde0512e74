//! Single-flight execution.
//! The first caller becomes the leader and runs the work; callers arriving
//! while it is in flight join the waiter list and receive a clone of the
//! leader's outcome. The waiter list is taken and the state reset to idle under
//! one lock, so a cycle is never observed half-settled.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

type Waiter<T, E> = oneshot::Sender<Result<T, E>>;

enum FlightState<T, E> {
    Idle,
    InFlight { waiters: Vec<Waiter<T, E>> },
}

pub struct SingleFlight<T, E> {
    state: Mutex<FlightState<T, E>>,
    cycles: AtomicU64,
    /// Outcome handed to waiters when the leader is dropped before settling.
    abandoned: fn() -> E,
}

impl<T: Clone, E: Clone> SingleFlight<T, E> {
    pub fn new(abandoned: fn() -> E) -> Self {
        Self { state: Mutex::new(FlightState::Idle), cycles: AtomicU64::new(0), abandoned }
    }

    pub fn is_in_flight(&self) -> bool { matches!(*self.state.lock(), FlightState::InFlight { .. }) }

    pub fn waiter_count(&self) -> usize {
        match &*self.state.lock() {
            FlightState::InFlight { waiters } => waiters.len(),
            FlightState::Idle => 0,
        }
    }

    /// Number of cycles that have started (i.e. how many times `work` actually ran).
    pub fn cycles_started(&self) -> u64 { self.cycles.load(Ordering::SeqCst) }

    pub async fn run<F, Fut>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let joined = {
            let mut st = self.state.lock();
            match &mut *st {
                FlightState::InFlight { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                FlightState::Idle => {
                    *st = FlightState::InFlight { waiters: Vec::new() };
                    None
                }
            }
        };
        if let Some(rx) = joined {
            return rx.await.unwrap_or_else(|_| Err((self.abandoned)()));
        }

        self.cycles.fetch_add(1, Ordering::SeqCst);
        let mut leader = Leader { flight: self, settled: false };
        let outcome = work().await;
        leader.settle(&outcome);
        outcome
    }

    fn take_waiters(&self) -> Vec<Waiter<T, E>> {
        let mut st = self.state.lock();
        match std::mem::replace(&mut *st, FlightState::Idle) {
            FlightState::InFlight { waiters } => waiters,
            FlightState::Idle => Vec::new(),
        }
    }
}

struct Leader<'a, T: Clone, E: Clone> {
    flight: &'a SingleFlight<T, E>,
    settled: bool,
}

impl<T: Clone, E: Clone> Leader<'_, T, E> {
    fn settle(&mut self, outcome: &Result<T, E>) {
        self.settled = true;
        // release in join order; a waiter that went away is skipped
        for tx in self.flight.take_waiters() {
            let _ = tx.send(outcome.clone());
        }
    }
}

impl<T: Clone, E: Clone> Drop for Leader<'_, T, E> {
    fn drop(&mut self) {
        if !self.settled {
            // dropping the senders wakes every waiter with the abandoned outcome
            drop(self.flight.take_waiters());
        }
    }
}
