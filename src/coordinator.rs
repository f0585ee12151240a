//! Cross-session coordination: the shared state every worker thread
//! touches, and the draw-once invariant built on top of it.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

use log::info;

use crate::bet::{AgencyId, Bet};
use crate::error::StoreError;
use crate::store::{has_won, BetStore};

/// Outcome of processing a `FINISHED` control message.
#[derive(Debug, PartialEq, Eq)]
pub enum FinishOutcome {
    /// This call (or an earlier one for the same agency) has been
    /// accounted for; the caller may respond `FINISHED RECEIVE`.
    Finished,
    /// The coordinator was torn down (server shutting down) while this
    /// call was waiting at the barrier; the caller must exit silently.
    ShutDown,
}

/// A single-use, N-party rendezvous that can be torn down early.
///
/// `std::sync::Barrier` has no way to abort a pending `wait`, which
/// would deadlock shutdown if fewer than N agencies ever finish.
/// This wraps a condvar so the shutdown path can wake every waiter
/// with a cancellation outcome instead.
struct ShutdownBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    condvar: Condvar,
}

struct BarrierState {
    arrived: usize,
    generation: u64,
    torn_down: bool,
}

enum BarrierOutcome {
    Released,
    ShutDown,
}

impl ShutdownBarrier {
    fn new(parties: usize) -> Self {
        ShutdownBarrier {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                torn_down: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until `parties` callers have all called `wait`, or until
    /// [`ShutdownBarrier::shutdown`] is called, whichever comes first.
    fn wait(&self) -> BarrierOutcome {
        let mut state = self.state.lock().unwrap();
        if state.torn_down {
            return BarrierOutcome::ShutDown;
        }

        let my_generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.condvar.notify_all();
            return BarrierOutcome::Released;
        }

        while state.generation == my_generation && !state.torn_down {
            state = self.condvar.wait(state).unwrap();
        }

        if state.torn_down {
            BarrierOutcome::ShutDown
        } else {
            BarrierOutcome::Released
        }
    }

    /// Wakes every pending and future `wait` with [`BarrierOutcome::ShutDown`].
    fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.torn_down = true;
        self.condvar.notify_all();
    }
}

/// Process-wide shared state and operations coordinating the draw
/// across all session handlers.
pub struct DrawCoordinator {
    agencies: usize,
    winning_number: i64,
    store: Arc<dyn BetStore>,
    finished: Mutex<HashSet<AgencyId>>,
    bets_table: Mutex<Vec<Bet>>,
    file_lock: Mutex<()>,
    barrier: ShutdownBarrier,
}

impl DrawCoordinator {
    /// Builds a coordinator for `agencies` parties, backed by `store`,
    /// using `winning_number` as the winner predicate's parameter.
    pub fn new(agencies: usize, winning_number: i64, store: Arc<dyn BetStore>) -> Self {
        DrawCoordinator {
            agencies,
            winning_number,
            store,
            finished: Mutex::new(HashSet::new()),
            bets_table: Mutex::new(Vec::new()),
            file_lock: Mutex::new(()),
            barrier: ShutdownBarrier::new(agencies),
        }
    }

    /// Appends `batch` to the backing store, serialized by `FileLock`.
    /// Never held across network I/O — the mutex guards only the call
    /// into the store.
    pub fn append_batch(&self, batch: &[Bet]) -> Result<(), StoreError> {
        let _guard = self.file_lock.lock().unwrap();
        self.store.append(batch)
    }

    /// Records that `agency` has declared itself finished.
    ///
    /// Duplicate `FINISHED` messages from an agency already recorded
    /// are counted by distinct identity (not by message count, see
    /// DESIGN.md Open Question 1): a duplicate is a no-op that
    /// immediately returns [`FinishOutcome::Finished`] without
    /// entering the barrier a second time, since the barrier has
    /// exactly `agencies` parties, one per distinct agency.
    pub fn record_finish(&self, agency: AgencyId) -> FinishOutcome {
        let is_new = {
            let mut finished = self.finished.lock().unwrap();
            if finished.contains(&agency) {
                false
            } else {
                let about_to_complete = finished.len() + 1 == self.agencies;
                finished.insert(agency);
                if about_to_complete {
                    self.materialize_bets_table();
                }
                true
            }
        };

        if !is_new {
            return FinishOutcome::Finished;
        }

        match self.barrier.wait() {
            BarrierOutcome::Released => FinishOutcome::Finished,
            BarrierOutcome::ShutDown => FinishOutcome::ShutDown,
        }
    }

    /// Loads every persisted bet into the shared table. Called exactly
    /// once, by the handler that observes the Nth distinct agency
    /// finish. Any load failure leaves the table empty and is logged;
    /// the draw proceeds (conservatively, winners will come back empty
    /// rather than the draw wedging the barrier).
    fn materialize_bets_table(&self) {
        match self.store.load_all() {
            Ok(bets) => {
                let mut table = self.bets_table.lock().unwrap();
                *table = bets;
                info!("action: sorteo | result: success");
            }
            Err(e) => {
                log::error!("action: sorteo | result: fail | error: {e}");
            }
        }
    }

    /// Returns the documents of every winning bet belonging to
    /// `agency`, in table (i.e. `load_all`) order.
    pub fn winners_for(&self, agency: AgencyId) -> Vec<String> {
        let table = self.bets_table.lock().unwrap();
        table
            .iter()
            .filter(|bet| bet.agency == agency && has_won(bet, self.winning_number))
            .map(|bet| bet.document.clone())
            .collect()
    }

    /// Tears down the rendezvous barrier, releasing any worker blocked
    /// in [`DrawCoordinator::record_finish`] with
    /// [`FinishOutcome::ShutDown`]. Called once, from the shutdown
    /// path, before workers are joined.
    pub fn shutdown(&self) {
        self.barrier.shutdown();
    }
}
