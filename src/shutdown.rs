//! SIGTERM handling via the signal-to-pipe pattern.
//!
//! A real Unix signal handler may only call async-signal-safe
//! functions — it cannot flip a mutex-guarded set or close a socket.
//! `signal_hook::iterator::Signals` internally uses a self-pipe to
//! move the actual signal delivery off the signal handler and onto an
//! ordinary thread, which is what this module spawns: it blocks on
//! `Signals::forever()` and performs the real teardown once `SIGTERM`
//! arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::info;
use signal_hook::consts::signal::SIGTERM;
use signal_hook::iterator::Signals;

use crate::coordinator::DrawCoordinator;

/// Spawns the dedicated shutdown thread.
///
/// On `SIGTERM`, clears `running` (observed by the acceptor's poll
/// loop between connections) and tears down the coordinator's barrier
/// (releasing any worker blocked in `record_finish`). Returns the
/// thread's `JoinHandle`; the thread exits once the signal iterator
/// yields, which happens once per received signal, so this handle is
/// normally left detached for the process lifetime.
pub fn spawn(
    running: Arc<AtomicBool>,
    coordinator: Arc<DrawCoordinator>,
) -> std::io::Result<JoinHandle<()>> {
    let mut signals = Signals::new([SIGTERM])?;
    Ok(thread::spawn(move || {
        for _ in signals.forever() {
            info!("action: server_graceful_shutdown | result: in_progress");
            running.store(false, Ordering::SeqCst);
            coordinator.shutdown();
            // Only the first SIGTERM needs to do anything; keep
            // draining the iterator so repeated signals don't pile up
            // as a pending notification.
        }
    }))
}
