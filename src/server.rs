//! The acceptor/supervisor: owns the listening socket, spawns one
//! worker thread per connection, and orchestrates graceful shutdown.

use std::io::ErrorKind;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info};

use crate::coordinator::DrawCoordinator;
use crate::session;

/// How long the accept loop sleeps between polls of the listening
/// socket while no connection is pending. Bounds shutdown latency:
/// `std`'s blocking `accept` cannot be portably cancelled from another
/// thread, so the listener runs non-blocking and is polled instead.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs the accept loop until `running` is cleared, spawning one
/// worker thread per accepted connection and joining them all before
/// returning.
///
/// This is the supervisor's entire public contract: bind happens
/// before this is called (so bind failures surface to the caller
/// immediately), and the listening socket is dropped — closing it —
/// when this function returns.
pub fn run(
    listener: TcpListener,
    coordinator: Arc<DrawCoordinator>,
    running: Arc<AtomicBool>,
) -> std::io::Result<()> {
    listener.set_nonblocking(true)?;

    // Each live worker is tracked alongside a cloned handle to its
    // client socket — a second file descriptor onto the same kernel
    // socket. A worker's own blocking `recv` cannot be cancelled from
    // here directly, but calling `shutdown` on this clone forces that
    // blocking read to return immediately (as a clean close), exactly
    // like the listening socket being closed unblocks `accept`. This
    // is what bounds shutdown latency even for a worker idling between
    // messages with nothing left to read.
    let mut workers: Vec<(JoinHandle<()>, TcpStream)> = Vec::new();

    while running.load(Ordering::SeqCst) {
        info!("action: accept_connections | result: in_progress");
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("action: accept_connections | result: success | ip: {}", addr.ip());
                match stream.try_clone() {
                    Ok(shutdown_handle) => {
                        let coordinator = Arc::clone(&coordinator);
                        let running = Arc::clone(&running);
                        let handle = thread::spawn(move || {
                            session::handle_connection(stream, coordinator, running);
                        });
                        workers.push((handle, shutdown_handle));
                    }
                    Err(e) => {
                        error!("action: accept_connections | result: fail | error: {e}");
                    }
                }
                workers.retain(|(h, _)| !h.is_finished());
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                error!("action: accept_connections | result: fail | error: {e}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }

    info!("action: server_graceful_shutdown | result: in_progress");
    coordinator.shutdown();
    for (handle, shutdown_handle) in workers {
        let _ = shutdown_handle.shutdown(Shutdown::Both);
        let _ = handle.join();
    }
    info!("action: server_graceful_shutdown | result: success");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bet::Bet;
    use crate::error::StoreError;
    use crate::framing;
    use crate::store::BetStore;
    use std::net::TcpStream;
    use std::sync::Mutex;

    struct InMemoryStore {
        bets: Mutex<Vec<Bet>>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            InMemoryStore {
                bets: Mutex::new(Vec::new()),
            }
        }
    }

    impl BetStore for InMemoryStore {
        fn append(&self, batch: &[Bet]) -> Result<(), StoreError> {
            self.bets.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }

        fn load_all(&self) -> Result<Vec<Bet>, StoreError> {
            Ok(self.bets.lock().unwrap().clone())
        }
    }

    #[test]
    fn accepts_a_connection_and_shuts_down_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(DrawCoordinator::new(1, 4242, store));
        let running = Arc::new(AtomicBool::new(true));

        let running_for_server = Arc::clone(&running);
        let server = thread::spawn(move || run(listener, coordinator, running_for_server));

        let mut client = TcpStream::connect(addr).unwrap();
        framing::send(&mut client, b"1|Juan|Perez|30123456|1990-05-01|4242\n").unwrap();
        let reply = framing::recv(&client).unwrap();
        assert_eq!(reply, b"BATCH_RECEIVED\n");
        drop(client);

        running.store(false, Ordering::SeqCst);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn shutdown_bounded_even_with_no_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(DrawCoordinator::new(1, 4242, store));
        let running = Arc::new(AtomicBool::new(true));

        let running_for_server = Arc::clone(&running);
        let server = thread::spawn(move || run(listener, coordinator, running_for_server));

        thread::sleep(Duration::from_millis(10));
        running.store(false, Ordering::SeqCst);

        let start = std::time::Instant::now();
        server.join().unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn shutdown_bounded_with_a_worker_idling_mid_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(DrawCoordinator::new(1, 4242, store));
        let running = Arc::new(AtomicBool::new(true));

        let running_for_server = Arc::clone(&running);
        let server = thread::spawn(move || run(listener, coordinator, running_for_server));

        // Connect but never send a FINISHED or close — the worker sits
        // blocked in `framing::recv` with nothing left to read.
        let client = TcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(50));

        running.store(false, Ordering::SeqCst);
        let start = std::time::Instant::now();
        server.join().unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));

        drop(client);
    }
}
