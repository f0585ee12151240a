//! The per-connection session state machine.
//!
//! A session owns its client socket for the connection's entire
//! lifetime and may process many bet batches before the terminating
//! `FINISHED` / `REQUEST_WINNERS` control messages.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};

use crate::coordinator::{DrawCoordinator, FinishOutcome};
use crate::error::{FrameError, ProtocolError};
use crate::framing;
use crate::protocol::{self, Request, Response};

/// Runs the session state machine for one accepted connection until it
/// reaches a terminal state, then closes the socket.
///
/// Terminal states: the peer closed or erred, a protocol-level error
/// on a control message, `REQUEST_WINNERS` was answered, or the
/// server is shutting down.
pub fn handle_connection(mut stream: TcpStream, coordinator: Arc<DrawCoordinator>, running: Arc<AtomicBool>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("action: client_connection | result: success | ip: {peer}");

    loop {
        let payload = match framing::recv(&stream) {
            Ok(payload) => payload,
            Err(FrameError::Closed) => break,
            Err(e) => {
                warn!("action: receive_message | result: fail | error: {e}");
                break;
            }
        };

        let request = match protocol::parse_request(&payload) {
            Ok(request) => request,
            Err(e) => {
                // Only a non-UTF-8 payload fails classification itself;
                // there is no salvageable request to dispatch.
                error!("action: parse_message | result: fail | error: {e}");
                break;
            }
        };

        match request {
            Request::BetBatch(records) => {
                if !handle_bet_batch(&mut stream, &coordinator, &running, records) {
                    break;
                }
            }
            Request::Finished(agency) => {
                if !handle_finished(&mut stream, &coordinator, agency) {
                    break;
                }
            }
            Request::RequestWinners(agency) => {
                handle_request_winners(&mut stream, &coordinator, agency);
                break;
            }
        }
    }

    let _ = stream.shutdown(std::net::Shutdown::Both);
}

/// Stores every record in the batch, tolerating per-record failures —
/// a malformed line (wrong field count) and a validation failure
/// (e.g. an empty field) are both just a failed record, same as a
/// storage error — and replies `BATCH_RECEIVED`/`BATCH_FAILED`.
/// Returns `false` if the session should terminate (shutdown observed,
/// or the reply couldn't be sent).
fn handle_bet_batch(
    stream: &mut TcpStream,
    coordinator: &DrawCoordinator,
    running: &AtomicBool,
    records: Vec<Result<protocol::RawBetRecord, ProtocolError>>,
) -> bool {
    let mut success = 0usize;
    let mut failed = 0usize;

    for record in records {
        if !running.load(Ordering::SeqCst) {
            // Shutdown observed mid-batch: exit silently, no response.
            return false;
        }

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                error!("action: apuesta_almacenada | result: fail | error: {e}");
                failed += 1;
                continue;
            }
        };

        match record.validate() {
            Ok(bet) => match coordinator.append_batch(std::slice::from_ref(&bet)) {
                Ok(()) => {
                    info!(
                        "action: apuesta_almacenada | result: success | dni: {} | numero: {}",
                        bet.document, bet.number
                    );
                    success += 1;
                }
                Err(e) => {
                    error!("action: apuesta_almacenada | result: fail | error: {e}");
                    failed += 1;
                }
            },
            Err(e) => {
                error!("action: apuesta_almacenada | result: fail | error: {e}");
                failed += 1;
            }
        }
    }

    if failed == 0 {
        info!("action: apuesta_recibida | result: success | cantidad: {success}");
    } else {
        warn!("action: apuesta_rechazada | result: fail | cantidad: {failed}");
    }

    let response = if failed == 0 {
        Response::BatchReceived
    } else {
        Response::BatchFailed
    };
    send_response(stream, &response)
}

/// Invokes the coordinator and replies `FINISHED RECEIVE`, or exits
/// silently if the coordinator was torn down mid-wait. Returns `false`
/// if the session should terminate.
fn handle_finished(stream: &mut TcpStream, coordinator: &DrawCoordinator, agency: u32) -> bool {
    match coordinator.record_finish(agency) {
        FinishOutcome::Finished => send_response(stream, &Response::FinishedReceive),
        FinishOutcome::ShutDown => false,
    }
}

/// Computes and sends the winners response, then the connection ends
/// regardless of send success (this is always a terminal step).
fn handle_request_winners(stream: &mut TcpStream, coordinator: &DrawCoordinator, agency: u32) {
    let winners = coordinator.winners_for(agency);
    let _ = send_response(stream, &Response::Winners(winners));
}

fn send_response(stream: &mut TcpStream, response: &Response) -> bool {
    let line = response.to_line();
    match framing::send(&mut *stream, line.as_bytes()) {
        Ok(()) => true,
        Err(e) => {
            error!("action: send_message | result: fail | error: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bet::Bet;
    use crate::error::StoreError;
    use crate::store::BetStore;
    use std::net::{TcpListener, TcpStream};
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

    fn local_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn single_valid_bet_gets_batch_received() {
        let (mut client, server) = local_pair();
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(DrawCoordinator::new(1, 4242, store.clone()));
        let running = Arc::new(AtomicBool::new(true));

        let worker = std::thread::spawn(move || {
            handle_connection(server, coordinator, running);
        });

        framing::send(&mut client, b"1|Juan|Perez|30123456|1990-05-01|4242\n").unwrap();
        let reply = framing::recv(&client).unwrap();
        assert_eq!(reply, b"BATCH_RECEIVED\n");

        drop(client);
        worker.join().unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn mixed_batch_gets_batch_failed_but_stores_valid_records() {
        let (mut client, server) = local_pair();
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(DrawCoordinator::new(1, 4242, store.clone()));
        let running = Arc::new(AtomicBool::new(true));

        let worker = std::thread::spawn(move || {
            handle_connection(server, coordinator, running);
        });

        let payload = b"1|A|B|11111111|2000-01-01|1\n1|C|D||2000-01-01|2\n1|E|F|33333333|2000-01-01|3\n";
        framing::send(&mut client, payload).unwrap();
        let reply = framing::recv(&client).unwrap();
        assert_eq!(reply, b"BATCH_FAILED\n");

        drop(client);
        worker.join().unwrap();
        assert_eq!(store.load_all().unwrap().len(), 2);
    }

    #[test]
    fn wrong_field_count_mid_batch_fails_only_that_record() {
        let (mut client, server) = local_pair();
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(DrawCoordinator::new(1, 4242, store.clone()));
        let running = Arc::new(AtomicBool::new(true));

        let worker = std::thread::spawn(move || {
            handle_connection(server, coordinator, running);
        });

        let payload =
            b"1|A|B|11111111|2000-01-01|1\n1|bad|fieldcount\n1|C|D|22222222|2000-01-01|2\n";
        framing::send(&mut client, payload).unwrap();
        let reply = framing::recv(&client).unwrap();
        assert_eq!(reply, b"BATCH_FAILED\n");

        drop(client);
        worker.join().unwrap();
        // The two well-formed records on either side of the bad line
        // still get stored; only the malformed one is dropped.
        assert_eq!(store.load_all().unwrap().len(), 2);
    }

    #[test]
    fn request_winners_before_quorum_returns_empty() {
        let (mut client, server) = local_pair();
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(DrawCoordinator::new(3, 4242, store));
        let running = Arc::new(AtomicBool::new(true));

        let worker = std::thread::spawn(move || {
            handle_connection(server, coordinator, running);
        });

        framing::send(&mut client, b"2|REQUEST_WINNERS\n").unwrap();
        let reply = framing::recv(&client).unwrap();
        assert_eq!(reply, b"WINNERS:\n");

        worker.join().unwrap();
    }

    #[test]
    fn shutdown_mid_batch_sends_no_response() {
        let (mut client, server) = local_pair();
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(DrawCoordinator::new(1, 4242, store.clone()));
        let running = Arc::new(AtomicBool::new(false));

        let worker = std::thread::spawn(move || {
            handle_connection(server, coordinator, running);
        });

        framing::send(
            &mut client,
            b"1|A|B|11111111|2000-01-01|1\n1|C|D|22222222|2000-01-01|2\n",
        )
        .unwrap();

        worker.join().unwrap();

        // The worker exited silently: the socket closed with nothing
        // written, so the client's next read observes a clean close
        // rather than a response line.
        let err = framing::recv(&client).unwrap_err();
        assert!(matches!(err, FrameError::Closed));
        assert_eq!(store.load_all().unwrap().len(), 0);
    }

    #[test]
    fn full_draw_then_request_winners() {
        let store = Arc::new(InMemoryStore::new());
        store
            .append(&[Bet::new("1", "A", "B", "doc-a", "2000-01-01", "4242").unwrap()])
            .unwrap();
        let coordinator = Arc::new(DrawCoordinator::new(2, 4242, store));
        let running = Arc::new(AtomicBool::new(true));

        let (mut client1, server1) = local_pair();
        let (mut client2, server2) = local_pair();

        let worker1 = {
            let coordinator = Arc::clone(&coordinator);
            let running = Arc::clone(&running);
            std::thread::spawn(move || handle_connection(server1, coordinator, running))
        };
        let worker2 = {
            let coordinator = Arc::clone(&coordinator);
            let running = Arc::clone(&running);
            std::thread::spawn(move || handle_connection(server2, coordinator, running))
        };

        let finisher1 = std::thread::spawn(move || {
            framing::send(&mut client1, b"1|FINISHED\n").unwrap();
            let reply = framing::recv(&client1).unwrap();
            assert_eq!(reply, b"FINISHED RECEIVE\n");
            client1
        });

        std::thread::sleep(std::time::Duration::from_millis(20));

        framing::send(&mut client2, b"2|FINISHED\n").unwrap();
        let reply = framing::recv(&client2).unwrap();
        assert_eq!(reply, b"FINISHED RECEIVE\n");

        let mut client1 = finisher1.join().unwrap();
        framing::send(&mut client1, b"1|REQUEST_WINNERS\n").unwrap();
        let reply = framing::recv(&client1).unwrap();
        assert_eq!(reply, b"WINNERS:doc-a\n");

        worker1.join().unwrap();
        worker2.join().unwrap();
    }
}
