//! Singleflight registry: at-most-one concurrent build per key.
//!
//! The first caller for a key becomes the leader and spawns the build; every
//! other caller subscribes to the same flight and receives a clone of the
//! result, success or failure. Waiters are counted: a caller that goes away
//! (request cancelled, deadline elapsed) releases its slot, and when the
//! last slot is released before the build finished, the build is aborted.

use crate::error::CacheError;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

type FlightMap<V> = Arc<Mutex<HashMap<String, Flight<V>>>>;

struct Flight<V: Clone> {
    id: u64,
    tx: broadcast::Sender<Result<V, CacheError>>,
    waiters: Arc<AtomicUsize>,
    abort: Option<AbortHandle>,
}

/// Outcome of joining a key's flight.
pub(crate) enum Join<V: Clone> {
    /// This caller must start the build. Holds the leader's own wait slot
    /// and the token for wiring up the spawned task.
    Leader(Waiter<V>, LeaderToken),
    /// Another caller is already building.
    Waiter(Waiter<V>),
}

/// Identifies the flight a leader is responsible for.
pub(crate) struct LeaderToken {
    pub(crate) key: String,
    pub(crate) flight_id: u64,
}

/// A subscription to a flight's result. Dropping it before the result
/// arrives releases the waiter slot.
pub(crate) struct Waiter<V: Clone> {
    rx: broadcast::Receiver<Result<V, CacheError>>,
    _guard: WaiterGuard<V>,
}

impl<V: Clone + Send + 'static> Waiter<V> {
    /// Waits for the flight's result.
    pub(crate) async fn wait(mut self) -> Result<V, CacheError> {
        match self.rx.recv().await {
            Ok(result) => result,
            // The sender was dropped without a result: the build was
            // aborted after this waiter subscribed.
            Err(_) => Err(CacheError::BuildAbandoned),
        }
    }
}

struct WaiterGuard<V: Clone> {
    flights: FlightMap<V>,
    key: String,
    flight_id: u64,
    waiters: Arc<AtomicUsize>,
}

impl<V: Clone> Drop for WaiterGuard<V> {
    fn drop(&mut self) {
        if self.waiters.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last waiter gone: abort the build if the flight is still live.
            let mut flights = self.flights.lock();
            if let Some(flight) = flights.get(&self.key) {
                if flight.id == self.flight_id {
                    if let Some(abort) = &flight.abort {
                        abort.abort();
                    }
                    flights.remove(&self.key);
                }
            }
        }
    }
}

/// Shared registry of in-flight builds.
pub(crate) struct InFlight<V: Clone> {
    flights: FlightMap<V>,
    next_id: AtomicUsize,
}

impl<V: Clone + Send + 'static> InFlight<V> {
    pub(crate) fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Joins the flight for `key`, creating it if absent.
    pub(crate) fn join(&self, key: &str) -> Join<V> {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(key) {
            flight.waiters.fetch_add(1, Ordering::AcqRel);
            return Join::Waiter(Waiter {
                rx: flight.tx.subscribe(),
                _guard: WaiterGuard {
                    flights: Arc::clone(&self.flights),
                    key: key.to_string(),
                    flight_id: flight.id,
                    waiters: Arc::clone(&flight.waiters),
                },
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as u64;
        let (tx, rx) = broadcast::channel(1);
        let waiters = Arc::new(AtomicUsize::new(1));
        flights.insert(
            key.to_string(),
            Flight {
                id,
                tx,
                waiters: Arc::clone(&waiters),
                abort: None,
            },
        );
        Join::Leader(
            Waiter {
                rx,
                _guard: WaiterGuard {
                    flights: Arc::clone(&self.flights),
                    key: key.to_string(),
                    flight_id: id,
                    waiters,
                },
            },
            LeaderToken {
                key: key.to_string(),
                flight_id: id,
            },
        )
    }

    /// Records the build task's abort handle so the last departing waiter
    /// can cancel it.
    pub(crate) fn set_abort(&self, key: &str, flight_id: u64, abort: AbortHandle) {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get_mut(key) {
            if flight.id == flight_id {
                flight.abort = Some(abort);
            }
        }
    }

    /// Completes the flight, delivering `result` to every waiter. Returns
    /// the number of receivers that will observe it.
    pub(crate) fn complete(&self, token: &LeaderToken, result: Result<V, CacheError>) -> usize {
        let flight = {
            let mut flights = self.flights.lock();
            match flights.get(&token.key) {
                Some(f) if f.id == token.flight_id => flights.remove(&token.key),
                _ => None,
            }
        };
        match flight {
            Some(flight) => flight.tx.send(result).unwrap_or(0),
            None => 0,
        }
    }

    /// Number of keys currently building.
    pub(crate) fn len(&self) -> usize {
        self.flights.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_leader_then_waiters() {
        let inflight: InFlight<u32> = InFlight::new();

        let (leader_waiter, token) = match inflight.join("k") {
            Join::Leader(w, t) => (w, t),
            Join::Waiter(_) => panic!("expected leader"),
        };
        let second = match inflight.join("k") {
            Join::Waiter(w) => w,
            Join::Leader(..) => panic!("expected waiter"),
        };

        assert_eq!(inflight.complete(&token, Ok(7)), 2);
        assert_eq!(leader_waiter.wait().await.unwrap(), 7);
        assert_eq!(second.wait().await.unwrap(), 7);
        assert_eq!(inflight.len(), 0);
    }

    #[tokio::test]
    async fn test_key_free_after_completion() {
        let inflight: InFlight<u32> = InFlight::new();
        let (waiter, token) = match inflight.join("k") {
            Join::Leader(w, t) => (w, t),
            Join::Waiter(_) => panic!("expected leader"),
        };
        inflight.complete(&token, Ok(1));
        waiter.wait().await.unwrap();

        // A later caller starts a fresh flight.
        assert!(matches!(inflight.join("k"), Join::Leader(..)));
    }

    #[tokio::test]
    async fn test_last_waiter_drop_clears_flight() {
        let inflight: InFlight<u32> = InFlight::new();
        let (leader_waiter, token) = match inflight.join("k") {
            Join::Leader(w, t) => (w, t),
            Join::Waiter(_) => panic!("expected leader"),
        };
        // Give the flight a live task to abort.
        let task = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        inflight.set_abort(&token.key, token.flight_id, task.abort_handle());

        drop(leader_waiter);
        assert_eq!(inflight.len(), 0);
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_errors_reach_all_waiters() {
        let inflight: InFlight<u32> = InFlight::new();
        let (leader_waiter, token) = match inflight.join("k") {
            Join::Leader(w, t) => (w, t),
            Join::Waiter(_) => panic!("expected leader"),
        };
        let second = match inflight.join("k") {
            Join::Waiter(w) => w,
            Join::Leader(..) => panic!("expected waiter"),
        };

        let err = CacheError::BuildFailed(Arc::new(xypriss_core::ServerError::new(
            xypriss_core::ErrorKind::CacheBuildFailed,
            "boom",
        )));
        inflight.complete(&token, Err(err));

        assert!(matches!(
            leader_waiter.wait().await,
            Err(CacheError::BuildFailed(_))
        ));
        assert!(matches!(second.wait().await, Err(CacheError::BuildFailed(_))));
    }
}
