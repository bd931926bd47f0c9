use std::sync::Mutex;

use tokio::sync::watch;

/// A reusable rendezvous point for a fixed number of participants.
///
/// `arrive_and_wait` blocks until all participants have arrived, then
/// releases every waiter and re-arms for the next cycle. Release and re-arm
/// happen in the same critical section: the generation advances and the
/// arrival count resets before any waiter can observe the release, so a fast
/// participant looping back in can never hit stale state from the previous
/// cycle.
pub struct Rendezvous {
    participants: usize,
    inner: Mutex<Inner>,
    // carries the number of completed generations
    completed_tx: watch::Sender<u64>,
}

struct Inner {
    arrived: usize,
    generation: u64,
}

/// The outcome of one `arrive_and_wait` call.
///
/// Exactly one participant per generation is the leader: the last to arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    pub generation: u64,
    pub is_leader: bool,
}

impl Rendezvous {
    pub fn new(participants: usize) -> Self {
        assert!(participants > 0, "a rendezvous needs at least one participant");

        let (completed_tx, _) = watch::channel(0);
        Self {
            participants,
            inner: Mutex::new(Inner {
                arrived: 0,
                generation: 0,
            }),
            completed_tx,
        }
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    pub async fn arrive_and_wait(&self) -> Arrival {
        let mut completed_rx = self.completed_tx.subscribe();

        let arrival = {
            let mut inner = self.inner.lock().expect("rendezvous lock poisoned");
            let generation = inner.generation;
            inner.arrived += 1;

            if inner.arrived == self.participants {
                // last arrival: release the generation and re-arm while still
                // holding the lock
                inner.arrived = 0;
                inner.generation += 1;
                self.completed_tx.send_replace(inner.generation);
                Arrival {
                    generation,
                    is_leader: true,
                }
            } else {
                Arrival {
                    generation,
                    is_leader: false,
                }
            }
        };

        if !arrival.is_leader {
            completed_rx
                .wait_for(|&completed| completed > arrival.generation)
                .await
                .expect("the sender lives as long as the rendezvous does");
        }

        arrival
    }
}
