use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::watch;

use crate::{barrier::Rendezvous, protocol::bet::Bet, store::Store};

/// The winning predicate. Treated as a black-box business rule; today it is a
/// straight number match.
pub const WINNING_NUMBER: u32 = 7574;

pub fn has_won(bet: &Bet) -> bool {
    bet.number == WINNING_NUMBER
}

/// Winning documents grouped by agency, in store read order.
pub type WinnerSet = HashMap<u8, Vec<u32>>;

pub fn compute_winners<'a>(bets: impl IntoIterator<Item = &'a Bet>) -> WinnerSet {
    let mut winners = WinnerSet::new();
    for bet in bets {
        if has_won(bet) {
            winners.entry(bet.agency).or_default().push(bet.document);
        }
    }
    winners
}

/// Gates the draw behind the rendezvous and fans the one computed winner set
/// back out to every participant.
///
/// All participants of a cycle arrive at the barrier; the leader (the last
/// arrival) scans the store, computes winners exactly once and stores them in
/// a slot keyed by the cycle's generation; everyone, leader included, takes
/// its agency's documents from the slot matching its own generation, so a
/// slow waiter can never pick up a later cycle's publication. A slot is
/// pruned once every participant has read it. Because the barrier releases
/// only after the last ingestion finished, the store is quiescent for the
/// scan.
pub struct DrawGate {
    rendezvous: Rendezvous,
    store: Store,
    results: Mutex<HashMap<u64, ResultSlot>>,
    // carries the number of completed draws
    completed_tx: watch::Sender<u64>,
}

struct ResultSlot {
    winners: Arc<WinnerSet>,
    handed_out: usize,
}

impl DrawGate {
    pub fn new(participants: usize, store: Store) -> Self {
        let (completed_tx, _) = watch::channel(0);
        Self {
            rendezvous: Rendezvous::new(participants),
            store,
            results: Mutex::new(HashMap::new()),
            completed_tx,
        }
    }

    /// Blocks until every participant of the current cycle has arrived, then
    /// returns this agency's winning documents.
    pub async fn await_draw(&self, agency: u8) -> Vec<u32> {
        let mut completed_rx = self.completed_tx.subscribe();
        let arrival = self.rendezvous.arrive_and_wait().await;

        if arrival.is_leader {
            let winners = match self.store.read_all() {
                Ok(bets) => compute_winners(&bets),
                Err(err) => {
                    // publish an empty set rather than leave the siblings
                    // waiting forever
                    tracing::error!(error = %err, "draw aborted: store scan failed");
                    WinnerSet::new()
                }
            };
            tracing::info!(
                generation = arrival.generation,
                winners = winners.values().map(Vec::len).sum::<usize>(),
                "draw complete"
            );

            // the slot must be in place before waiters are woken
            self.results
                .lock()
                .expect("draw results lock poisoned")
                .insert(
                    arrival.generation,
                    ResultSlot {
                        winners: Arc::new(winners),
                        handed_out: 0,
                    },
                );
            self.completed_tx.send_replace(arrival.generation + 1);
        }

        completed_rx
            .wait_for(|&completed| completed > arrival.generation)
            .await
            .expect("the sender lives as long as the gate does");

        let winners = {
            let mut results = self.results.lock().expect("draw results lock poisoned");
            let slot = results
                .get_mut(&arrival.generation)
                .expect("a generation's slot is pruned only after every participant has read it");
            slot.handed_out += 1;
            let winners = slot.winners.clone();
            if slot.handed_out == self.rendezvous.participants() {
                results.remove(&arrival.generation);
            }
            winners
        };

        winners.get(&agency).cloned().unwrap_or_default()
    }
}
