/// One-shot startup barrier
///
/// Each party holds exactly one ticket. Arriving consumes the ticket, so the
/// barrier cannot be re-armed or crossed twice by the same party. It opens
/// once every ticket has arrived; a dropped ticket never arrives.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

struct Shared {
    parties: usize,
    remaining: AtomicUsize,
    released: watch::Sender<bool>,
}

pub struct StartupBarrier;

impl StartupBarrier {
    /// Create a barrier for `parties` participants and return their tickets
    pub fn with_parties(parties: usize) -> Vec<BarrierTicket> {
        let (released, _) = watch::channel(parties == 0);
        let shared = Arc::new(Shared {
            parties,
            remaining: AtomicUsize::new(parties),
            released,
        });

        (0..parties)
            .map(|_| BarrierTicket {
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// Single-use right to arrive at a [`StartupBarrier`]
pub struct BarrierTicket {
    shared: Arc<Shared>,
}

impl BarrierTicket {
    /// Record arrival without blocking
    pub fn arrive(self) -> BarrierWaiter {
        // Subscribe before counting down so the release is never missed
        let receiver = self.shared.released.subscribe();
        let before = self.shared.remaining.fetch_sub(1, Ordering::AcqRel);
        debug!(
            "Barrier arrival {}/{}",
            self.shared.parties - (before - 1),
            self.shared.parties
        );

        if before == 1 {
            self.shared.released.send_replace(true);
        }

        BarrierWaiter {
            receiver,
            shared: self.shared,
        }
    }

    /// Arrive and block until every party has arrived
    pub async fn arrive_and_wait(self) {
        self.arrive().wait().await;
    }
}

/// Handle for waiting on the barrier after arriving
pub struct BarrierWaiter {
    receiver: watch::Receiver<bool>,
    // Keeps the sender alive once every other ticket is gone
    shared: Arc<Shared>,
}

impl BarrierWaiter {
    /// Parties that have not arrived yet
    pub fn pending(&self) -> usize {
        self.shared.remaining.load(Ordering::Acquire)
    }

    /// Wait until the barrier opens; cancel-safe
    pub async fn wait(&mut self) {
        if self.receiver.wait_for(|released| *released).await.is_err() {
            // A closed channel is not a release
            std::future::pending::<()>().await;
        }
    }
}
