//! Background turn writer.
//!
//! One writer task per session drains an unbounded queue into the memory store, so
//! turns reach the store in the order they happened and the conversation never waits
//! on the network. Failed appends are logged and counted, never retried.
//!
//! A user turn is held until the agent replies, and the pair is stored as one exchange.
//! A second user turn, or closing the session, sends a held turn on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::memory::{KwamiId, Role, SharedStore, Turn};

/// Delivery counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub queued: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DeliveryStats {
    /// Turns neither delivered nor failed yet.
    pub fn pending(&self) -> u64 {
        self.queued.saturating_sub(self.delivered + self.failed)
    }
}

/// How the writer ended when its session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Every queued turn was attempted within the grace period
    Flushed(DeliveryStats),
    /// The grace period ran out; remaining turns were dropped
    Abandoned(DeliveryStats),
}

impl FlushOutcome {
    pub fn stats(&self) -> DeliveryStats {
        match self {
            Self::Flushed(s) | Self::Abandoned(s) => *s,
        }
    }
}

/// Handle to a session's writer task.
pub struct TurnWriter {
    tx: mpsc::UnboundedSender<Turn>,
    handle: JoinHandle<()>,
    stats: watch::Receiver<DeliveryStats>,
    queued: AtomicU64,
}

impl TurnWriter {
    /// Spawn the writer task for one session.
    ///
    /// The task first makes sure the session exists on the store, then appends turns
    /// as they arrive.
    pub fn spawn(store: SharedStore, kwami_id: KwamiId, session_id: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stats_tx, stats) = watch::channel(DeliveryStats::default());
        let handle = tokio::spawn(run(store, kwami_id, session_id, rx, stats_tx));

        Self {
            tx,
            handle,
            stats,
            queued: AtomicU64::new(0),
        }
    }

    /// Queue a turn for delivery. Never blocks.
    pub fn enqueue(&self, turn: Turn) -> bool {
        match self.tx.send(turn) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(_) => {
                tracing::warn!("Turn writer already stopped, dropping turn");
                false
            }
        }
    }

    /// Current delivery counters.
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            queued: self.queued.load(Ordering::SeqCst),
            ..*self.stats.borrow()
        }
    }

    /// Watch delivery progress.
    pub fn subscribe(&self) -> watch::Receiver<DeliveryStats> {
        self.stats.clone()
    }

    /// Stop accepting turns and give queued ones `grace` to flush.
    pub async fn close(self, grace: Duration) -> FlushOutcome {
        let Self {
            tx,
            mut handle,
            stats,
            queued,
        } = self;
        // Closing the channel lets the task finish once the queue is drained
        drop(tx);

        let finished = match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!("Turn writer task failed: {}", e);
                false
            }
            Err(_) => {
                handle.abort();
                false
            }
        };

        let stats = DeliveryStats {
            queued: queued.load(Ordering::SeqCst),
            ..*stats.borrow()
        };

        if finished {
            FlushOutcome::Flushed(stats)
        } else {
            tracing::warn!(
                "Abandoned {} unsent turns after {:?} grace period",
                stats.pending(),
                grace
            );
            FlushOutcome::Abandoned(stats)
        }
    }
}

async fn run(
    store: SharedStore,
    kwami_id: KwamiId,
    session_id: String,
    mut rx: mpsc::UnboundedReceiver<Turn>,
    stats_tx: watch::Sender<DeliveryStats>,
) {
    if let Err(e) = store.ensure_session(&kwami_id, &session_id).await {
        // Appends may still succeed if the thread already exists
        tracing::warn!("Could not prepare memory session {}: {}", session_id, e);
    }

    let mut held: Option<Turn> = None;

    while let Some(turn) = rx.recv().await {
        match turn.role {
            Role::User => {
                if let Some(prev) = held.replace(turn) {
                    deliver(&store, &kwami_id, &session_id, vec![prev], &stats_tx).await;
                }
            }
            Role::Agent => {
                let batch = match held.take() {
                    Some(user) => vec![user, turn],
                    None => vec![turn],
                };
                deliver(&store, &kwami_id, &session_id, batch, &stats_tx).await;
            }
        }
    }

    if let Some(user) = held {
        deliver(&store, &kwami_id, &session_id, vec![user], &stats_tx).await;
    }
}

async fn deliver(
    store: &SharedStore,
    kwami_id: &KwamiId,
    session_id: &str,
    turns: Vec<Turn>,
    stats_tx: &watch::Sender<DeliveryStats>,
) {
    let count = turns.len() as u64;
    let first = turns.first().map(|t| t.seq).unwrap_or_default();

    let result = match turns.as_slice() {
        [single] => store.append_turn(kwami_id, session_id, single).await,
        _ => store.append_exchange(kwami_id, session_id, &turns).await,
    };

    match result {
        Ok(()) => {
            stats_tx.send_modify(|s| s.delivered += count);
            tracing::debug!(
                "Stored {} turn(s) from {} of session {}",
                count,
                first,
                session_id
            );
        }
        Err(e) => {
            stats_tx.send_modify(|s| s.failed += count);
            tracing::warn!(
                "Failed to store {} turn(s) from {} of session {}: {}",
                count,
                first,
                session_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_turns_flush_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let id = KwamiId::new("k1");
        let writer = TurnWriter::spawn(store.clone(), id.clone(), "s1".to_string());

        for seq in 0..20 {
            assert!(writer.enqueue(Turn::new(seq, Role::User, format!("t{}", seq))));
        }

        let outcome = writer.close(Duration::from_secs(1)).await;
        assert_eq!(
            outcome,
            FlushOutcome::Flushed(DeliveryStats {
                queued: 20,
                delivered: 20,
                failed: 0
            })
        );

        let seqs: Vec<u64> = store
            .session_turns(&id, "s1")
            .await
            .iter()
            .map(|t| t.seq)
            .collect();
        assert_eq!(seqs, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_appends_are_counted() {
        let store = Arc::new(InMemoryStore::new());
        store.set_unavailable(true);
        let writer = TurnWriter::spawn(store, KwamiId::new("k1"), "s1".to_string());
        writer.enqueue(Turn::new(0, Role::User, "hello"));
        writer.enqueue(Turn::new(1, Role::Agent, "hi"));

        let stats = writer.close(Duration::from_secs(1)).await.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_slow_store_is_abandoned_after_grace() {
        let store =
            Arc::new(InMemoryStore::new().with_append_delay(Duration::from_millis(200)));
        let writer = TurnWriter::spawn(store, KwamiId::new("k1"), "s1".to_string());
        for seq in 0..10 {
            writer.enqueue(Turn::new(seq, Role::User, "x"));
        }

        let started = std::time::Instant::now();
        let outcome = writer.close(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_millis(500));
        match outcome {
            FlushOutcome::Abandoned(stats) => assert!(stats.pending() > 0),
            other => panic!("expected abandonment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_observes_progress() {
        let store = Arc::new(InMemoryStore::new());
        let writer = TurnWriter::spawn(store, KwamiId::new("k1"), "s1".to_string());
        let mut progress = writer.subscribe();
        writer.enqueue(Turn::new(0, Role::User, "hello"));
        writer.enqueue(Turn::new(1, Role::Agent, "hi there"));

        tokio::time::timeout(Duration::from_secs(1), async {
            while progress.borrow().delivered < 2 {
                progress.changed().await.unwrap();
            }
        })
        .await
        .expect("delivery should be observed");
        assert_eq!(writer.stats().delivered, 2);
    }

    #[tokio::test]
    async fn test_user_turn_waits_for_reply() {
        let store = Arc::new(InMemoryStore::new());
        let id = KwamiId::new("k1");
        let writer = TurnWriter::spawn(store.clone(), id.clone(), "s1".to_string());
        writer.enqueue(Turn::new(0, Role::User, "hello"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.session_turns(&id, "s1").await.is_empty());
        assert_eq!(writer.stats().pending(), 1);

        writer.enqueue(Turn::new(1, Role::Agent, "hi there"));
        writer.close(Duration::from_secs(1)).await;
        assert_eq!(store.session_turns(&id, "s1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_exchanges_are_paired() {
        let store = Arc::new(InMemoryStore::new());
        let id = KwamiId::new("k1");
        let writer = TurnWriter::spawn(store.clone(), id.clone(), "s1".to_string());

        writer.enqueue(Turn::new(0, Role::User, "my name is Alex"));
        writer.enqueue(Turn::new(1, Role::Agent, "Nice to meet you, Alex"));
        // Unanswered user turn goes out alone once the user speaks again
        writer.enqueue(Turn::new(2, Role::User, "are you there?"));
        writer.enqueue(Turn::new(3, Role::User, "hello?"));
        writer.enqueue(Turn::new(4, Role::Agent, "Yes, sorry!"));

        let outcome = writer.close(Duration::from_secs(1)).await;
        assert_eq!(outcome.stats().delivered, 5);
        // ensure_session, exchange, lone user turn, exchange
        assert_eq!(store.call_count(), 4);

        let seqs: Vec<u64> = store
            .session_turns(&id, "s1")
            .await
            .iter()
            .map(|t| t.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_held_turn_flushes_on_close() {
        let store = Arc::new(InMemoryStore::new());
        let id = KwamiId::new("k1");
        let writer = TurnWriter::spawn(store.clone(), id.clone(), "s1".to_string());
        writer.enqueue(Turn::new(0, Role::User, "goodbye"));

        let outcome = writer.close(Duration::from_secs(1)).await;
        assert_eq!(outcome.stats().delivered, 1);
        assert_eq!(store.session_turns(&id, "s1").await[0].text, "goodbye");
    }
}
