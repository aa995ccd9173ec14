//! Realtime WebSocket bus (C7, §4.6). Every engine event is assigned a
//! monotonic sequence number and pushed onto a bounded ring buffer before
//! fanning out live; a reconnecting client sends its last-seen `seq` and
//! gets the buffered tail replayed, so a brief disconnect never loses
//! events. A connection that can't keep up with the live stream is dropped
//! rather than allowed to buffer unboundedly.

pub mod events;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, Mutex};

use crate::engine::messages::EngineEvent;
use events::Envelope;

/// Replay ring buffer size. A reconnect further behind than this falls back
/// to a full `state_snapshot` instead of incremental replay.
pub const RING_CAPACITY: usize = 1024;

pub struct RealtimeHub {
    ring: Mutex<VecDeque<Envelope>>,
    seq: AtomicU64,
    live: broadcast::Sender<Envelope>,
}

impl RealtimeHub {
    /// Spawns the bridge task that drains `engine_events` into the hub,
    /// returning a handle shared between the bridge and every WS connection.
    pub fn spawn_bridge(mut engine_events: broadcast::Receiver<EngineEvent>) -> Arc<Self> {
        let (live, _rx) = broadcast::channel(RING_CAPACITY);
        let hub = Arc::new(RealtimeHub {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            seq: AtomicU64::new(0),
            live,
        });
        let bridge_hub = hub.clone();
        tokio::spawn(async move {
            loop {
                match engine_events.recv().await {
                    Ok(event) => bridge_hub.publish(event.into()).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "realtime bridge lagged behind engine events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        hub
    }

    async fn publish(&self, event: events::WireEvent) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope { seq, event };
        let mut ring = self.ring.lock().await;
        ring.push_back(envelope.clone());
        while ring.len() > RING_CAPACITY {
            ring.pop_front();
        }
        drop(ring);
        // no receivers is the common case between rounds with no connected
        // spectators; that's not an error.
        let _ = self.live.send(envelope);
    }

    /// Replays the buffered tail after `last_seq`. If the ring has already
    /// evicted that far back, the client missed events that no longer exist
    /// incrementally — fall back to the most recent `state_snapshot` in the
    /// ring (or the whole ring, if none has been published yet) instead of
    /// silently handing back an incomplete tail.
    async fn replay_since(&self, last_seq: Option<u64>) -> Vec<Envelope> {
        let ring = self.ring.lock().await;
        match last_seq {
            Some(last) => {
                let gap = ring.front().is_some_and(|oldest| last.saturating_add(1) < oldest.seq);
                if gap {
                    Self::replay_from_latest_snapshot(&ring)
                } else {
                    ring.iter().filter(|e| e.seq > last).cloned().collect()
                }
            }
            None => ring.iter().cloned().collect(),
        }
    }

    fn replay_from_latest_snapshot(ring: &VecDeque<Envelope>) -> Vec<Envelope> {
        let snapshot_pos = ring
            .iter()
            .rposition(|e| matches!(e.event, events::WireEvent::StateSnapshot { .. }));
        match snapshot_pos {
            Some(pos) => ring.iter().skip(pos).cloned().collect(),
            None => ring.iter().cloned().collect(),
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<RealtimeHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RealtimeHub>) {
    let (mut sender, mut receiver) = socket.split();
    let mut live = hub.live.subscribe();

    // First client message, if sent promptly, carries `{"last_seq": N}` for
    // replay; anything else (or silence) just gets the full buffered tail.
    let last_seq = match tokio::time::timeout(std::time::Duration::from_millis(500), receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<ReplayRequest>(&text)
            .ok()
            .map(|r| r.last_seq),
        _ => None,
    };

    for envelope in hub.replay_since(last_seq).await {
        if send_envelope(&mut sender, &envelope).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    _ => {}
                }
            }
            live_event = live.recv() => {
                match live_event {
                    Ok(envelope) => {
                        if send_envelope(&mut sender, &envelope).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // connection fell behind the live stream; disconnect
                        // rather than buffer unboundedly, per the backpressure
                        // policy (§4.6).
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

async fn send_envelope(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(envelope).expect("Envelope serializes");
    sender.send(Message::Text(payload)).await
}

#[derive(serde::Deserialize)]
struct ReplayRequest {
    last_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_assigns_increasing_sequence_numbers() {
        let (_tx, rx) = broadcast::channel(16);
        let hub = RealtimeHub::spawn_bridge(rx);
        hub.publish(events::WireEvent::RunningStart {
            round_id: uuid::Uuid::now_v7(),
        })
        .await;
        hub.publish(events::WireEvent::RunningStart {
            round_id: uuid::Uuid::now_v7(),
        })
        .await;
        let all = hub.replay_since(None).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].seq, 0);
        assert_eq!(all[1].seq, 1);
    }

    #[tokio::test]
    async fn replay_since_filters_out_already_seen_events() {
        let (_tx, rx) = broadcast::channel(16);
        let hub = RealtimeHub::spawn_bridge(rx);
        for _ in 0..3 {
            hub.publish(events::WireEvent::RunningStart {
                round_id: uuid::Uuid::now_v7(),
            })
            .await;
        }
        let tail = hub.replay_since(Some(0)).await;
        assert_eq!(tail.len(), 2);
        assert!(tail.iter().all(|e| e.seq > 0));
    }

    #[tokio::test]
    async fn reconnect_past_ring_retention_falls_back_to_a_snapshot() {
        let (_tx, rx) = broadcast::channel(16);
        let hub = RealtimeHub::spawn_bridge(rx);
        // seq 0, 1: events that will fall off the ring before the client
        // reconnects.
        for _ in 0..2 {
            hub.publish(events::WireEvent::RunningStart {
                round_id: uuid::Uuid::now_v7(),
            })
            .await;
        }
        // seq 2: the snapshot that should anchor the fallback replay.
        hub.publish(events::WireEvent::StateSnapshot {
            round_id: uuid::Uuid::now_v7(),
            status: "Betting".into(),
            multiplier_ppm: None,
        })
        .await;
        // seq 3, 4, 5: events after the snapshot.
        for _ in 0..3 {
            hub.publish(events::WireEvent::RunningStart {
                round_id: uuid::Uuid::now_v7(),
            })
            .await;
        }
        // simulate the ring having evicted seq 0 and 1 already, so the
        // client's last-seen seq of 0 now precedes the retained window.
        {
            let mut ring = hub.ring.lock().await;
            ring.pop_front();
            ring.pop_front();
        }

        let replay = hub.replay_since(Some(0)).await;
        assert!(matches!(replay[0].event, events::WireEvent::StateSnapshot { .. }));
        assert_eq!(replay.len(), 4);
    }

    #[tokio::test]
    async fn ring_buffer_evicts_beyond_capacity() {
        let (_tx, rx) = broadcast::channel(16);
        let hub = RealtimeHub::spawn_bridge(rx);
        for _ in 0..(RING_CAPACITY + 10) {
            hub.publish(events::WireEvent::RunningStart {
                round_id: uuid::Uuid::now_v7(),
            })
            .await;
        }
        let all = hub.replay_since(None).await;
        assert_eq!(all.len(), RING_CAPACITY);
    }
}
