//! Settled-round proof store backing `/proof/:round_id` (§4.8). Listens to
//! the engine's event stream and remembers just enough about each settled
//! round for an external auditor to re-derive and verify its crash point.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::admin::{ProofStep, RoundHistory, RoundProof};
use crate::engine::messages::EngineEvent;
use crate::error::Result;

pub struct InMemoryRoundHistory {
    proofs: RwLock<HashMap<Uuid, RoundProof>>,
    commit_hashes: RwLock<HashMap<Uuid, String>>,
    ticks: RwLock<HashMap<Uuid, Vec<ProofStep>>>,
}

impl Default for InMemoryRoundHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRoundHistory {
    pub fn new() -> Self {
        InMemoryRoundHistory {
            proofs: RwLock::new(HashMap::new()),
            commit_hashes: RwLock::new(HashMap::new()),
            ticks: RwLock::new(HashMap::new()),
        }
    }

    pub fn spawn_bridge(mut engine_events: broadcast::Receiver<EngineEvent>) -> Arc<Self> {
        let store = Arc::new(InMemoryRoundHistory::new());
        let bridge = store.clone();
        tokio::spawn(async move {
            loop {
                match engine_events.recv().await {
                    Ok(EngineEvent::RoundCommit { round_id, commit_hash }) => {
                        bridge
                            .commit_hashes
                            .write()
                            .await
                            .insert(round_id, hex32(&commit_hash));
                    }
                    Ok(EngineEvent::MultiplierTick { round_id, multiplier_ppm, elapsed_ms }) => {
                        bridge
                            .ticks
                            .write()
                            .await
                            .entry(round_id)
                            .or_default()
                            .push(ProofStep { elapsed_ms, multiplier_ppm });
                    }
                    Ok(EngineEvent::Crash {
                        round_id,
                        crash_point_ppm,
                        server_seed,
                        client_entropy,
                    }) => {
                        let commit_hash = bridge
                            .commit_hashes
                            .read()
                            .await
                            .get(&round_id)
                            .cloned()
                            .unwrap_or_default();
                        let steps = bridge.ticks.write().await.remove(&round_id).unwrap_or_default();
                        let proof = RoundProof {
                            round_id,
                            keccak_of_seed: commit_hash.clone(),
                            commit_hash,
                            server_seed: hex32(&server_seed),
                            client_entropy: hex32(&client_entropy),
                            crash_point_ppm,
                            steps,
                        };
                        bridge.proofs.write().await.insert(round_id, proof);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        store
    }
}

fn hex32(bytes: &[u8; 32]) -> String {
    format!("0x{}", bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

#[async_trait::async_trait]
impl RoundHistory for InMemoryRoundHistory {
    async fn proof(&self, round_id: Uuid) -> Result<Option<RoundProof>> {
        Ok(self.proofs.read().await.get(&round_id).cloned())
    }
}
