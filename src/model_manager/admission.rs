//! The resident-set admission controller: a single serialized channel that
//! owns every load/evict decision, so concurrent `ensure_resident` callers
//! never race on `resident_budget_bytes` (§4.3).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::registry::{Warmth, WorkerDescriptor, WorkerRegistry};

struct ResidentEntry {
    footprint_bytes: u64,
    warmth: Warmth,
}

enum Msg {
    EnsureResident(WorkerDescriptor, oneshot::Sender<Result<()>>),
}

/// Handle to the admission controller's background task.
#[derive(Clone)]
pub struct AdmissionController {
    tx: mpsc::Sender<Msg>,
}

impl AdmissionController {
    /// Spawn the controller task, bounded to `budget_bytes` resident
    /// footprint and `queue_bound` in-flight requests.
    #[must_use]
    pub fn spawn(registry: WorkerRegistry, budget_bytes: u64, queue_bound: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Msg>(queue_bound.max(1));

        tokio::spawn(async move {
            let mut resident: HashMap<String, ResidentEntry> = HashMap::new();
            let mut used_bytes: u64 = 0;

            while let Some(Msg::EnsureResident(desc, respond)) = rx.recv().await {
                if resident.contains_key(&desc.id) {
                    registry.touch(&desc.id);
                    let _ = respond.send(Ok(()));
                    continue;
                }

                if used_bytes + desc.footprint_bytes > budget_bytes {
                    let freed = evict_idle(&registry, &mut resident, &mut used_bytes, desc.footprint_bytes, budget_bytes);
                    if freed {
                        info!(worker_id = %desc.id, "evicted idle workers to admit new resident");
                        crate::observability::metrics().resident_workers.set(resident.len() as i64);
                    }
                }

                if used_bytes + desc.footprint_bytes > budget_bytes {
                    let _ = respond.send(Err(Error::ResidentSetFull {
                        footprint_bytes: desc.footprint_bytes,
                        available_bytes: budget_bytes.saturating_sub(used_bytes),
                    }));
                    continue;
                }

                used_bytes += desc.footprint_bytes;
                resident.insert(
                    desc.id.clone(),
                    ResidentEntry {
                        footprint_bytes: desc.footprint_bytes,
                        warmth: desc.warmth,
                    },
                );
                registry.touch(&desc.id);
                crate::observability::metrics().resident_workers.set(resident.len() as i64);
                let _ = respond.send(Ok(()));
            }

            warn!("admission controller channel closed; task exiting");
        });

        Self { tx }
    }

    /// Request residency for `descriptor`, blocking only on the controller
    /// task's queue, never on another caller's load.
    pub async fn ensure_resident(&self, descriptor: WorkerDescriptor) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Msg::EnsureResident(descriptor, tx))
            .await
            .map_err(|_| Error::Unknown("admission controller channel closed".to_string()))?;
        rx.await.map_err(|_| Error::Unknown("admission controller dropped the request".to_string()))?
    }
}

/// Evict idle `T1`/`T2` residents, preferring `T2` first, until `needed`
/// bytes fit within `budget_bytes`. Returns whether anything was evicted.
fn evict_idle(
    registry: &WorkerRegistry,
    resident: &mut HashMap<String, ResidentEntry>,
    used_bytes: &mut u64,
    needed: u64,
    budget_bytes: u64,
) -> bool {
    const T2_IDLE: Duration = Duration::from_secs(30);
    const T1_IDLE: Duration = Duration::from_secs(5 * 60);

    let mut evictable: Vec<(String, u64, Warmth)> = resident
        .iter()
        .filter(|(id, entry)| match entry.warmth {
            Warmth::T2 => registry.idle_for(id).is_some_and(|d| d >= T2_IDLE),
            Warmth::T1 => registry.idle_for(id).is_some_and(|d| d >= T1_IDLE),
            Warmth::T0 | Warmth::T3 => false,
        })
        .map(|(id, entry)| (id.clone(), entry.footprint_bytes, entry.warmth))
        .collect();
    evictable.sort_by_key(|(_, _, warmth)| std::cmp::Reverse(*warmth));

    let mut evicted_any = false;
    for (id, footprint, _) in evictable {
        if *used_bytes + needed <= budget_bytes {
            break;
        }
        resident.remove(&id);
        *used_bytes = used_bytes.saturating_sub(footprint);
        evicted_any = true;
    }
    evicted_any
}
