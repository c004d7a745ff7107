// src/engine/broadcast.rs

//! Broadcast fan-out: one derived job per registered worker.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::engine::job::{ClientBundle, DependencySpec};

/// Workers known to the queue and broadcasts waiting for the first one.
#[derive(Debug, Default)]
pub struct BroadcastRegistry {
    workers: BTreeSet<String>,
    parked: Vec<ClientBundle>,
}

impl BroadcastRegistry {
    pub fn workers(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(String::as_str)
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Derive one job per worker, or park the broadcast if there is no
    /// worker yet.
    pub fn fan_out_or_park(&mut self, bundle: ClientBundle) -> Vec<ClientBundle> {
        if self.workers.is_empty() {
            info!(job = %bundle.uuid, "no worker registered; broadcast parked");
            self.parked.push(bundle);
            return Vec::new();
        }
        fan_out(&bundle, self.workers.iter().map(String::as_str))
    }

    /// Register `worker`. Returns the derived jobs of broadcasts that were
    /// parked waiting for a worker.
    pub fn register_worker(&mut self, worker: &str) -> Vec<ClientBundle> {
        if !self.workers.insert(worker.to_string()) {
            return Vec::new();
        }
        debug!(worker, "worker registered");
        std::mem::take(&mut self.parked)
            .iter()
            .flat_map(|bundle| fan_out(bundle, std::iter::once(worker)))
            .collect()
    }

    pub fn unregister_worker(&mut self, worker: &str) -> bool {
        self.workers.remove(worker)
    }
}

/// Per-worker copies of `bundle`, named `uuid:worker`.
///
/// Copies carry no dependency id: a logical id can only be bound to one job.
pub fn fan_out<'a>(
    bundle: &ClientBundle,
    workers: impl Iterator<Item = &'a str>,
) -> Vec<ClientBundle> {
    workers
        .map(|worker| {
            let mut sla = bundle.sla.clone();
            sla.broadcast_target = Some(worker.to_string());
            sla.dependency_spec = DependencySpec::default();
            ClientBundle {
                uuid: format!("{}:{}", bundle.uuid, worker),
                name: format!("{}[{}]", bundle.name, worker),
                sla,
                tasks: bundle.tasks.clone(),
                from_persistence: bundle.from_persistence,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::job::{JobSla, Task};
    use std::sync::Arc;

    fn broadcast(uuid: &str) -> ClientBundle {
        let sla = JobSla {
            broadcast: true,
            ..JobSla::default()
        };
        ClientBundle::new(uuid, "bc", sla, vec![Arc::new(Task::new(0))])
    }

    #[test]
    fn fan_out_derives_one_job_per_worker() {
        let mut reg = BroadcastRegistry::default();
        reg.register_worker("w1");
        reg.register_worker("w2");

        let derived = reg.fan_out_or_park(broadcast("b"));
        let uuids: Vec<&str> = derived.iter().map(|b| b.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["b:w1", "b:w2"]);
        assert!(derived.iter().all(|b| !b.is_broadcast_root()));
        assert_eq!(derived[1].sla.broadcast_target.as_deref(), Some("w2"));
    }

    #[test]
    fn broadcast_without_workers_waits_for_the_first_one() {
        let mut reg = BroadcastRegistry::default();
        assert!(reg.fan_out_or_park(broadcast("b")).is_empty());
        assert_eq!(reg.parked_count(), 1);

        let derived = reg.register_worker("w1");
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].uuid, "b:w1");
        assert_eq!(reg.parked_count(), 0);
        assert!(reg.register_worker("w1").is_empty());
    }
}
