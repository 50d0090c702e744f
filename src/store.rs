// src/store.rs - Durable incident storage interface

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::incident::AlarmIncident;

/// Durable, per-place keyed storage for incident records.
///
/// The store retains completed incidents for listing; "current" means the
/// most recently started incident that has not reached COMPLETE.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn find_by_id(&self, place_id: Uuid, id: Uuid) -> Result<Option<AlarmIncident>>;

    /// Most recent non-terminal incident for the place, if any.
    async fn current(&self, place_id: Uuid) -> Result<Option<AlarmIncident>>;

    /// Bounded history listing, newest first.
    async fn list_by_place(&self, place_id: Uuid, limit: usize) -> Result<Vec<AlarmIncident>>;

    async fn upsert(&self, incident: &AlarmIncident) -> Result<()>;
}

/// In-memory store used by the demo binary and tests.
#[derive(Debug, Default)]
pub struct MemoryIncidentStore {
    places: DashMap<Uuid, Vec<AlarmIncident>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn find_by_id(&self, place_id: Uuid, id: Uuid) -> Result<Option<AlarmIncident>> {
        Ok(self
            .places
            .get(&place_id)
            .and_then(|incidents| incidents.iter().find(|i| i.id == id).cloned()))
    }

    async fn current(&self, place_id: Uuid) -> Result<Option<AlarmIncident>> {
        Ok(self.places.get(&place_id).and_then(|incidents| {
            incidents
                .iter()
                .filter(|i| i.is_open())
                .max_by_key(|i| i.start_time)
                .cloned()
        }))
    }

    async fn list_by_place(&self, place_id: Uuid, limit: usize) -> Result<Vec<AlarmIncident>> {
        let mut incidents = self
            .places
            .get(&place_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        incidents.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        incidents.truncate(limit);
        Ok(incidents)
    }

    async fn upsert(&self, incident: &AlarmIncident) -> Result<()> {
        let mut incidents = self.places.entry(incident.place_id).or_default();
        match incidents.iter_mut().find(|i| i.id == incident.id) {
            Some(existing) => *existing = incident.clone(),
            None => incidents.push(incident.clone()),
        }
        Ok(())
    }
}
