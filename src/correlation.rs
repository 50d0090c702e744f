// src/correlation.rs - Pending-cancel map: correlation id -> deadline entry
//
// The original design used an evicting cache as its timeout mechanism; here
// it is an explicit deadline-carrying map swept by a ticker. Eviction and
// response handling both go through `take`, so each entry resolves at most
// once no matter which side wins the race.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A cancel request awaiting a correlated monitoring-station response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCancel {
    pub correlation_id: Uuid,
    pub place_id: Uuid,
    pub incident_id: Uuid,
    pub deadline: Instant,
}

impl PendingCancel {
    pub fn expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}

/// Concurrency-sharded map of in-flight cancel requests.
///
/// Insert happens on a place's execution task; lookup-and-remove happens on
/// the bus-delivery task; sweep happens on the ticker task. This is the one
/// structure in the crate that must be internally thread-safe.
#[derive(Debug)]
pub struct PendingCancels {
    entries: DashMap<Uuid, PendingCancel>,
}

impl PendingCancels {
    /// `shards` is rounded up to the next power of two, minimum 4.
    pub fn new(shards: usize) -> Self {
        let shards = shards.next_power_of_two().max(4);
        Self {
            entries: DashMap::with_shard_amount(shards),
        }
    }

    pub fn insert(&self, place_id: Uuid, incident_id: Uuid, ttl: Duration) -> Uuid {
        let correlation_id = Uuid::new_v4();
        self.entries.insert(
            correlation_id,
            PendingCancel {
                correlation_id,
                place_id,
                incident_id,
                deadline: Instant::now() + ttl,
            },
        );
        correlation_id
    }

    /// Remove and return the entry for a correlation id. Returns `None` for
    /// unknown ids and for entries already taken or swept - the caller
    /// treats that as a no-op.
    pub fn take(&self, correlation_id: Uuid) -> Option<PendingCancel> {
        self.entries.remove(&correlation_id).map(|(_, entry)| entry)
    }

    /// Remove and return every entry whose deadline has passed.
    pub fn sweep(&self, now: Instant) -> Vec<PendingCancel> {
        let expired: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|entry| entry.expired(now))
            .map(|entry| *entry.key())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                self.entries
                    .remove_if(&id, |_, entry| entry.expired(now))
                    .map(|(_, entry)| entry)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_resolves_exactly_once() {
        let pending = PendingCancels::new(4);
        let id = pending.insert(Uuid::new_v4(), Uuid::new_v4(), Duration::from_secs(30));

        assert!(pending.take(id).is_some());
        // A late duplicate response is a no-op
        assert!(pending.take(id).is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let pending = PendingCancels::new(4);
        let expired = pending.insert(Uuid::new_v4(), Uuid::new_v4(), Duration::ZERO);
        let live = pending.insert(Uuid::new_v4(), Uuid::new_v4(), Duration::from_secs(300));

        let swept = pending.sweep(Instant::now());
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].correlation_id, expired);
        assert_eq!(pending.len(), 1);

        // The swept entry is gone for good; the live one can still resolve
        assert!(pending.take(expired).is_none());
        assert!(pending.take(live).is_some());
    }

    #[test]
    fn test_sweep_after_take_is_empty() {
        let pending = PendingCancels::new(4);
        let id = pending.insert(Uuid::new_v4(), Uuid::new_v4(), Duration::ZERO);
        assert!(pending.take(id).is_some());
        assert!(pending.sweep(Instant::now()).is_empty());
    }

    #[test]
    fn test_shard_count_normalized() {
        // Non-power-of-two shard requests must not panic
        let pending = PendingCancels::new(5);
        pending.insert(Uuid::new_v4(), Uuid::new_v4(), Duration::from_secs(1));
        assert_eq!(pending.len(), 1);
        let _ = PendingCancels::new(0);
    }
}
