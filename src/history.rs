// src/history.rs - History sink boundary
//
// The sink owns message-key -> text formatting; this crate only delivers
// the structured call contract.

use async_trait::async_trait;
use uuid::Uuid;

use crate::bus::CancelMethod;
use crate::error::Result;
use crate::incident::IncidentAddress;
use crate::trigger::IncidentTrigger;

/// Receiver for append-only, human-facing history entries.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn triggers_added(
        &self,
        place_id: Uuid,
        population: &str,
        incident: IncidentAddress,
        triggers: &[IncidentTrigger],
    ) -> Result<()>;

    async fn cancelled(
        &self,
        place_id: Uuid,
        population: &str,
        incident: IncidentAddress,
        cancelled_by: &str,
        method: CancelMethod,
    ) -> Result<()>;

    async fn hub_connectivity_changed(
        &self,
        place_id: Uuid,
        population: &str,
        incident: IncidentAddress,
        connected: bool,
    ) -> Result<()>;
}

/// Sink that drops every entry; used where history output is not wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHistorySink;

#[async_trait]
impl HistorySink for NullHistorySink {
    async fn triggers_added(
        &self,
        _place_id: Uuid,
        _population: &str,
        _incident: IncidentAddress,
        _triggers: &[IncidentTrigger],
    ) -> Result<()> {
        Ok(())
    }

    async fn cancelled(
        &self,
        _place_id: Uuid,
        _population: &str,
        _incident: IncidentAddress,
        _cancelled_by: &str,
        _method: CancelMethod,
    ) -> Result<()> {
        Ok(())
    }

    async fn hub_connectivity_changed(
        &self,
        _place_id: Uuid,
        _population: &str,
        _incident: IncidentAddress,
        _connected: bool,
    ) -> Result<()> {
        Ok(())
    }
}
