// src/service/hub.rs - Hub-authoritative incident service
//
// The hub owns the incident's identity and primary lifecycle: ids come from
// the hub's current-incident attribute, and the hub-side sub-state only
// advances on hub reports. Monitoring-station plumbing is shared with the
// platform service.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::CancelMethod;
use crate::context::PlaceContext;
use crate::error::{IncidentError, Result};
use crate::incident::{
    AlarmIncident, AlertState, AlertType, IncidentBuilder, TrackerEvent, TrackerState,
};
use crate::trigger::IncidentTrigger;

use super::{CancelDisposition, IncidentService, PlatformIncidentService, ServiceCore};

pub struct HubIncidentService {
    platform: Arc<PlatformIncidentService>,
}

impl HubIncidentService {
    pub fn new(platform: Arc<PlatformIncidentService>) -> Self {
        Self { platform }
    }

    /// Apply a hub-reported lifecycle sub-state. When the hub reports
    /// COMPLETE for an incident whose platform side already finished, the
    /// whole incident completes - this is the "later hub report" that
    /// unsticks a cancel whose platform future already resolved.
    pub async fn on_hub_alert_state(&self, ctx: &PlaceContext, state: AlertState) -> Result<()> {
        let incident = self
            .core()
            .store
            .current(ctx.place_id())
            .await?
            .ok_or_else(|| {
                IncidentError::NotFound(format!(
                    "hub report for place {} without an open incident",
                    ctx.place_id()
                ))
            })?;

        let updated = incident.to_builder().with_hub_state(state).build();
        self.core().save(Some(&incident), &updated).await?;

        if state == AlertState::Complete
            && updated.platform_alert_state == Some(AlertState::Complete)
            && ctx.hub_current_incident().is_none()
        {
            self.on_completed(ctx, updated).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl IncidentService for HubIncidentService {
    fn core(&self) -> &ServiceCore {
        self.platform.core_ref()
    }

    /// The hub is authoritative: resolve from its live current-incident
    /// attribute, falling back to the stored place variable for the window
    /// where the hub clears its pointer before the platform catches up.
    /// An update without a known incident is a programming error, not a
    /// recoverable condition.
    async fn active_incident(&self, ctx: &PlaceContext) -> Result<Option<AlarmIncident>> {
        let id = ctx
            .hub_current_incident()
            .or_else(|| ctx.current_incident())
            .ok_or_else(|| {
                IncidentError::NotFound(format!(
                    "hub reports no active incident for place {}",
                    ctx.place_id()
                ))
            })?;
        self.core().store.find_by_id(ctx.place_id(), id).await
    }

    /// The incident id is not generated locally; it is the hub's.
    fn build_incident(&self, ctx: &PlaceContext, alarm: AlertType) -> Result<IncidentBuilder> {
        let id = ctx.hub_current_incident().ok_or_else(|| {
            IncidentError::NotFound(format!(
                "hub reports no incident id for place {}",
                ctx.place_id()
            ))
        })?;
        Ok(AlarmIncident::builder(ctx.place_id(), alarm)
            .with_id(id)
            .with_hub_alarm(true))
    }

    fn mark_prealert_tier(&self, builder: IncidentBuilder) -> IncidentBuilder {
        builder.with_hub_state(AlertState::Prealert)
    }

    fn mark_alert_tier(&self, builder: IncidentBuilder) -> IncidentBuilder {
        builder.with_hub_state(AlertState::Alert)
    }

    async fn do_cancel(
        &self,
        ctx: &PlaceContext,
        incident: &AlarmIncident,
        cancelled_by: &str,
        method: CancelMethod,
    ) -> Result<CancelDisposition> {
        IncidentService::do_cancel(&*self.platform, ctx, incident, cancelled_by, method).await
    }

    async fn notify(
        &self,
        ctx: &PlaceContext,
        incident: &AlarmIncident,
        triggers: &[IncidentTrigger],
    ) -> Result<()> {
        IncidentService::notify(&*self.platform, ctx, incident, triggers).await
    }

    /// Verifying a PREALERT hub incident promotes the overall and platform
    /// phases to ALERT while the hub side stays at PREALERT (the hub has not
    /// reported ALERT yet). Triggers already in the hub's security-alarm
    /// model are replayed into the verification notification.
    async fn on_incident_verified(
        &self,
        ctx: &PlaceContext,
        incident: &AlarmIncident,
        actor: &str,
    ) -> Result<()> {
        if incident.alert_state != AlertState::Prealert {
            return IncidentService::on_incident_verified(&*self.platform, ctx, incident, actor)
                .await;
        }

        let updated = incident
            .to_builder()
            .with_alert_state(AlertState::Alert)
            .with_platform_state(AlertState::Alert)
            .add_tracker(TrackerEvent::new(TrackerState::Alert))
            .build();
        self.core().save(Some(incident), &updated).await?;

        let mut triggers = ctx.hub_security_triggers();
        triggers.push(IncidentTrigger::verified_alarm(incident.alert, actor));

        self.record_history_triggers(ctx, updated.address(), &triggers)
            .await;
        if let Err(e) = self.notify(ctx, &updated, &triggers).await {
            warn!(error = %e, incident = %updated.address(), "verification notification failed");
        }
        if let Some(last) = triggers.last() {
            ctx.set_last_trigger_sent(Some(last.time));
        }
        info!(incident = %updated.address(), "prealert verification promoted hub incident to alert");
        Ok(())
    }
}
