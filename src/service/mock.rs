// src/service/mock.rs - Scheduler-driven stand-in monitoring station
//
// Simulates dispatch, refusal and timeout for demo/test places. Scheduled
// checks re-read the incident fresh at fire time instead of trusting the
// state captured when they were armed.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::CancelMethod;
use crate::context::PlaceContext;
use crate::error::{IncidentError, Result};
use crate::incident::{
    AlarmIncident, AlertState, AlertType, IncidentAddress, IncidentBuilder, MonitoringState,
    TrackerEvent,
};
use crate::trigger::IncidentTrigger;

use super::{CancelDisposition, IncidentService, ServiceCore};

pub struct MockIncidentService {
    core: ServiceCore,
}

impl MockIncidentService {
    pub fn new(core: ServiceCore) -> Self {
        Self { core }
    }

    // ---- simulated monitoring-station callbacks ----
    //
    // Each maps to a monitoring-state transition through the same
    // `on_incident_updated` path real updates use, so the production
    // validation logic is exercised rather than bypassed.

    pub async fn contacted(&self, ctx: &PlaceContext, address: IncidentAddress) -> Result<()> {
        self.on_incident_updated(ctx, address, "DISPATCHING").await
    }

    pub async fn dispatch_accepted(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
    ) -> Result<()> {
        self.on_incident_updated(ctx, address, "DISPATCHED").await
    }

    pub async fn dispatch_refused(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
    ) -> Result<()> {
        self.on_incident_updated(ctx, address, "REFUSED").await
    }

    pub async fn dispatch_cancelled(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
    ) -> Result<()> {
        self.on_incident_updated(ctx, address, "CANCELLED").await
    }

    pub async fn dispatch_failed(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
    ) -> Result<()> {
        self.on_incident_updated(ctx, address, "FAILED").await
    }

    // ---- scheduled transitions ----

    fn schedule_pending_escalation(&self, place_id: Uuid, incident_id: Uuid) {
        let core = self.core.clone();
        let delay = self.core.config.mock_alert_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = escalate_if_pending(&core, place_id, incident_id).await {
                warn!(error = %e, incident = %incident_id, "mock pending escalation failed");
            }
        });
    }

    fn schedule_dispatch_check(&self, place_id: Uuid, incident_id: Uuid) {
        let core = self.core.clone();
        let delay = self.core.config.mock_dispatch_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = run_dispatch_check(&core, place_id, incident_id, delay).await {
                warn!(error = %e, incident = %incident_id, "mock dispatch check failed");
            }
        });
    }
}

/// Escalate PENDING to DISPATCHING, unless something else already moved the
/// monitoring state.
async fn escalate_if_pending(core: &ServiceCore, place_id: Uuid, incident_id: Uuid) -> Result<()> {
    let Some(incident) = core.store.find_by_id(place_id, incident_id).await? else {
        return Ok(());
    };
    if !incident.is_open() || incident.monitoring_state != MonitoringState::Pending {
        debug!(incident = %incident_id, "pending escalation superseded");
        return Ok(());
    }
    apply_monitoring(core, &incident, MonitoringState::Dispatching).await
}

/// Fail a dispatch that has been sitting unanswered past the timeout
/// window, measured from the last tracker entry (or the incident start).
async fn run_dispatch_check(
    core: &ServiceCore,
    place_id: Uuid,
    incident_id: Uuid,
    window: Duration,
) -> Result<()> {
    let Some(incident) = core.store.find_by_id(place_id, incident_id).await? else {
        return Ok(());
    };
    if !incident.is_open()
        || !matches!(
            incident.monitoring_state,
            MonitoringState::Pending | MonitoringState::Dispatching
        )
    {
        return Ok(());
    }
    let anchor = incident.last_tracker_time().unwrap_or(incident.start_time);
    let window = ChronoDuration::milliseconds(window.as_millis() as i64);
    if Utc::now() >= anchor + window {
        warn!(incident = %incident_id, "mock dispatch window expired; marking FAILED");
        apply_monitoring(core, &incident, MonitoringState::Failed).await?;
    }
    Ok(())
}

async fn apply_monitoring(
    core: &ServiceCore,
    incident: &AlarmIncident,
    state: MonitoringState,
) -> Result<()> {
    let mut builder = incident.to_builder().with_monitoring_state(state);
    if let Some(tracker) = state.tracker_state() {
        builder = builder.add_tracker(TrackerEvent::new(tracker));
    }
    core.save(Some(incident), &builder.build()).await
}

#[async_trait]
impl IncidentService for MockIncidentService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn build_incident(&self, ctx: &PlaceContext, alarm: AlertType) -> Result<IncidentBuilder> {
        Ok(AlarmIncident::builder(ctx.place_id(), alarm).with_mock(true))
    }

    /// A station mid-dispatch cannot be called off. Runs before the
    /// CANCELLING transition is persisted, so a rejected cancel leaves the
    /// incident exactly as found; the attempt also re-checks the dispatch
    /// window as a side effect.
    async fn validate_cancel(&self, ctx: &PlaceContext, incident: &AlarmIncident) -> Result<()> {
        if incident.monitoring_state == MonitoringState::Dispatching {
            let window = self.core.config.mock_dispatch_timeout();
            if let Err(e) = run_dispatch_check(&self.core, ctx.place_id(), incident.id, window).await
            {
                warn!(error = %e, incident = %incident.address(), "mock dispatch check failed");
            }
            return Err(IncidentError::InvalidRequest(format!(
                "incident {} cannot be cancelled while dispatch is in progress",
                incident.address()
            )));
        }
        Ok(())
    }

    /// The simulated station accepts every cancel that passed validation.
    async fn do_cancel(
        &self,
        _ctx: &PlaceContext,
        _incident: &AlarmIncident,
        _cancelled_by: &str,
        _method: CancelMethod,
    ) -> Result<CancelDisposition> {
        Ok(CancelDisposition::Completed)
    }

    /// SECURITY alarms linger in PENDING before a simulated operator picks
    /// them up; life-safety alarms dispatch immediately. Either way a
    /// dispatch-timeout check is armed.
    async fn after_alert(
        &self,
        ctx: &PlaceContext,
        incident: &AlarmIncident,
        alarm: AlertType,
    ) -> Result<()> {
        match alarm {
            AlertType::Security => {
                apply_monitoring(&self.core, incident, MonitoringState::Pending).await?;
                self.schedule_pending_escalation(ctx.place_id(), incident.id);
            }
            AlertType::Smoke | AlertType::Panic | AlertType::Co => {
                apply_monitoring(&self.core, incident, MonitoringState::Dispatching).await?;
            }
            _ => return Ok(()),
        }
        self.schedule_dispatch_check(ctx.place_id(), incident.id);
        Ok(())
    }

    async fn on_incident_verified(
        &self,
        ctx: &PlaceContext,
        incident: &AlarmIncident,
        actor: &str,
    ) -> Result<()> {
        // Verification escalates a simulated PREALERT the same way the
        // platform does, minus the outbound notification.
        if incident.alert_state == AlertState::Prealert {
            let trigger = IncidentTrigger::verified_alarm(incident.alert, actor);
            self.add_alert(ctx, incident.alert, &[trigger], false).await?;
        }
        Ok(())
    }
}
