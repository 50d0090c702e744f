// src/service/platform.rs - Platform-authoritative incident service
//
// Adds monitoring-station coordination to the shared lifecycle:
// notifications and cancellations go out as correlated, TTL-tagged requests;
// responses are matched back through the pending-cancel map; a sweeper task
// expires requests that never got an answer.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{AlarmServiceRequest, CancelMethod, MonitoringMessage};
use crate::context::{PlaceContext, PlaceDirectory};
use crate::correlation::PendingCancels;
use crate::error::{IncidentError, Result};
use crate::incident::{AlarmIncident, AlertState};
use crate::trigger::IncidentTrigger;

use super::{CancelDisposition, IncidentService, ServiceCore};

pub struct PlatformIncidentService {
    core: ServiceCore,
    places: Arc<PlaceDirectory>,
    pending: PendingCancels,
}

impl PlatformIncidentService {
    pub fn new(core: ServiceCore, places: Arc<PlaceDirectory>) -> Self {
        let pending = PendingCancels::new(core.config.cancel_shards);
        Self {
            core,
            places,
            pending,
        }
    }

    pub(crate) fn core_ref(&self) -> &ServiceCore {
        &self.core
    }

    /// In-flight cancel requests awaiting a correlated response.
    pub fn pending_cancels(&self) -> &PendingCancels {
        &self.pending
    }

    /// Background task that periodically expires unanswered cancel requests.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = service.core.config.cancel_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                service.sweep_expired();
            }
        })
    }

    /// Expire every pending cancel past its deadline. Each expiry resolves
    /// that request exactly once, as a timeout failure that is logged and
    /// absorbed: the incident stays in CANCELLING until something else
    /// advances it. A response arriving after this is a no-op.
    pub fn sweep_expired(&self) {
        for expired in self.pending.sweep(Instant::now()) {
            let timeout = IncidentError::Timeout(format!(
                "cancel request {} expired before a response arrived",
                expired.correlation_id
            ));
            warn!(
                incident = %expired.incident_id,
                place = %expired.place_id,
                error = %timeout,
                "monitoring cancel timed out; incident left in CANCELLING"
            );
        }
    }

    /// Dispatch an inbound monitoring-station message by correlation id.
    /// Unknown and already-expired correlation ids are no-ops.
    pub async fn on_event(&self, message: MonitoringMessage) -> Result<()> {
        match message {
            MonitoringMessage::CancelResponse {
                correlation_id,
                result,
            } => {
                let Some(pending) = self.pending.take(correlation_id) else {
                    debug!(%correlation_id, "response without a pending cancel; ignoring");
                    return Ok(());
                };
                match result {
                    Ok(()) => {
                        let Some(ctx) = self.places.get(pending.place_id) else {
                            warn!(place = %pending.place_id, "cancel response for unknown place");
                            return Ok(());
                        };
                        let incident = self
                            .core
                            .store
                            .find_by_id(pending.place_id, pending.incident_id)
                            .await?;
                        let Some(incident) = incident else {
                            warn!(incident = %pending.incident_id, "cancel response for missing incident");
                            return Ok(());
                        };
                        // Cancellation is advisory: a failure here never
                        // reaches the original caller.
                        if let Err(e) = self.on_platform_completed(&ctx, incident).await {
                            error!(
                                error = %e,
                                incident = %pending.incident_id,
                                "failed to apply cancel response"
                            );
                        }
                    }
                    Err(remote) => {
                        warn!(
                            code = %remote.code,
                            message = %remote.message,
                            incident = %pending.incident_id,
                            "monitoring station rejected cancel; incident left in CANCELLING"
                        );
                    }
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl IncidentService for PlatformIncidentService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    async fn do_cancel(
        &self,
        ctx: &PlaceContext,
        incident: &AlarmIncident,
        cancelled_by: &str,
        method: CancelMethod,
    ) -> Result<CancelDisposition> {
        let ttl = self.core.config.cancel_timeout();
        let correlation_id = self.pending.insert(ctx.place_id(), incident.id, ttl);
        let request = AlarmServiceRequest::CancelAlarm {
            correlation_id,
            place_id: ctx.place_id(),
            incident: incident.address(),
            cancelled_by: cancelled_by.to_string(),
            method,
            ttl,
        };
        if let Err(e) = self.core.bus.send_alarm_request(request).await {
            self.pending.take(correlation_id);
            warn!(
                error = %e,
                incident = %incident.address(),
                "failed to issue monitoring cancel; incident left in CANCELLING"
            );
        } else {
            info!(incident = %incident.address(), %correlation_id, "monitoring cancel issued");
        }
        Ok(CancelDisposition::Pending)
    }

    async fn notify(
        &self,
        ctx: &PlaceContext,
        incident: &AlarmIncident,
        triggers: &[IncidentTrigger],
    ) -> Result<()> {
        let ttl = self.core.config.alert_timeout();
        self.core
            .bus
            .send_alarm_request(AlarmServiceRequest::AddAlarm {
                correlation_id: Uuid::new_v4(),
                place_id: ctx.place_id(),
                incident: incident.address(),
                alert: incident.alert,
                alerts: incident.alerts().collect(),
                triggers: triggers.to_vec(),
                ttl,
            })
            .await
    }

    async fn on_incident_verified(
        &self,
        ctx: &PlaceContext,
        incident: &AlarmIncident,
        actor: &str,
    ) -> Result<()> {
        let trigger = IncidentTrigger::verified_alarm(incident.alert, actor);
        if incident.alert_state == AlertState::Prealert {
            // Escalate to ALERT; add_alert notifies with the synthesized
            // trigger and records it as last-sent, so the update_incident
            // that follows does not notify twice.
            self.add_alert(ctx, incident.alert, &[trigger], true).await?;
        } else if let Err(e) = self.notify(ctx, incident, &[trigger]).await {
            warn!(error = %e, incident = %incident.address(), "verification notification failed");
        }
        Ok(())
    }
}
