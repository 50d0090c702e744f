// src/service/mod.rs - Shared incident lifecycle
//
// The lifecycle operations live as default methods on `IncidentService`;
// the platform, hub and mock variants override only the hooks that differ
// (cancel issuance, incident resolution/identity, verification behavior,
// post-alert side effects).

mod dispatcher;
mod hub;
mod mock;
mod platform;

pub use dispatcher::IncidentDispatcher;
pub use hub::HubIncidentService;
pub use mock::MockIncidentService;
pub use platform::PlatformIncidentService;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::bus::{CancelMethod, IncidentEvent, MessageBus};
use crate::config::IncidentConfig;
use crate::context::PlaceContext;
use crate::error::{IncidentError, Result};
use crate::history::HistorySink;
use crate::incident::{
    AlarmIncident, AlertState, AlertType, IncidentAddress, IncidentBuilder, MonitoringState,
    TrackerEvent, TrackerState,
};
use crate::store::IncidentStore;
use crate::trigger::IncidentTrigger;

/// Outcome of a variant's `do_cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDisposition {
    /// The platform side of the cancellation finished synchronously
    Completed,
    /// A correlated response (or its timeout) will drive the incident later
    Pending,
}

/// Injected collaborators shared by every service variant.
#[derive(Clone)]
pub struct ServiceCore {
    pub(crate) store: Arc<dyn IncidentStore>,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) history: Arc<dyn HistorySink>,
    pub(crate) config: IncidentConfig,
}

impl ServiceCore {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        bus: Arc<dyn MessageBus>,
        history: Arc<dyn HistorySink>,
        config: IncidentConfig,
    ) -> Self {
        Self {
            store,
            bus,
            history,
            config,
        }
    }

    /// Persist a revision and emit exactly one change event: `Added` with the
    /// full snapshot on first save, `ValueChanged` with the field diff after
    /// that. A re-save that changes nothing is persisted but not broadcast.
    pub async fn save(
        &self,
        previous: Option<&AlarmIncident>,
        updated: &AlarmIncident,
    ) -> Result<()> {
        self.store.upsert(updated).await?;
        match previous {
            None => {
                self.bus
                    .broadcast(IncidentEvent::Added {
                        address: updated.address(),
                        attributes: updated.attributes(),
                    })
                    .await
            }
            Some(previous) => {
                let changes = updated.diff(previous);
                if changes.is_empty() {
                    trace!(incident = %updated.address(), "save produced no changes; skipping event");
                    return Ok(());
                }
                self.bus
                    .broadcast(IncidentEvent::ValueChanged {
                        address: updated.address(),
                        changes,
                    })
                    .await
            }
        }
    }
}

/// One uniform incident lifecycle, shared by the platform, hub and mock
/// variants. Callers must invoke these on the owning place's serialized
/// execution domain; the services hold no locks of their own.
#[async_trait]
pub trait IncidentService: Send + Sync {
    fn core(&self) -> &ServiceCore;

    // ---- variant hooks ----

    /// Issue the platform-side cancellation for an incident.
    async fn do_cancel(
        &self,
        ctx: &PlaceContext,
        incident: &AlarmIncident,
        cancelled_by: &str,
        method: CancelMethod,
    ) -> Result<CancelDisposition>;

    /// Pre-flight check run before any cancel state transition is persisted.
    async fn validate_cancel(&self, _ctx: &PlaceContext, _incident: &AlarmIncident) -> Result<()> {
        Ok(())
    }

    /// Resolve the incident a mutating trigger applies to.
    async fn active_incident(&self, ctx: &PlaceContext) -> Result<Option<AlarmIncident>> {
        if let Some(id) = ctx.current_incident() {
            if let Some(incident) = self.core().store.find_by_id(ctx.place_id(), id).await? {
                if incident.is_open() {
                    return Ok(Some(incident));
                }
            }
        }
        self.core().store.current(ctx.place_id()).await
    }

    /// Start a builder for a brand-new incident.
    fn build_incident(&self, ctx: &PlaceContext, alarm: AlertType) -> Result<IncidentBuilder> {
        Ok(AlarmIncident::builder(ctx.place_id(), alarm))
    }

    /// Record which tier originated a PREALERT.
    fn mark_prealert_tier(&self, builder: IncidentBuilder) -> IncidentBuilder {
        builder.with_platform_state(AlertState::Prealert)
    }

    /// Record which tier originated an ALERT.
    fn mark_alert_tier(&self, builder: IncidentBuilder) -> IncidentBuilder {
        builder.with_platform_state(AlertState::Alert)
    }

    /// Issue an outbound alert notification. Base behavior is none; the
    /// platform variant talks to the alarm service.
    async fn notify(
        &self,
        _ctx: &PlaceContext,
        _incident: &AlarmIncident,
        _triggers: &[IncidentTrigger],
    ) -> Result<()> {
        Ok(())
    }

    /// Hook run after an alert has been created or escalated and saved.
    async fn after_alert(
        &self,
        _ctx: &PlaceContext,
        _incident: &AlarmIncident,
        _alarm: AlertType,
    ) -> Result<()> {
        Ok(())
    }

    /// Hook run the first time an incident is confirmed.
    async fn on_incident_verified(
        &self,
        _ctx: &PlaceContext,
        _incident: &AlarmIncident,
        _actor: &str,
    ) -> Result<()> {
        Ok(())
    }

    // ---- reads (platform-authoritative view) ----

    async fn current_incident(&self, ctx: &PlaceContext) -> Result<Option<AlarmIncident>> {
        self.core().store.current(ctx.place_id()).await
    }

    async fn incident(&self, ctx: &PlaceContext, address: IncidentAddress) -> Result<AlarmIncident> {
        self.core()
            .store
            .find_by_id(ctx.place_id(), address.incident_id)
            .await?
            .ok_or_else(|| IncidentError::NotFound(address.to_string()))
    }

    async fn list_incidents(&self, ctx: &PlaceContext) -> Result<Vec<AlarmIncident>> {
        self.core()
            .store
            .list_by_place(ctx.place_id(), self.core().config.max_incidents_listed)
            .await
    }

    // ---- lifecycle ----

    /// Open a PREALERT incident, or join the one already open (idempotent).
    async fn add_pre_alert(
        &self,
        ctx: &PlaceContext,
        alarm: AlertType,
        prealert_end: DateTime<Utc>,
        triggers: &[IncidentTrigger],
    ) -> Result<IncidentAddress> {
        if let Some(open) = self.active_incident(ctx).await?.filter(AlarmIncident::is_open) {
            ctx.set_current_incident(Some(open.id));
            return Ok(open.address());
        }

        let builder = self
            .build_incident(ctx, alarm)?
            .with_prealert_end_time(prealert_end);
        let incident = self
            .mark_prealert_tier(builder)
            .add_tracker(TrackerEvent::new(TrackerState::Prealert))
            .build();

        self.core().save(None, &incident).await?;
        ctx.set_current_incident(Some(incident.id));
        self.record_history_triggers(ctx, incident.address(), triggers)
            .await;
        info!(incident = %incident.address(), alarm = %alarm, "prealert opened");
        Ok(incident.address())
    }

    /// Create an incident in ALERT, or escalate the open one.
    async fn add_alert(
        &self,
        ctx: &PlaceContext,
        alarm: AlertType,
        triggers: &[IncidentTrigger],
        send_notifications: bool,
    ) -> Result<IncidentAddress> {
        let existing = self.active_incident(ctx).await?.filter(AlarmIncident::is_open);

        let monitored = ctx.professionally_monitored()
            && match &existing {
                Some(open) => open
                    .alerts()
                    .chain(std::iter::once(alarm))
                    .any(AlertType::is_monitorable),
                None => alarm.is_monitorable(),
            };

        let (previous, builder) = match existing {
            Some(open) => {
                let builder = open.to_builder().add_alert(alarm);
                (Some(open), builder)
            }
            None => (None, self.build_incident(ctx, alarm)?),
        };

        let builder = builder.with_alert_state(AlertState::Alert).with_monitored(monitored);
        let incident = self
            .mark_alert_tier(builder)
            .add_tracker(TrackerEvent::new(TrackerState::Alert))
            .build();

        self.core().save(previous.as_ref(), &incident).await?;
        ctx.set_current_incident(Some(incident.id));
        self.record_history_triggers(ctx, incident.address(), triggers)
            .await;

        if send_notifications {
            if let Err(e) = self.notify(ctx, &incident, triggers).await {
                warn!(error = %e, incident = %incident.address(), "alert notification failed");
            }
            if let Some(last) = triggers.last() {
                ctx.set_last_trigger_sent(Some(last.time));
            }
        }

        self.after_alert(ctx, &incident, alarm).await?;
        info!(incident = %incident.address(), alarm = %alarm, "alert raised");
        Ok(incident.address())
    }

    /// Attach more triggers to the open incident without changing its state.
    /// Skips re-notifying when the trailing trigger was already sent by the
    /// `add_alert` in the same logical step.
    async fn update_incident(
        &self,
        ctx: &PlaceContext,
        triggers: &[IncidentTrigger],
        send_notifications: bool,
    ) -> Result<()> {
        let incident = self
            .active_incident(ctx)
            .await?
            .filter(AlarmIncident::is_open)
            .ok_or_else(|| {
                IncidentError::NotFound(format!("no open incident for place {}", ctx.place_id()))
            })?;

        self.record_history_triggers(ctx, incident.address(), triggers)
            .await;

        if send_notifications {
            let already_sent = match triggers.last() {
                Some(last) => ctx.last_trigger_sent() == Some(last.time),
                None => true,
            };
            if already_sent {
                debug!(incident = %incident.address(), "trailing trigger already notified; skipping");
            } else {
                if let Err(e) = self.notify(ctx, &incident, triggers).await {
                    warn!(error = %e, incident = %incident.address(), "update notification failed");
                }
                if let Some(last) = triggers.last() {
                    ctx.set_last_trigger_sent(Some(last.time));
                }
            }
        }
        Ok(())
    }

    /// History-only attachment: no state change, no notification.
    async fn update_incident_history(
        &self,
        ctx: &PlaceContext,
        triggers: &[IncidentTrigger],
    ) -> Result<()> {
        match self.core().store.current(ctx.place_id()).await? {
            Some(incident) => {
                self.record_history_triggers(ctx, incident.address(), triggers)
                    .await;
            }
            None => {
                warn!(place = %ctx.place_id(), "history update with no open incident; dropped");
            }
        }
        Ok(())
    }

    /// Forward a history entry when the hub's connection state changes while
    /// an incident is open.
    async fn on_hub_connectivity_changed(&self, ctx: &PlaceContext, connected: bool) -> Result<()> {
        ctx.update_hub(|hub| hub.connected = connected);
        if let Some(incident) = self.core().store.current(ctx.place_id()).await? {
            if let Err(e) = self
                .core()
                .history
                .hub_connectivity_changed(ctx.place_id(), ctx.population(), incident.address(), connected)
                .await
            {
                warn!(error = %e, "failed to record hub connectivity history");
            }
        }
        Ok(())
    }

    /// Confirm the alarm is real. Idempotent: the second confirmation
    /// returns `None` and triggers no further behavior.
    async fn verify(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
        actor: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let incident = self.incident(ctx, address).await?;
        if !incident.is_open() {
            return Err(IncidentError::InvalidRequest(format!(
                "cannot verify completed incident {}",
                address
            )));
        }
        if incident.confirmed {
            return Ok(None);
        }

        let updated = incident.to_builder().with_confirmed(true).build();
        self.core().save(Some(&incident), &updated).await?;
        let verified_at = Utc::now();
        self.on_incident_verified(ctx, &updated, actor).await?;
        info!(incident = %address, actor = %actor, "incident verified");
        Ok(Some(verified_at))
    }

    /// Cancel the place's current incident.
    async fn cancel(
        &self,
        ctx: &PlaceContext,
        cancelled_by: &str,
        method: CancelMethod,
    ) -> Result<Option<AlarmIncident>> {
        let id = match ctx.current_incident() {
            Some(id) => Some(id),
            None => self.core().store.current(ctx.place_id()).await?.map(|i| i.id),
        };
        let id = id.ok_or_else(|| {
            IncidentError::NotFound(format!("no current incident for place {}", ctx.place_id()))
        })?;
        self.cancel_for(ctx, IncidentAddress::new(ctx.place_id(), id), cancelled_by, method)
            .await
    }

    /// Cancel a specific incident.
    ///
    /// Returns `Ok(None)` only on the repair path: the address was
    /// unresolvable but matched the place's stale current-incident pointer,
    /// so a completion event is synthesized instead of failing.
    async fn cancel_for(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
        cancelled_by: &str,
        method: CancelMethod,
    ) -> Result<Option<AlarmIncident>> {
        let found = self
            .core()
            .store
            .find_by_id(ctx.place_id(), address.incident_id)
            .await?;
        let mut incident = match found {
            Some(incident) => incident,
            None => {
                if ctx.current_incident() == Some(address.incident_id) {
                    // Self-healing shortcut: the pointer outlived the record.
                    warn!(incident = %address, "stale current-incident pointer; synthesizing completion");
                    ctx.set_current_incident(None);
                    self.core()
                        .bus
                        .broadcast(IncidentEvent::Completed {
                            place_id: ctx.place_id(),
                            address,
                        })
                        .await?;
                    return Ok(None);
                }
                return Err(IncidentError::NotFound(address.to_string()));
            }
        };

        self.validate_cancel(ctx, &incident).await?;

        // Move an active incident into CANCELLING.
        if matches!(incident.alert_state, AlertState::Prealert | AlertState::Alert) {
            let updated = incident
                .to_builder()
                .with_alert_state(AlertState::Cancelling)
                .with_cancelled_by(cancelled_by)
                .build();
            self.core().save(Some(&incident), &updated).await?;
            if let Err(e) = self
                .core()
                .history
                .cancelled(ctx.place_id(), ctx.population(), address, cancelled_by, method)
                .await
            {
                warn!(error = %e, "failed to record cancellation history");
            }
            incident = updated;
        }

        // Reconcile the hub side. Either tier's report can arrive first;
        // only state the hub has actually reported is advanced here.
        if incident.hub_alarm
            && matches!(
                incident.hub_alert_state,
                Some(AlertState::Cancelling) | Some(AlertState::Complete)
            )
        {
            if ctx.hub_current_incident().is_none() {
                let updated = incident
                    .to_builder()
                    .with_hub_state(AlertState::Complete)
                    .build();
                self.core().save(Some(&incident), &updated).await?;
                incident = updated;
                if incident.platform_alert_state == Some(AlertState::Complete) {
                    return self.on_completed(ctx, incident).await.map(Some);
                }
            } else {
                // Hub acknowledged the cancel but still reports the
                // incident; nothing further this pass.
                return Ok(Some(incident));
            }
        }

        // Platform side already finished; the hub report will complete it.
        if incident.platform_alert_state == Some(AlertState::Complete) {
            return Ok(Some(incident));
        }

        match self.do_cancel(ctx, &incident, cancelled_by, method).await? {
            CancelDisposition::Completed => self.on_platform_completed(ctx, incident).await.map(Some),
            CancelDisposition::Pending => Ok(Some(incident)),
        }
    }

    /// Apply an external monitoring-state change request. The value is
    /// validated before any mutation; a recognized transition appends its
    /// derived tracker entry.
    async fn on_incident_updated(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
        monitoring_state: &str,
    ) -> Result<()> {
        let state: MonitoringState = monitoring_state.parse()?;
        let incident = self.incident(ctx, address).await?;
        let mut builder = incident.to_builder().with_monitoring_state(state);
        if let Some(tracker) = state.tracker_state() {
            builder = builder.add_tracker(TrackerEvent::new(tracker));
        }
        let updated = builder.build();
        self.core().save(Some(&incident), &updated).await
    }

    /// The platform side of a cancellation finished. Completes the whole
    /// incident unless the hub side is still outstanding.
    async fn on_platform_completed(
        &self,
        ctx: &PlaceContext,
        incident: AlarmIncident,
    ) -> Result<AlarmIncident> {
        let mut builder = incident.to_builder().with_platform_state(AlertState::Complete);
        // A cancel resolving before dispatch began must not leave the
        // monitoring view dangling.
        if matches!(
            incident.monitoring_state,
            MonitoringState::Pending | MonitoringState::Dispatching
        ) {
            builder = builder.with_monitoring_state(MonitoringState::Cancelled);
        }
        let updated = builder.build();
        self.core().save(Some(&incident), &updated).await?;

        if !updated.hub_alarm
            || matches!(updated.hub_alert_state, None | Some(AlertState::Complete))
        {
            self.on_completed(ctx, updated).await
        } else {
            debug!(incident = %updated.address(), "platform side complete; waiting on hub");
            Ok(updated)
        }
    }

    /// Terminal transition: the only way an incident leaves the
    /// non-terminal set. Broadcasts the place-scoped completion event.
    async fn on_completed(
        &self,
        ctx: &PlaceContext,
        incident: AlarmIncident,
    ) -> Result<AlarmIncident> {
        let mut builder = incident
            .to_builder()
            .with_alert_state(AlertState::Complete)
            .with_platform_state(AlertState::Complete)
            .with_end_time(Utc::now())
            .add_tracker(TrackerEvent::new(TrackerState::Cancelled));
        if matches!(
            incident.monitoring_state,
            MonitoringState::Pending | MonitoringState::Dispatching
        ) {
            builder = builder.with_monitoring_state(MonitoringState::Cancelled);
        }
        let updated = builder.build();
        self.core().save(Some(&incident), &updated).await?;

        if ctx.current_incident() == Some(updated.id) {
            ctx.set_current_incident(None);
            ctx.set_last_trigger_sent(None);
        }
        self.core()
            .bus
            .broadcast(IncidentEvent::Completed {
                place_id: ctx.place_id(),
                address: updated.address(),
            })
            .await?;
        info!(incident = %updated.address(), "incident completed");
        Ok(updated)
    }

    /// Forward triggers to the history sink; sink failures are absorbed.
    async fn record_history_triggers(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
        triggers: &[IncidentTrigger],
    ) {
        if triggers.is_empty() {
            return;
        }
        if let Err(e) = self
            .core()
            .history
            .triggers_added(ctx.place_id(), ctx.population(), address, triggers)
            .await
        {
            warn!(error = %e, incident = %address, "failed to record incident history");
        }
    }
}
