// src/service/dispatcher.rs - Per-request routing across service variants
//
// Stateless: mock/hub/platform resolution happens fresh on every mutating
// call. Reads always go through the platform view, since incident records
// live in one store regardless of routing.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::bus::{CancelMethod, MessageBus};
use crate::config::IncidentConfig;
use crate::context::{AlarmProvider, PlaceContext, PlaceDirectory};
use crate::error::Result;
use crate::history::HistorySink;
use crate::incident::{AlarmIncident, AlertType, IncidentAddress};
use crate::store::IncidentStore;
use crate::trigger::IncidentTrigger;

use super::{
    HubIncidentService, IncidentService, MockIncidentService, PlatformIncidentService, ServiceCore,
};

/// One uniform incident API over the platform, hub and mock services.
pub struct IncidentDispatcher {
    platform: Arc<PlatformIncidentService>,
    hub: Arc<HubIncidentService>,
    mock: Arc<MockIncidentService>,
}

impl IncidentDispatcher {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        bus: Arc<dyn MessageBus>,
        history: Arc<dyn HistorySink>,
        config: IncidentConfig,
        places: Arc<PlaceDirectory>,
    ) -> Self {
        let core = ServiceCore::new(store, bus, history, config);
        let platform = Arc::new(PlatformIncidentService::new(core.clone(), places));
        let hub = Arc::new(HubIncidentService::new(Arc::clone(&platform)));
        let mock = Arc::new(MockIncidentService::new(core));
        Self {
            platform,
            hub,
            mock,
        }
    }

    /// Start the platform's pending-cancel sweeper.
    pub fn start(&self) -> JoinHandle<()> {
        self.platform.spawn_sweeper()
    }

    pub fn platform(&self) -> &Arc<PlatformIncidentService> {
        &self.platform
    }

    pub fn hub(&self) -> &Arc<HubIncidentService> {
        &self.hub
    }

    pub fn mock(&self) -> &Arc<MockIncidentService> {
        &self.mock
    }

    /// Resolve the service a mutating call routes to: mock wins if the
    /// current incident is a mock incident (or, with none open, if the place
    /// is in test mode); otherwise the place's alarm provider decides.
    async fn service_for(&self, ctx: &PlaceContext) -> Result<Arc<dyn IncidentService>> {
        let current = self.platform.current_incident(ctx).await?;
        let is_mock = match &current {
            Some(incident) => incident.mock_incident,
            None => ctx.test_mode(),
        };
        let service: Arc<dyn IncidentService> = if is_mock {
            self.mock.clone()
        } else if ctx.alarm_provider() == AlarmProvider::Hub {
            self.hub.clone()
        } else {
            self.platform.clone()
        };
        Ok(service)
    }

    // ---- reads: always the platform-authoritative view ----

    pub async fn current_incident(&self, ctx: &PlaceContext) -> Result<Option<AlarmIncident>> {
        self.platform.current_incident(ctx).await
    }

    pub async fn incident(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
    ) -> Result<AlarmIncident> {
        self.platform.incident(ctx, address).await
    }

    pub async fn list_incidents(&self, ctx: &PlaceContext) -> Result<Vec<AlarmIncident>> {
        self.platform.list_incidents(ctx).await
    }

    // ---- mutations: routed per call ----

    pub async fn add_pre_alert(
        &self,
        ctx: &PlaceContext,
        alarm: AlertType,
        prealert_end: DateTime<Utc>,
        triggers: &[IncidentTrigger],
    ) -> Result<IncidentAddress> {
        self.service_for(ctx)
            .await?
            .add_pre_alert(ctx, alarm, prealert_end, triggers)
            .await
    }

    pub async fn add_alert(
        &self,
        ctx: &PlaceContext,
        alarm: AlertType,
        triggers: &[IncidentTrigger],
        send_notifications: bool,
    ) -> Result<IncidentAddress> {
        self.service_for(ctx)
            .await?
            .add_alert(ctx, alarm, triggers, send_notifications)
            .await
    }

    pub async fn update_incident(
        &self,
        ctx: &PlaceContext,
        triggers: &[IncidentTrigger],
        send_notifications: bool,
    ) -> Result<()> {
        self.service_for(ctx)
            .await?
            .update_incident(ctx, triggers, send_notifications)
            .await
    }

    pub async fn update_incident_history(
        &self,
        ctx: &PlaceContext,
        triggers: &[IncidentTrigger],
    ) -> Result<()> {
        self.service_for(ctx)
            .await?
            .update_incident_history(ctx, triggers)
            .await
    }

    pub async fn on_hub_connectivity_changed(
        &self,
        ctx: &PlaceContext,
        connected: bool,
    ) -> Result<()> {
        self.service_for(ctx)
            .await?
            .on_hub_connectivity_changed(ctx, connected)
            .await
    }

    pub async fn verify(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
        actor: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        self.service_for(ctx).await?.verify(ctx, address, actor).await
    }

    pub async fn cancel(
        &self,
        ctx: &PlaceContext,
        cancelled_by: &str,
        method: CancelMethod,
    ) -> Result<Option<AlarmIncident>> {
        self.service_for(ctx)
            .await?
            .cancel(ctx, cancelled_by, method)
            .await
    }

    pub async fn cancel_for(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
        cancelled_by: &str,
        method: CancelMethod,
    ) -> Result<Option<AlarmIncident>> {
        self.service_for(ctx)
            .await?
            .cancel_for(ctx, address, cancelled_by, method)
            .await
    }

    pub async fn on_incident_updated(
        &self,
        ctx: &PlaceContext,
        address: IncidentAddress,
        monitoring_state: &str,
    ) -> Result<()> {
        self.service_for(ctx)
            .await?
            .on_incident_updated(ctx, address, monitoring_state)
            .await
    }
}
