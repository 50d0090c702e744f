// src/context.rs - Per-place execution context and place directory

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::sync::Arc;
use uuid::Uuid;

use crate::trigger::IncidentTrigger;

/// Which tier runs the place's alarm logic.
///
/// Resolved once at the service boundary from place configuration; business
/// logic only ever sees this closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmProvider {
    Platform,
    Hub,
}

impl Default for AlarmProvider {
    fn default() -> Self {
        AlarmProvider::Platform
    }
}

/// Mirror of the hub's reported state for a place.
#[derive(Debug, Clone, Default)]
pub struct HubModel {
    pub connected: bool,
    /// The hub's live "current incident" attribute
    pub current_incident: Option<Uuid>,
    /// Triggers already present in the hub's security-alarm model
    pub security_triggers: Vec<IncidentTrigger>,
}

/// Per-place execution context.
///
/// Incident logic for one place runs on that place's serialized execution
/// domain, supplied by the subsystem executor; the context itself only
/// needs to be internally consistent for readers on other tasks (the mock
/// scheduler, the response dispatcher), hence the concurrent var map and
/// the lock around the hub mirror.
#[derive(Debug)]
pub struct PlaceContext {
    place_id: Uuid,
    population: String,
    professionally_monitored: bool,
    test_mode: bool,
    alarm_provider: AlarmProvider,
    vars: DashMap<String, Json>,
    hub: RwLock<HubModel>,
}

const VAR_CURRENT_INCIDENT: &str = "incident.current";
const VAR_LAST_TRIGGER_SENT: &str = "incident.last_trigger_sent";

impl PlaceContext {
    pub fn new(place_id: Uuid, population: impl Into<String>) -> Self {
        Self {
            place_id,
            population: population.into(),
            professionally_monitored: false,
            test_mode: false,
            alarm_provider: AlarmProvider::default(),
            vars: DashMap::new(),
            hub: RwLock::new(HubModel::default()),
        }
    }

    pub fn with_monitored(mut self, monitored: bool) -> Self {
        self.professionally_monitored = monitored;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_alarm_provider(mut self, provider: AlarmProvider) -> Self {
        self.alarm_provider = provider;
        self
    }

    pub fn place_id(&self) -> Uuid {
        self.place_id
    }

    pub fn population(&self) -> &str {
        &self.population
    }

    /// Whether the place subscribes to professional monitoring.
    pub fn professionally_monitored(&self) -> bool {
        self.professionally_monitored
    }

    /// Place-level flag routing new incidents to the mock station.
    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn alarm_provider(&self) -> AlarmProvider {
        self.alarm_provider
    }

    // ---- place variables ----

    /// The place's "current incident" pointer.
    pub fn current_incident(&self) -> Option<Uuid> {
        self.vars
            .get(VAR_CURRENT_INCIDENT)
            .and_then(|v| serde_json::from_value(v.value().clone()).ok())
    }

    pub fn set_current_incident(&self, incident: Option<Uuid>) {
        match incident {
            Some(id) => {
                if let Ok(value) = serde_json::to_value(id) {
                    self.vars.insert(VAR_CURRENT_INCIDENT.to_string(), value);
                }
            }
            None => {
                self.vars.remove(VAR_CURRENT_INCIDENT);
            }
        }
    }

    /// Timestamp of the most recent trigger already sent in a notification,
    /// used to dedup the `update_incident` immediately following `add_alert`.
    pub fn last_trigger_sent(&self) -> Option<DateTime<Utc>> {
        self.vars
            .get(VAR_LAST_TRIGGER_SENT)
            .and_then(|v| serde_json::from_value(v.value().clone()).ok())
    }

    pub fn set_last_trigger_sent(&self, time: Option<DateTime<Utc>>) {
        match time {
            Some(t) => {
                if let Ok(value) = serde_json::to_value(t) {
                    self.vars.insert(VAR_LAST_TRIGGER_SENT.to_string(), value);
                }
            }
            None => {
                self.vars.remove(VAR_LAST_TRIGGER_SENT);
            }
        }
    }

    // ---- hub model mirror ----

    pub fn hub(&self) -> HubModel {
        self.hub.read().clone()
    }

    pub fn update_hub(&self, update: impl FnOnce(&mut HubModel)) {
        update(&mut self.hub.write());
    }

    /// The hub's live current-incident attribute, if reported.
    pub fn hub_current_incident(&self) -> Option<Uuid> {
        self.hub.read().current_incident
    }

    pub fn hub_connected(&self) -> bool {
        self.hub.read().connected
    }

    /// Triggers recorded in the hub's security-alarm model.
    pub fn hub_security_triggers(&self) -> Vec<IncidentTrigger> {
        self.hub.read().security_triggers.clone()
    }
}

/// Registry of known places, used to resolve a context for inbound
/// bus messages that only carry a place id.
#[derive(Debug, Default)]
pub struct PlaceDirectory {
    places: DashMap<Uuid, Arc<PlaceContext>>,
}

impl PlaceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ctx: Arc<PlaceContext>) {
        self.places.insert(ctx.place_id(), ctx);
    }

    pub fn get(&self, place_id: Uuid) -> Option<Arc<PlaceContext>> {
        self.places.get(&place_id).map(|e| Arc::clone(e.value()))
    }
}
