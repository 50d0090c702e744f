// src/incident.rs - Alarm incident entity, lifecycle enums and builder

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IncidentError;

// ==========================================
// SECTION 1: LIFECYCLE ENUMS
// ==========================================

/// Alarm categories an incident can represent.
///
/// An incident carries one primary alert plus any number of additional
/// alerts folded in by later triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Security,
    Panic,
    Smoke,
    Co,
    Water,
    Weather,
    Care,
}

impl AlertType {
    /// Whether a professional monitoring station will act on this category.
    /// WATER, WEATHER and CARE are never monitored.
    pub fn is_monitorable(self) -> bool {
        !matches!(self, AlertType::Water | AlertType::Weather | AlertType::Care)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::Security => "SECURITY",
            AlertType::Panic => "PANIC",
            AlertType::Smoke => "SMOKE",
            AlertType::Co => "CO",
            AlertType::Water => "WATER",
            AlertType::Weather => "WEATHER",
            AlertType::Care => "CARE",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = IncidentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SECURITY" => Ok(AlertType::Security),
            "PANIC" => Ok(AlertType::Panic),
            "SMOKE" => Ok(AlertType::Smoke),
            "CO" => Ok(AlertType::Co),
            "WATER" => Ok(AlertType::Water),
            "WEATHER" => Ok(AlertType::Weather),
            "CARE" => Ok(AlertType::Care),
            other => Err(IncidentError::InvalidParam(format!(
                "unknown alert type '{}'",
                other
            ))),
        }
    }
}

/// Overall incident lifecycle phase.
///
/// The phase only ever advances PREALERT -> ALERT -> CANCELLING -> COMPLETE;
/// the builder silently ignores writes that would regress it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    Prealert,
    Alert,
    Cancelling,
    Complete,
}

impl AlertState {
    fn rank(self) -> u8 {
        match self {
            AlertState::Prealert => 0,
            AlertState::Alert => 1,
            AlertState::Cancelling => 2,
            AlertState::Complete => 3,
        }
    }
}

/// Status of third-party monitoring-station dispatch for an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitoringState {
    None,
    Pending,
    Dispatching,
    Dispatched,
    Refused,
    Failed,
    Cancelled,
}

impl MonitoringState {
    /// Derived audit entry for a monitoring transition, if one is recorded.
    ///
    /// PENDING is pre-dispatch bookkeeping and CANCELLED gets its terminal
    /// tracker entry from incident completion, so neither maps here.
    pub fn tracker_state(self) -> Option<TrackerState> {
        match self {
            MonitoringState::Dispatching => Some(TrackerState::Dispatching),
            MonitoringState::Dispatched => Some(TrackerState::Dispatched),
            MonitoringState::Refused => Some(TrackerState::Refused),
            MonitoringState::Failed => Some(TrackerState::Failed),
            MonitoringState::None | MonitoringState::Pending | MonitoringState::Cancelled => None,
        }
    }
}

impl FromStr for MonitoringState {
    type Err = IncidentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(MonitoringState::None),
            "PENDING" => Ok(MonitoringState::Pending),
            "DISPATCHING" => Ok(MonitoringState::Dispatching),
            "DISPATCHED" => Ok(MonitoringState::Dispatched),
            "REFUSED" => Ok(MonitoringState::Refused),
            "FAILED" => Ok(MonitoringState::Failed),
            "CANCELLED" => Ok(MonitoringState::Cancelled),
            other => Err(IncidentError::InvalidParam(format!(
                "unknown monitoring state '{}'",
                other
            ))),
        }
    }
}

/// States recorded on the append-only tracker log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerState {
    Prealert,
    Alert,
    Cancelled,
    Dispatching,
    Dispatched,
    Refused,
    Failed,
}

impl TrackerState {
    fn key(self) -> &'static str {
        match self {
            TrackerState::Prealert => "incident.prealert",
            TrackerState::Alert => "incident.alert",
            TrackerState::Cancelled => "incident.cancelled",
            TrackerState::Dispatching => "incident.dispatching",
            TrackerState::Dispatched => "incident.dispatched",
            TrackerState::Refused => "incident.refused",
            TrackerState::Failed => "incident.failed",
        }
    }
}

/// Append-only audit entry recorded on state transitions.
///
/// Distinct from history entries: the tracker log is part of the durable
/// incident record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEvent {
    pub time: DateTime<Utc>,
    pub state: TrackerState,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TrackerEvent {
    pub fn new(state: TrackerState) -> Self {
        Self {
            time: Utc::now(),
            state,
            key: state.key().to_string(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ==========================================
// SECTION 2: INCIDENT ADDRESS
// ==========================================

/// Addressable identity of an incident, derived from its id and place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncidentAddress {
    pub place_id: Uuid,
    pub incident_id: Uuid,
}

impl IncidentAddress {
    pub fn new(place_id: Uuid, incident_id: Uuid) -> Self {
        Self {
            place_id,
            incident_id,
        }
    }
}

impl fmt::Display for IncidentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "incident:{}:{}", self.place_id, self.incident_id)
    }
}

impl FromStr for IncidentAddress {
    type Err = IncidentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("incident"), Some(place), Some(id), None) => {
                let place_id = Uuid::parse_str(place)
                    .map_err(|_| IncidentError::InvalidParam(format!("bad address '{}'", s)))?;
                let incident_id = Uuid::parse_str(id)
                    .map_err(|_| IncidentError::InvalidParam(format!("bad address '{}'", s)))?;
                Ok(Self::new(place_id, incident_id))
            }
            _ => Err(IncidentError::InvalidParam(format!("bad address '{}'", s))),
        }
    }
}

// ==========================================
// SECTION 3: INCIDENT ENTITY
// ==========================================

/// The record of one continuous alarm episode at a place.
///
/// Immutable value type: all mutation goes through [`IncidentBuilder`],
/// which copies and overrides. The overall, platform-side and hub-side
/// lifecycle phases are tracked independently so either tier's report can
/// arrive first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmIncident {
    pub id: Uuid,
    pub place_id: Uuid,
    /// Primary alarm category
    pub alert: AlertType,
    /// Other categories folded into the same incident
    pub additional_alerts: BTreeSet<AlertType>,
    pub alert_state: AlertState,
    /// Platform-tracked sub-state; absent until the platform engages
    pub platform_alert_state: Option<AlertState>,
    /// Hub-tracked sub-state; absent for pure-platform incidents
    pub hub_alert_state: Option<AlertState>,
    pub monitoring_state: MonitoringState,
    pub tracker_events: Vec<TrackerEvent>,
    /// True once a person or rule verified the alarm is real
    pub confirmed: bool,
    /// True when the place has professional monitoring and at least one
    /// alert category in the incident is monitorable
    pub monitored: bool,
    /// True when the hub is authoritative for this incident's identity
    pub hub_alarm: bool,
    /// True for simulated incidents routed to the mock station
    pub mock_incident: bool,
    pub cancelled_by: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub prealert_end_time: Option<DateTime<Utc>>,
}

impl AlarmIncident {
    pub fn builder(place_id: Uuid, alert: AlertType) -> IncidentBuilder {
        IncidentBuilder::new(place_id, alert)
    }

    /// Copy this incident into a builder for the next revision.
    pub fn to_builder(&self) -> IncidentBuilder {
        IncidentBuilder {
            incident: self.clone(),
        }
    }

    pub fn address(&self) -> IncidentAddress {
        IncidentAddress::new(self.place_id, self.id)
    }

    /// An incident is open until it reaches COMPLETE.
    pub fn is_open(&self) -> bool {
        self.alert_state != AlertState::Complete
    }

    /// All alert categories on the incident, primary first.
    pub fn alerts(&self) -> impl Iterator<Item = AlertType> + '_ {
        std::iter::once(self.alert).chain(self.additional_alerts.iter().copied())
    }

    /// Timestamp of the most recent tracker entry, if any.
    pub fn last_tracker_time(&self) -> Option<DateTime<Utc>> {
        self.tracker_events.last().map(|t| t.time)
    }

    /// Full attribute snapshot, used for the initial `Added` event.
    pub fn attributes(&self) -> BTreeMap<&'static str, Json> {
        let mut map = BTreeMap::new();
        map.insert("id", jv(&self.id));
        map.insert("place_id", jv(&self.place_id));
        map.insert("address", Json::String(self.address().to_string()));
        map.insert("alert", jv(&self.alert));
        map.insert("additional_alerts", jv(&self.additional_alerts));
        map.insert("alert_state", jv(&self.alert_state));
        map.insert("platform_alert_state", jv(&self.platform_alert_state));
        map.insert("hub_alert_state", jv(&self.hub_alert_state));
        map.insert("monitoring_state", jv(&self.monitoring_state));
        map.insert("tracker_events", jv(&self.tracker_events));
        map.insert("confirmed", Json::Bool(self.confirmed));
        map.insert("monitored", Json::Bool(self.monitored));
        map.insert("hub_alarm", Json::Bool(self.hub_alarm));
        map.insert("mock_incident", Json::Bool(self.mock_incident));
        map.insert("cancelled_by", jv(&self.cancelled_by));
        map.insert("start_time", jv(&self.start_time));
        map.insert("end_time", jv(&self.end_time));
        map.insert("prealert_end_time", jv(&self.prealert_end_time));
        map
    }

    /// Map of attributes that differ from `previous`, used for
    /// `ValueChanged` events. Identity fields never change and are not
    /// compared.
    pub fn diff(&self, previous: &AlarmIncident) -> BTreeMap<&'static str, Json> {
        let mut changes = BTreeMap::new();
        if self.alert != previous.alert {
            changes.insert("alert", jv(&self.alert));
        }
        if self.additional_alerts != previous.additional_alerts {
            changes.insert("additional_alerts", jv(&self.additional_alerts));
        }
        if self.alert_state != previous.alert_state {
            changes.insert("alert_state", jv(&self.alert_state));
        }
        if self.platform_alert_state != previous.platform_alert_state {
            changes.insert("platform_alert_state", jv(&self.platform_alert_state));
        }
        if self.hub_alert_state != previous.hub_alert_state {
            changes.insert("hub_alert_state", jv(&self.hub_alert_state));
        }
        if self.monitoring_state != previous.monitoring_state {
            changes.insert("monitoring_state", jv(&self.monitoring_state));
        }
        if self.tracker_events != previous.tracker_events {
            changes.insert("tracker_events", jv(&self.tracker_events));
        }
        if self.confirmed != previous.confirmed {
            changes.insert("confirmed", Json::Bool(self.confirmed));
        }
        if self.monitored != previous.monitored {
            changes.insert("monitored", Json::Bool(self.monitored));
        }
        if self.cancelled_by != previous.cancelled_by {
            changes.insert("cancelled_by", jv(&self.cancelled_by));
        }
        if self.end_time != previous.end_time {
            changes.insert("end_time", jv(&self.end_time));
        }
        if self.prealert_end_time != previous.prealert_end_time {
            changes.insert("prealert_end_time", jv(&self.prealert_end_time));
        }
        changes
    }
}

fn jv<T: Serialize>(value: &T) -> Json {
    serde_json::to_value(value).unwrap_or(Json::Null)
}

// ==========================================
// SECTION 4: BUILDER
// ==========================================

/// Copy-and-override builder for [`AlarmIncident`].
///
/// Pure value construction: no side effects, no I/O. Every `with_`/`add_`
/// call returns the builder; `build` yields the next immutable revision.
#[derive(Debug, Clone)]
pub struct IncidentBuilder {
    incident: AlarmIncident,
}

impl IncidentBuilder {
    pub fn new(place_id: Uuid, alert: AlertType) -> Self {
        Self {
            incident: AlarmIncident {
                id: Uuid::new_v4(),
                place_id,
                alert,
                additional_alerts: BTreeSet::new(),
                alert_state: AlertState::Prealert,
                platform_alert_state: None,
                hub_alert_state: None,
                monitoring_state: MonitoringState::None,
                tracker_events: Vec::new(),
                confirmed: false,
                monitored: false,
                hub_alarm: false,
                mock_incident: false,
                cancelled_by: None,
                start_time: Utc::now(),
                end_time: None,
                prealert_end_time: None,
            },
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.incident.id = id;
        self
    }

    /// Advance the overall lifecycle phase. Writes that would regress the
    /// phase are ignored.
    pub fn with_alert_state(mut self, state: AlertState) -> Self {
        if state.rank() >= self.incident.alert_state.rank() {
            self.incident.alert_state = state;
        }
        self
    }

    pub fn with_platform_state(mut self, state: AlertState) -> Self {
        self.incident.platform_alert_state = Some(state);
        self
    }

    pub fn with_hub_state(mut self, state: AlertState) -> Self {
        self.incident.hub_alert_state = Some(state);
        self
    }

    pub fn with_monitoring_state(mut self, state: MonitoringState) -> Self {
        self.incident.monitoring_state = state;
        self
    }

    pub fn with_confirmed(mut self, confirmed: bool) -> Self {
        self.incident.confirmed = confirmed;
        self
    }

    pub fn with_monitored(mut self, monitored: bool) -> Self {
        self.incident.monitored = monitored;
        self
    }

    pub fn with_hub_alarm(mut self, hub_alarm: bool) -> Self {
        self.incident.hub_alarm = hub_alarm;
        self
    }

    pub fn with_mock(mut self, mock: bool) -> Self {
        self.incident.mock_incident = mock;
        self
    }

    pub fn with_cancelled_by(mut self, cancelled_by: impl Into<String>) -> Self {
        self.incident.cancelled_by = Some(cancelled_by.into());
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.incident.end_time = Some(end_time);
        self
    }

    pub fn with_prealert_end_time(mut self, end: DateTime<Utc>) -> Self {
        self.incident.prealert_end_time = Some(end);
        self
    }

    /// Fold another alarm category into the incident.
    pub fn add_alert(mut self, alert: AlertType) -> Self {
        if alert != self.incident.alert {
            self.incident.additional_alerts.insert(alert);
        }
        self
    }

    /// Append a tracker entry. A second ALERT entry for an incident that
    /// already carries one is dropped.
    pub fn add_tracker(mut self, event: TrackerEvent) -> Self {
        if event.state == TrackerState::Alert
            && self
                .incident
                .tracker_events
                .iter()
                .any(|t| t.state == TrackerState::Alert)
        {
            return self;
        }
        self.incident.tracker_events.push(event);
        self
    }

    pub fn build(self) -> AlarmIncident {
        self.incident
    }
}

// ==========================================
// SECTION 5: TESTS
// ==========================================
