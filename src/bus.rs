// src/bus.rs - Message bus boundary: broadcasts, alarm-service requests,
// inbound monitoring-station messages

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{IncidentError, Result};
use crate::incident::{AlertType, IncidentAddress};
use crate::trigger::IncidentTrigger;

/// How a cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelMethod {
    App,
    Keypad,
    Rule,
}

/// Broadcast events emitted on an incident's own address.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentEvent {
    /// First save of a new incident: full attribute snapshot
    Added {
        address: IncidentAddress,
        attributes: BTreeMap<&'static str, Json>,
    },
    /// Subsequent saves: only the changed-field diff
    ValueChanged {
        address: IncidentAddress,
        changes: BTreeMap<&'static str, Json>,
    },
    /// Place-scoped terminal event, broadcast exactly once per incident
    Completed {
        place_id: Uuid,
        address: IncidentAddress,
    },
}

/// Requests sent to the external alarm-service address. Both carry a
/// correlation id and a time-to-live; no response is awaited synchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmServiceRequest {
    AddAlarm {
        correlation_id: Uuid,
        place_id: Uuid,
        incident: IncidentAddress,
        alert: AlertType,
        alerts: Vec<AlertType>,
        triggers: Vec<IncidentTrigger>,
        ttl: Duration,
    },
    CancelAlarm {
        correlation_id: Uuid,
        place_id: Uuid,
        incident: IncidentAddress,
        cancelled_by: String,
        method: CancelMethod,
        ttl: Duration,
    },
}

impl AlarmServiceRequest {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            AlarmServiceRequest::AddAlarm { correlation_id, .. }
            | AlarmServiceRequest::CancelAlarm { correlation_id, .. } => *correlation_id,
        }
    }
}

/// Error payload carried by a monitoring-station response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

/// Inbound messages from the monitoring integration, keyed by correlation id.
#[derive(Debug, Clone)]
pub enum MonitoringMessage {
    CancelResponse {
        correlation_id: Uuid,
        result: std::result::Result<(), RemoteError>,
    },
}

/// The platform message bus as seen by the incident services.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn broadcast(&self, event: IncidentEvent) -> Result<()>;

    async fn send_alarm_request(&self, request: AlarmServiceRequest) -> Result<()>;
}

/// Channel-backed bus used by the demo binary and tests. The receivers
/// returned by [`ChannelBus::new`] stand in for the platform's delivery
/// plumbing.
#[derive(Debug)]
pub struct ChannelBus {
    events: mpsc::UnboundedSender<IncidentEvent>,
    requests: mpsc::UnboundedSender<AlarmServiceRequest>,
}

impl ChannelBus {
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<IncidentEvent>,
        mpsc::UnboundedReceiver<AlarmServiceRequest>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        (
            Self {
                events: events_tx,
                requests: requests_tx,
            },
            events_rx,
            requests_rx,
        )
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn broadcast(&self, event: IncidentEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|e| IncidentError::Bus(e.to_string()))
    }

    async fn send_alarm_request(&self, request: AlarmServiceRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|e| IncidentError::Bus(e.to_string()))
    }
}
