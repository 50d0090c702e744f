// src/trigger.rs - Triggering events attached to incidents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::incident::AlertType;

/// What kind of device or actor event tripped (or extended) an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerEvent {
    Motion,
    Contact,
    GlassBreak,
    Smoke,
    Co,
    Leak,
    Panic,
    Rule,
    Behavior,
    /// Synthesized when a person or rule verifies the alarm is real
    VerifiedAlarm,
}

/// One triggering event attached to an incident.
///
/// Triggers feed the history sink and outbound notifications; they are not
/// stored on the incident record itself (the tracker log is).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentTrigger {
    pub time: DateTime<Utc>,
    /// Alarm category this trigger belongs to
    pub alarm: AlertType,
    pub event: TriggerEvent,
    /// Address of the device or actor that produced the event
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IncidentTrigger {
    pub fn new(alarm: AlertType, event: TriggerEvent, source: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            alarm,
            event,
            source: source.into(),
            message: None,
        }
    }

    /// Synthesized verification trigger attributed to the verifying actor.
    pub fn verified_alarm(alarm: AlertType, actor: impl Into<String>) -> Self {
        Self::new(alarm, TriggerEvent::VerifiedAlarm, actor)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attribute map handed to the history sink.
    pub fn attributes(&self) -> BTreeMap<&'static str, Json> {
        let mut map = BTreeMap::new();
        map.insert(
            "time",
            serde_json::to_value(self.time).unwrap_or(Json::Null),
        );
        map.insert(
            "alarm",
            serde_json::to_value(self.alarm).unwrap_or(Json::Null),
        );
        map.insert(
            "event",
            serde_json::to_value(self.event).unwrap_or(Json::Null),
        );
        map.insert("source", Json::String(self.source.clone()));
        if let Some(message) = &self.message {
            map.insert("message", Json::String(message.clone()));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verified_alarm_attribution() {
        let trigger = IncidentTrigger::verified_alarm(AlertType::Security, "person:42");
        assert_eq!(trigger.event, TriggerEvent::VerifiedAlarm);
        assert_eq!(trigger.source, "person:42");
    }

    #[test]
    fn test_attributes_include_message_only_when_set() {
        let trigger = IncidentTrigger::new(AlertType::Smoke, TriggerEvent::Smoke, "dev:1");
        assert!(!trigger.attributes().contains_key("message"));
        let trigger = trigger.with_message("smoke detected");
        assert_eq!(
            trigger.attributes()["message"],
            Json::String("smoke detected".into())
        );
    }
}
