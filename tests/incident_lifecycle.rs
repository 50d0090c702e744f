// End-to-end lifecycle tests: the dispatcher wired to the in-memory store
// and the channel bus, exercising the platform, hub and mock routes.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use vigil::{
    AlarmProvider, AlarmServiceRequest, AlertState, AlertType, CancelMethod, ChannelBus,
    HistorySink, IncidentAddress, IncidentConfig, IncidentDispatcher, IncidentError, IncidentEvent,
    IncidentTrigger, MemoryIncidentStore, MonitoringMessage, MonitoringState, PlaceContext,
    PlaceDirectory, RemoteError, Result, TriggerEvent,
};

/// History sink that remembers which entries were delivered.
#[derive(Default)]
struct RecordingHistorySink {
    entries: Mutex<Vec<String>>,
}

impl RecordingHistorySink {
    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistorySink for RecordingHistorySink {
    async fn triggers_added(
        &self,
        _place_id: Uuid,
        _population: &str,
        incident: IncidentAddress,
        triggers: &[IncidentTrigger],
    ) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .push(format!("triggers:{}:{}", incident, triggers.len()));
        Ok(())
    }

    async fn cancelled(
        &self,
        _place_id: Uuid,
        _population: &str,
        incident: IncidentAddress,
        cancelled_by: &str,
        _method: CancelMethod,
    ) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .push(format!("cancelled:{}:{}", incident, cancelled_by));
        Ok(())
    }

    async fn hub_connectivity_changed(
        &self,
        _place_id: Uuid,
        _population: &str,
        incident: IncidentAddress,
        connected: bool,
    ) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .push(format!("connectivity:{}:{}", incident, connected));
        Ok(())
    }
}

struct Harness {
    dispatcher: IncidentDispatcher,
    places: Arc<PlaceDirectory>,
    history: Arc<RecordingHistorySink>,
    events: mpsc::UnboundedReceiver<IncidentEvent>,
    requests: mpsc::UnboundedReceiver<AlarmServiceRequest>,
}

impl Harness {
    fn new(config: IncidentConfig) -> Self {
        let (bus, events, requests) = ChannelBus::new();
        let history = Arc::new(RecordingHistorySink::default());
        let places = Arc::new(PlaceDirectory::new());
        let dispatcher = IncidentDispatcher::new(
            Arc::new(MemoryIncidentStore::new()),
            Arc::new(bus),
            history.clone(),
            config,
            Arc::clone(&places),
        );
        Self {
            dispatcher,
            places,
            history,
            events,
            requests,
        }
    }

    fn place(&self) -> Arc<PlaceContext> {
        self.place_with(|ctx| ctx)
    }

    fn place_with(
        &self,
        configure: impl FnOnce(PlaceContext) -> PlaceContext,
    ) -> Arc<PlaceContext> {
        let ctx = Arc::new(configure(
            PlaceContext::new(Uuid::new_v4(), "general").with_monitored(true),
        ));
        self.places.insert(Arc::clone(&ctx));
        ctx
    }

    fn drain_events(&mut self) -> Vec<IncidentEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn drain_requests(&mut self) -> Vec<AlarmServiceRequest> {
        let mut drained = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            drained.push(request);
        }
        drained
    }
}

fn trigger(alarm: AlertType, event: TriggerEvent) -> IncidentTrigger {
    IncidentTrigger::new(alarm, event, "dev:test")
}

// ---- Scenario A: first smoke alert on a quiet place ----

#[tokio::test]
async fn smoke_alert_opens_incident() {
    let mut harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place();

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Smoke,
            &[trigger(AlertType::Smoke, TriggerEvent::Smoke)],
            true,
        )
        .await
        .unwrap();

    let current = harness
        .dispatcher
        .current_incident(&ctx)
        .await
        .unwrap()
        .expect("incident should be open");
    assert_eq!(current.address(), address);
    assert_eq!(current.alert_state, AlertState::Alert);
    assert_eq!(current.alert, AlertType::Smoke);
    assert!(current.monitored);
    assert_eq!(ctx.current_incident(), Some(current.id));

    // First save broadcast the full snapshot
    let events = harness.drain_events();
    assert!(matches!(events.first(), Some(IncidentEvent::Added { .. })));

    // The alert notification went out with the trigger attached
    let requests = harness.drain_requests();
    assert!(matches!(
        requests.first(),
        Some(AlarmServiceRequest::AddAlarm { triggers, .. }) if triggers.len() == 1
    ));
}

// ---- At most one open incident per place ----

#[tokio::test]
async fn triggers_join_the_open_incident() {
    let harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place();

    let first = harness
        .dispatcher
        .add_pre_alert(
            &ctx,
            AlertType::Security,
            chrono::Utc::now() + chrono::Duration::seconds(30),
            &[trigger(AlertType::Security, TriggerEvent::Motion)],
        )
        .await
        .unwrap();

    // A second prealert joins, a later alert escalates in place
    let second = harness
        .dispatcher
        .add_pre_alert(
            &ctx,
            AlertType::Security,
            chrono::Utc::now() + chrono::Duration::seconds(30),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(first, second);

    let third = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Panic,
            &[trigger(AlertType::Panic, TriggerEvent::Panic)],
            false,
        )
        .await
        .unwrap();
    assert_eq!(first, third);

    let current = harness
        .dispatcher
        .current_incident(&ctx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.alert_state, AlertState::Alert);
    assert_eq!(current.alert, AlertType::Security);
    assert!(current.additional_alerts.contains(&AlertType::Panic));
    // Exactly one ALERT tracker entry despite the repeat escalations
    let alerts = current
        .tracker_events
        .iter()
        .filter(|t| t.key == "incident.alert")
        .count();
    assert_eq!(alerts, 1);
}

// ---- Idempotent verify ----

#[tokio::test]
async fn verify_confirms_exactly_once() {
    let harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place();

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Security,
            &[trigger(AlertType::Security, TriggerEvent::Motion)],
            false,
        )
        .await
        .unwrap();

    let first = harness
        .dispatcher
        .verify(&ctx, address, "person:1")
        .await
        .unwrap();
    assert!(first.is_some());

    let second = harness
        .dispatcher
        .verify(&ctx, address, "person:1")
        .await
        .unwrap();
    assert!(second.is_none());

    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert!(incident.confirmed);
}

// ---- Dedup notification across add_alert + update_incident ----

#[tokio::test]
async fn trailing_trigger_notifies_once() {
    let mut harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place();

    let shared = trigger(AlertType::Security, TriggerEvent::Motion);
    harness
        .dispatcher
        .add_alert(&ctx, AlertType::Security, &[shared.clone()], true)
        .await
        .unwrap();

    // The immediately-following update carries the same trailing trigger
    harness
        .dispatcher
        .update_incident(&ctx, &[shared.clone()], true)
        .await
        .unwrap();

    let notifications = harness
        .drain_requests()
        .into_iter()
        .filter(|r| matches!(r, AlarmServiceRequest::AddAlarm { .. }))
        .count();
    assert_eq!(notifications, 1);

    // A genuinely new trigger notifies again
    let fresh = trigger(AlertType::Security, TriggerEvent::Contact);
    harness
        .dispatcher
        .update_incident(&ctx, &[shared, fresh], true)
        .await
        .unwrap();
    let notifications = harness
        .drain_requests()
        .into_iter()
        .filter(|r| matches!(r, AlarmServiceRequest::AddAlarm { .. }))
        .count();
    assert_eq!(notifications, 1);
}

// ---- Platform cancel: async response completes the incident ----

#[tokio::test]
async fn cancel_completes_on_correlated_response() {
    let mut harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place();

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Security,
            &[trigger(AlertType::Security, TriggerEvent::Motion)],
            true,
        )
        .await
        .unwrap();

    let cancelled = harness
        .dispatcher
        .cancel(&ctx, "person:1", CancelMethod::Keypad)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.alert_state, AlertState::Cancelling);
    assert_eq!(cancelled.cancelled_by.as_deref(), Some("person:1"));

    // The cancel went out with a correlation id and is pending
    let correlation_id = harness
        .drain_requests()
        .into_iter()
        .find_map(|r| match r {
            AlarmServiceRequest::CancelAlarm { correlation_id, .. } => Some(correlation_id),
            _ => None,
        })
        .expect("cancel request should be issued");
    assert_eq!(harness.dispatcher.platform().pending_cancels().len(), 1);

    harness
        .dispatcher
        .platform()
        .on_event(MonitoringMessage::CancelResponse {
            correlation_id,
            result: Ok(()),
        })
        .await
        .unwrap();

    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.alert_state, AlertState::Complete);
    assert_eq!(incident.monitoring_state, MonitoringState::Cancelled);
    assert!(incident.end_time.is_some());
    assert_eq!(ctx.current_incident(), None);

    let completed = harness
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, IncidentEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 1);

    // Cancellation history was recorded
    assert!(harness
        .history
        .entries()
        .iter()
        .any(|entry| entry.starts_with("cancelled:")));
}

// ---- Cache timeout resolves exactly once; late responses are no-ops ----

#[tokio::test]
async fn expired_cancel_resolves_once_and_late_response_is_ignored() {
    let mut config = IncidentConfig::default();
    config.cancel_timeout_secs = 0;
    let mut harness = Harness::new(config);
    let ctx = harness.place();

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Security,
            &[trigger(AlertType::Security, TriggerEvent::Motion)],
            false,
        )
        .await
        .unwrap();
    harness
        .dispatcher
        .cancel(&ctx, "person:1", CancelMethod::App)
        .await
        .unwrap();

    let correlation_id = harness
        .drain_requests()
        .into_iter()
        .find_map(|r| match r {
            AlarmServiceRequest::CancelAlarm { correlation_id, .. } => Some(correlation_id),
            _ => None,
        })
        .unwrap();

    // TTL was zero: the sweep evicts and resolves the timeout exactly once
    harness.dispatcher.platform().sweep_expired();
    assert!(harness.dispatcher.platform().pending_cancels().is_empty());
    harness.dispatcher.platform().sweep_expired();

    // A stuck cancel is silent and recoverable: still CANCELLING
    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.alert_state, AlertState::Cancelling);

    // The late response after eviction must not double-resolve
    harness
        .dispatcher
        .platform()
        .on_event(MonitoringMessage::CancelResponse {
            correlation_id,
            result: Ok(()),
        })
        .await
        .unwrap();
    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.alert_state, AlertState::Cancelling);
}

// ---- Remote refusal leaves the incident pending ----

#[tokio::test]
async fn rejected_cancel_keeps_incident_cancelling() {
    let mut harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place();

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Security,
            &[trigger(AlertType::Security, TriggerEvent::Motion)],
            false,
        )
        .await
        .unwrap();
    harness
        .dispatcher
        .cancel(&ctx, "person:1", CancelMethod::App)
        .await
        .unwrap();
    let correlation_id = harness
        .drain_requests()
        .into_iter()
        .find_map(|r| match r {
            AlarmServiceRequest::CancelAlarm { correlation_id, .. } => Some(correlation_id),
            _ => None,
        })
        .unwrap();

    harness
        .dispatcher
        .platform()
        .on_event(MonitoringMessage::CancelResponse {
            correlation_id,
            result: Err(RemoteError {
                code: "UAS-001".into(),
                message: "operator on the line".into(),
            }),
        })
        .await
        .unwrap();

    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.alert_state, AlertState::Cancelling);
}

// ---- Scenario B: mock cancel rejected mid-dispatch ----

#[tokio::test]
async fn mock_cancel_rejected_while_dispatching() {
    let harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place_with(|ctx| ctx.with_test_mode(true));

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Smoke,
            &[trigger(AlertType::Smoke, TriggerEvent::Smoke)],
            false,
        )
        .await
        .unwrap();

    // Life-safety alarms dispatch immediately on the mock station
    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert!(incident.mock_incident);
    assert_eq!(incident.monitoring_state, MonitoringState::Dispatching);

    let result = harness
        .dispatcher
        .cancel(&ctx, "person:1", CancelMethod::App)
        .await;
    assert!(matches!(result, Err(IncidentError::InvalidRequest(_))));

    // The rejected cancel left the incident exactly as it was
    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.alert_state, AlertState::Alert);
    assert_eq!(incident.monitoring_state, MonitoringState::Dispatching);

    // Once the station accepts and stands down, cancellation goes through
    harness
        .dispatcher
        .mock()
        .dispatch_accepted(&ctx, address)
        .await
        .unwrap();
    let cancelled = harness
        .dispatcher
        .cancel(&ctx, "person:1", CancelMethod::App)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.alert_state, AlertState::Complete);
}

// ---- Mock pending escalation and dispatch timeout ----

#[tokio::test]
async fn mock_security_alert_escalates_to_dispatching() {
    let mut config = IncidentConfig::default();
    config.mock_alert_timeout_secs = 1;
    let harness = Harness::new(config);
    let ctx = harness.place_with(|ctx| ctx.with_test_mode(true));

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Security,
            &[trigger(AlertType::Security, TriggerEvent::Motion)],
            false,
        )
        .await
        .unwrap();

    // Security alarms linger in PENDING until the simulated operator acts
    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.monitoring_state, MonitoringState::Pending);

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.monitoring_state, MonitoringState::Dispatching);
}

#[tokio::test]
async fn mock_unanswered_dispatch_fails() {
    let mut config = IncidentConfig::default();
    config.mock_dispatch_timeout_secs = 0;
    let harness = Harness::new(config);
    let ctx = harness.place_with(|ctx| ctx.with_test_mode(true));

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Co,
            &[trigger(AlertType::Co, TriggerEvent::Co)],
            false,
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.monitoring_state, MonitoringState::Failed);
}

// ---- Scenario C: hub COMPLETE report does not finish a pending cancel ----

#[tokio::test]
async fn hub_completion_waits_for_platform_cancel() {
    let mut harness = Harness::new(IncidentConfig::default());
    let hub_incident = Uuid::new_v4();
    let ctx = harness.place_with(|ctx| ctx.with_alarm_provider(AlarmProvider::Hub));
    ctx.update_hub(|hub| {
        hub.connected = true;
        hub.current_incident = Some(hub_incident);
    });

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Security,
            &[trigger(AlertType::Security, TriggerEvent::Motion)],
            false,
        )
        .await
        .unwrap();
    assert_eq!(address.incident_id, hub_incident);

    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert!(incident.hub_alarm);
    assert_eq!(incident.hub_alert_state, Some(AlertState::Alert));

    // First cancel pass: platform cancel issued, response pending
    let cancelled = harness
        .dispatcher
        .cancel(&ctx, "person:1", CancelMethod::Keypad)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.alert_state, AlertState::Cancelling);

    // The hub clears its pointer and reports COMPLETE while the platform
    // response is still outstanding
    ctx.update_hub(|hub| hub.current_incident = None);
    harness
        .dispatcher
        .hub()
        .on_hub_alert_state(&ctx, AlertState::Complete)
        .await
        .unwrap();

    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.alert_state, AlertState::Cancelling);
    assert_eq!(incident.hub_alert_state, Some(AlertState::Complete));

    // Another cancel pass still cannot finish it: platform side not done
    let still = harness
        .dispatcher
        .cancel(&ctx, "person:1", CancelMethod::Keypad)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still.alert_state, AlertState::Cancelling);

    // The platform response finally lands and completes the whole incident
    let correlation_id = harness
        .drain_requests()
        .into_iter()
        .filter_map(|r| match r {
            AlarmServiceRequest::CancelAlarm { correlation_id, .. } => Some(correlation_id),
            _ => None,
        })
        .last()
        .unwrap();
    harness
        .dispatcher
        .platform()
        .on_event(MonitoringMessage::CancelResponse {
            correlation_id,
            result: Ok(()),
        })
        .await
        .unwrap();

    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.alert_state, AlertState::Complete);
}

// ---- Scenario D: verifying a PREALERT hub incident ----

#[tokio::test]
async fn hub_prealert_verification_promotes_platform_side() {
    let mut harness = Harness::new(IncidentConfig::default());
    let hub_incident = Uuid::new_v4();
    let ctx = harness.place_with(|ctx| ctx.with_alarm_provider(AlarmProvider::Hub));
    ctx.update_hub(|hub| {
        hub.connected = true;
        hub.current_incident = Some(hub_incident);
        hub.security_triggers = vec![trigger(AlertType::Security, TriggerEvent::Contact)];
    });

    let address = harness
        .dispatcher
        .add_pre_alert(
            &ctx,
            AlertType::Security,
            chrono::Utc::now() + chrono::Duration::seconds(30),
            &[trigger(AlertType::Security, TriggerEvent::Motion)],
        )
        .await
        .unwrap();

    let verified = harness
        .dispatcher
        .verify(&ctx, address, "person:1")
        .await
        .unwrap();
    assert!(verified.is_some());

    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.alert_state, AlertState::Alert);
    assert_eq!(incident.platform_alert_state, Some(AlertState::Alert));
    // The hub has not reported ALERT yet
    assert_eq!(incident.hub_alert_state, Some(AlertState::Prealert));
    assert!(incident.confirmed);

    // The verification notification replays the hub's model triggers plus
    // the synthesized verification trigger
    let replayed = harness
        .drain_requests()
        .into_iter()
        .find_map(|r| match r {
            AlarmServiceRequest::AddAlarm { triggers, .. } => Some(triggers),
            _ => None,
        })
        .expect("verification should notify");
    assert_eq!(replayed.len(), 2);
    assert!(replayed
        .iter()
        .any(|t| t.event == TriggerEvent::VerifiedAlarm && t.source == "person:1"));
}

// ---- Repair path: stale current-incident pointer ----

#[tokio::test]
async fn stale_pointer_cancel_synthesizes_completion() {
    let mut harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place();

    // The pointer names an incident the store has no record of
    let ghost = Uuid::new_v4();
    ctx.set_current_incident(Some(ghost));

    let repaired = harness
        .dispatcher
        .cancel(&ctx, "person:1", CancelMethod::App)
        .await
        .unwrap();
    assert!(repaired.is_none());
    assert_eq!(ctx.current_incident(), None);

    let completed = harness
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, IncidentEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 1);

    // With no pointer at all, cancel is a plain not-found
    let result = harness
        .dispatcher
        .cancel(&ctx, "person:1", CancelMethod::App)
        .await;
    assert!(matches!(result, Err(IncidentError::NotFound(_))));
}

// ---- Monitoring-state updates are validated before mutation ----

#[tokio::test]
async fn unknown_monitoring_state_is_rejected() {
    let harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place();

    let address = harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Security,
            &[trigger(AlertType::Security, TriggerEvent::Motion)],
            false,
        )
        .await
        .unwrap();

    let result = harness
        .dispatcher
        .on_incident_updated(&ctx, address, "SHOUTING")
        .await;
    assert!(matches!(result, Err(IncidentError::InvalidParam(_))));

    // The incident was not touched
    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.monitoring_state, MonitoringState::None);

    // A valid update lands and records its tracker entry
    harness
        .dispatcher
        .on_incident_updated(&ctx, address, "DISPATCHED")
        .await
        .unwrap();
    let incident = harness.dispatcher.incident(&ctx, address).await.unwrap();
    assert_eq!(incident.monitoring_state, MonitoringState::Dispatched);
    assert!(incident
        .tracker_events
        .iter()
        .any(|t| t.key == "incident.dispatched"));
}

// ---- History plumbing ----

#[tokio::test]
async fn history_receives_triggers_and_connectivity() {
    let harness = Harness::new(IncidentConfig::default());
    let ctx = harness.place();

    harness
        .dispatcher
        .add_alert(
            &ctx,
            AlertType::Water,
            &[trigger(AlertType::Water, TriggerEvent::Leak)],
            false,
        )
        .await
        .unwrap();

    // Water is never monitored, even on a professionally monitored place
    let current = harness
        .dispatcher
        .current_incident(&ctx)
        .await
        .unwrap()
        .unwrap();
    assert!(!current.monitored);

    harness
        .dispatcher
        .update_incident_history(&ctx, &[trigger(AlertType::Water, TriggerEvent::Leak)])
        .await
        .unwrap();
    harness
        .dispatcher
        .on_hub_connectivity_changed(&ctx, false)
        .await
        .unwrap();

    let entries = harness.history.entries();
    assert_eq!(
        entries
            .iter()
            .filter(|e| e.starts_with("triggers:"))
            .count(),
        2
    );
    assert!(entries.iter().any(|e| e.starts_with("connectivity:")));

    // The store's listing is bounded and newest-first
    let listed = harness.dispatcher.list_incidents(&ctx).await.unwrap();
    assert_eq!(listed.len(), 1);
}
