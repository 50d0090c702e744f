// src/main.rs - Demo runner: wires the in-memory collaborators and walks a
// simulated incident through alert, verification and cancellation.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use vigil::{
    AlertType, CancelMethod, ChannelBus, IncidentConfig, IncidentDispatcher, IncidentTrigger,
    MemoryIncidentStore, NullHistorySink, PlaceContext, PlaceDirectory, TriggerEvent,
};

#[tokio::main]
async fn main() -> Result<()> {
    vigil::init();
    info!("VIGIL {} starting", vigil::VERSION);

    let config = match std::env::args().nth(1) {
        Some(path) => IncidentConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => {
            let mut config = IncidentConfig::default();
            // Short mock timers so the demo is watchable
            config.mock_alert_timeout_secs = 1;
            config.mock_dispatch_timeout_secs = 3;
            config
        }
    };

    let (bus, mut events, mut requests) = ChannelBus::new();
    let places = Arc::new(PlaceDirectory::new());
    let dispatcher = IncidentDispatcher::new(
        Arc::new(MemoryIncidentStore::new()),
        Arc::new(bus),
        Arc::new(NullHistorySink),
        config,
        Arc::clone(&places),
    );
    let _sweeper = dispatcher.start();

    // Print everything the coordinator emits
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("event:   {event:?}");
        }
    });
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            println!("request: {request:?}");
        }
    });

    // A demo place in test mode: everything routes to the mock station
    let ctx = Arc::new(
        PlaceContext::new(Uuid::new_v4(), "general")
            .with_monitored(true)
            .with_test_mode(true),
    );
    places.insert(Arc::clone(&ctx));

    let trigger = IncidentTrigger::new(AlertType::Security, TriggerEvent::Motion, "dev:front-door");
    let address = dispatcher
        .add_alert(&ctx, AlertType::Security, &[trigger], true)
        .await?;
    println!("alert raised: {address}");

    // Let the mock station escalate PENDING -> DISPATCHING
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let verified = dispatcher.verify(&ctx, address, "person:demo").await?;
    println!("verified at: {verified:?}");

    // The simulated operator accepts the dispatch, then stands down
    dispatcher.mock().dispatch_accepted(&ctx, address).await?;
    dispatcher.mock().dispatch_cancelled(&ctx, address).await?;

    let cancelled = dispatcher.cancel(&ctx, "person:demo", CancelMethod::App).await?;
    println!(
        "cancelled: {:?}",
        cancelled.map(|incident| incident.alert_state)
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
