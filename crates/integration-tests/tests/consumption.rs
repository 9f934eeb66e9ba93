//! Publish/consume scenarios through the hosted orchestrator

use async_trait::async_trait;
use relaybus_core::application::{ConsumerDescriptor, ConsumerOptions, EngineState, FixedDelay};
use relaybus_core::domain::{ConsumeError, Message, NamingOptions, TypeTag};
use relaybus_core::port::{ConsumeFailure, Consumer, ErrorHandler, PayloadCompression};
use relaybus_host::{ConsumerCatalog, ConsumerSettings, HostedOrchestrator, Settings};
use relaybus_integration_tests::MemoryBroker;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShipmentEvent {
    shipment_id: String,
}
impl Message for ShipmentEvent {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShipmentDispatched {
    shipment_id: String,
    carrier: String,
}
impl Message for ShipmentDispatched {
    fn supertypes() -> Vec<TypeTag> {
        vec![TypeTag::of::<ShipmentEvent>()]
    }
}

/// Records the ids of every shipment it sees
struct ShipmentLog {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Consumer for ShipmentLog {
    type Message = ShipmentEvent;

    async fn consume(&self, event: ShipmentEvent, _: CancellationToken) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(event.shipment_id);
        Ok(())
    }
}

/// Holds every attempt until a permit is released
struct Gated {
    gate: Arc<Semaphore>,
    started: Arc<AtomicUsize>,
}

#[async_trait]
impl Consumer for Gated {
    type Message = ShipmentEvent;

    async fn consume(&self, _: ShipmentEvent, _: CancellationToken) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        Ok(())
    }
}

/// Ignores its token and never finishes in time
struct Stuck;

#[async_trait]
impl Consumer for Stuck {
    type Message = ShipmentEvent;

    async fn consume(&self, _: ShipmentEvent, _: CancellationToken) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Rejects shipments whose id starts with "bad", records the rest
struct Picky {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Consumer for Picky {
    type Message = ShipmentEvent;

    async fn consume(&self, event: ShipmentEvent, _: CancellationToken) -> anyhow::Result<()> {
        if event.shipment_id.starts_with("bad") {
            anyhow::bail!("shipment {} rejected", event.shipment_id);
        }
        self.seen.lock().unwrap().push(event.shipment_id);
        Ok(())
    }
}

/// Error hook with a bug of its own
struct BrokenHook;

#[async_trait]
impl ErrorHandler for BrokenHook {
    async fn on_error(&self, _: &ConsumeFailure) {
        panic!("hook bug");
    }
}

struct Base64ish;

impl PayloadCompression for Base64ish {
    fn compress(&self, payload: &str) -> Result<String, String> {
        Ok(payload.bytes().map(|b| format!("{b:02x}")).collect())
    }

    fn decompress(&self, payload: &str) -> Result<String, String> {
        let bytes = (0..payload.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&payload[i..i + 2], 16).map_err(|e| e.to_string()))
            .collect::<Result<Vec<u8>, String>>()?;
        String::from_utf8(bytes).map_err(|e| e.to_string())
    }
}

fn naming() -> NamingOptions {
    NamingOptions {
        prefix: "acme".to_string(),
        source: Some("logistics".to_string()),
        ..NamingOptions::default()
    }
}

fn fast() -> ConsumerOptions {
    ConsumerOptions::default().with_polling_interval(Duration::from_millis(10))
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_published_subtype_reaches_base_consumer() {
    let broker = MemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    let catalog = ConsumerCatalog::new()
        .consumer("shipment_log", move || ShipmentLog { seen: log.clone() })
        .message::<ShipmentDispatched>("shipment_dispatched");

    let mut settings = Settings::default();
    settings.naming = naming();
    settings.consumer = fast();
    settings.consumers.push(ConsumerSettings {
        event: "shipments_dispatched".to_string(),
        consumer: "shipment_log".to_string(),
        message: Some("shipment_dispatched".to_string()),
        overrides: Default::default(),
    });

    let orchestrator = HostedOrchestrator::builder(broker.services())
        .settings(settings)
        .build(&catalog)
        .unwrap();
    let publisher = orchestrator.publisher();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(orchestrator.run_until(async {
        let _ = shutdown_rx.await;
    }));

    wait_until(|| broker.count_calls("Subscribe:") == 1).await;
    publisher
        .publish(
            "shipments_dispatched",
            &ShipmentDispatched {
                shipment_id: "S-1".to_string(),
                carrier: "postal".to_string(),
            },
            Some(Uuid::new_v4()),
        )
        .await
        .unwrap();

    wait_until(|| seen.lock().unwrap().len() == 1).await;
    wait_until(|| broker.depth("acme_logistics_shipments_dispatched") == 0).await;

    shutdown_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), ["S-1".to_string()]);
}

#[tokio::test]
async fn test_in_flight_bounded_by_max_concurrency() {
    let broker = MemoryBroker::new();
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(AtomicUsize::new(0));
    let k = 2;

    let (g, s) = (gate.clone(), started.clone());
    let descriptor = ConsumerDescriptor::for_consumer(
        "shipments_dispatched",
        move || Gated {
            gate: g.clone(),
            started: s.clone(),
        },
        fast().with_max_concurrency(k),
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.naming = naming();
    let mut orchestrator = HostedOrchestrator::builder(broker.services())
        .settings(settings)
        .consumer(descriptor)
        .build(&ConsumerCatalog::new())
        .unwrap();
    orchestrator.start().await.unwrap();

    let publisher = orchestrator.publisher();
    for i in 0..=k {
        let event = ShipmentEvent {
            shipment_id: format!("S-{i}"),
        };
        publisher.publish("shipments_dispatched", &event, None).await.unwrap();
    }

    wait_until(|| started.load(Ordering::SeqCst) == k).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(started.load(Ordering::SeqCst), k);

    gate.add_permits(1);
    wait_until(|| started.load(Ordering::SeqCst) == k + 1).await;

    gate.add_permits(k);
    wait_until(|| broker.depth("acme_logistics_shipments_dispatched") == 0).await;
    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_timeout_releases_and_reports() {
    let broker = MemoryBroker::new();
    let failures = Arc::new(Mutex::new(Vec::new()));

    let descriptor = ConsumerDescriptor::for_consumer(
        "shipments_dispatched",
        || Stuck,
        fast().with_consume_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let sink = failures.clone();
    let mut settings = Settings::default();
    settings.naming = naming();
    let mut orchestrator = HostedOrchestrator::builder(broker.services())
        .settings(settings)
        .consumer(descriptor)
        .retry_strategy(Arc::new(FixedDelay(Duration::from_secs(60))))
        .error_handler(Arc::new(move |failure: &ConsumeFailure| {
            sink.lock()
                .unwrap()
                .push(matches!(failure.error, ConsumeError::TimedOut(50)));
        }))
        .build(&ConsumerCatalog::new())
        .unwrap();
    orchestrator.start().await.unwrap();

    orchestrator
        .publisher()
        .publish(
            "shipments_dispatched",
            &ShipmentEvent {
                shipment_id: "S-9".to_string(),
            },
            None,
        )
        .await
        .unwrap();

    wait_until(|| !failures.lock().unwrap().is_empty()).await;
    orchestrator.stop().await.unwrap();

    assert_eq!(failures.lock().unwrap().as_slice(), [true]);
    // released with a long delay, not deleted
    assert_eq!(broker.depth("acme_logistics_shipments_dispatched"), 1);
}

#[tokio::test]
async fn test_malformed_body_goes_through_failure_path() {
    let broker = MemoryBroker::new();
    let malformed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    let descriptor = ConsumerDescriptor::for_consumer(
        "shipments_dispatched",
        move || ShipmentLog { seen: log.clone() },
        fast(),
    )
    .unwrap();

    let counter = malformed.clone();
    let mut settings = Settings::default();
    settings.naming = naming();
    let mut orchestrator = HostedOrchestrator::builder(broker.services())
        .settings(settings)
        .consumer(descriptor)
        .retry_strategy(Arc::new(FixedDelay(Duration::from_secs(60))))
        .error_handler(Arc::new(move |failure: &ConsumeFailure| {
            if matches!(failure.error, ConsumeError::MalformedEnvelope(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .build(&ConsumerCatalog::new())
        .unwrap();
    orchestrator.start().await.unwrap();

    broker.send_raw("acme_logistics_shipments_dispatched", "not an envelope");
    wait_until(|| malformed.load(Ordering::SeqCst) == 1).await;
    orchestrator.stop().await.unwrap();

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(broker.depth("acme_logistics_shipments_dispatched"), 1);
}

#[tokio::test]
async fn test_compressed_round_trip() {
    let broker = MemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    let descriptor = ConsumerDescriptor::for_consumer(
        "shipments_dispatched",
        move || ShipmentLog { seen: log.clone() },
        fast(),
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.naming = naming();
    let mut orchestrator = HostedOrchestrator::builder(broker.services())
        .settings(settings)
        .consumer(descriptor)
        .compression(Arc::new(Base64ish))
        .build(&ConsumerCatalog::new())
        .unwrap();
    orchestrator.start().await.unwrap();

    orchestrator
        .publisher()
        .publish(
            "shipments_dispatched",
            &ShipmentEvent {
                shipment_id: "S-3".to_string(),
            },
            None,
        )
        .await
        .unwrap();

    wait_until(|| seen.lock().unwrap().len() == 1).await;
    orchestrator.stop().await.unwrap();
    assert_eq!(seen.lock().unwrap()[0], "S-3");
}

#[tokio::test]
async fn test_fetch_failures_are_survived() {
    let broker = MemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    let descriptor = ConsumerDescriptor::for_consumer(
        "shipments_dispatched",
        move || ShipmentLog { seen: log.clone() },
        fast(),
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.naming = naming();
    let mut orchestrator = HostedOrchestrator::builder(broker.services())
        .settings(settings)
        .consumer(descriptor)
        .build(&ConsumerCatalog::new())
        .unwrap();

    broker.fail_next_receives(2);
    orchestrator.start().await.unwrap();
    orchestrator
        .publisher()
        .publish(
            "shipments_dispatched",
            &ShipmentEvent {
                shipment_id: "S-4".to_string(),
            },
            None,
        )
        .await
        .unwrap();

    wait_until(|| seen.lock().unwrap().len() == 1).await;
    assert!(orchestrator
        .states()
        .iter()
        .all(|(_, state)| *state == EngineState::PollingAndDispatching));

    orchestrator.stop().await.unwrap();
    assert!(orchestrator.states().is_empty());
}

#[tokio::test]
async fn test_panicking_hook_does_not_stop_consumption() {
    let broker = MemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = seen.clone();
    let descriptor = ConsumerDescriptor::for_consumer(
        "shipments_dispatched",
        move || Picky { seen: log.clone() },
        fast().with_max_concurrency(1),
    )
    .unwrap()
    .with_error_handler(Arc::new(BrokenHook));

    let mut settings = Settings::default();
    settings.naming = naming();
    let mut orchestrator = HostedOrchestrator::builder(broker.services())
        .settings(settings)
        .consumer(descriptor)
        .retry_strategy(Arc::new(FixedDelay(Duration::from_secs(60))))
        .build(&ConsumerCatalog::new())
        .unwrap();
    orchestrator.start().await.unwrap();

    let publisher = orchestrator.publisher();
    for id in ["bad-1", "S-5"] {
        let event = ShipmentEvent {
            shipment_id: id.to_string(),
        };
        publisher.publish("shipments_dispatched", &event, None).await.unwrap();
    }

    wait_until(|| seen.lock().unwrap().len() == 1).await;
    assert!(orchestrator
        .states()
        .iter()
        .all(|(_, state)| *state == EngineState::PollingAndDispatching));
    orchestrator.stop().await.unwrap();

    assert_eq!(seen.lock().unwrap().as_slice(), ["S-5".to_string()]);
    // the rejected shipment was released for a later retry, not lost
    assert_eq!(broker.depth("acme_logistics_shipments_dispatched"), 1);
}

#[tokio::test]
async fn test_saturated_descriptor_does_not_block_another() {
    let broker = MemoryBroker::new();
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (g, s) = (gate.clone(), started.clone());
    let held = ConsumerDescriptor::for_consumer(
        "shipments_held",
        move || Gated {
            gate: g.clone(),
            started: s.clone(),
        },
        fast().with_max_concurrency(1),
    )
    .unwrap();
    let log = seen.clone();
    let dispatched = ConsumerDescriptor::for_consumer(
        "shipments_dispatched",
        move || ShipmentLog { seen: log.clone() },
        fast().with_max_concurrency(1),
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.naming = naming();
    let mut orchestrator = HostedOrchestrator::builder(broker.services())
        .settings(settings)
        .consumer(held)
        .consumer(dispatched)
        .build(&ConsumerCatalog::new())
        .unwrap();
    orchestrator.start().await.unwrap();

    let publisher = orchestrator.publisher();
    for i in 0..3 {
        let event = ShipmentEvent {
            shipment_id: format!("H-{i}"),
        };
        publisher.publish("shipments_held", &event, None).await.unwrap();
    }
    wait_until(|| started.load(Ordering::SeqCst) == 1).await;

    for i in 0..3 {
        let event = ShipmentEvent {
            shipment_id: format!("D-{i}"),
        };
        publisher.publish("shipments_dispatched", &event, None).await.unwrap();
    }
    wait_until(|| seen.lock().unwrap().len() == 3).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(broker.depth("acme_logistics_shipments_dispatched"), 0);

    gate.add_permits(3);
    wait_until(|| broker.depth("acme_logistics_shipments_held") == 0).await;
    orchestrator.stop().await.unwrap();
}
