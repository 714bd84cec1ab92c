//! # Socket Round-Trip Tests
//!
//! Runs a full [`BridgeService`] on a temporary Unix socket and talks to it
//! through [`IpcClient`], the way an out-of-process program would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ipc_bridge::{
    client_request_handler, BridgeConfig, BridgeModule, BridgeService, ClientError, IpcClient,
};
use serde_json::{json, Value};
use shared_bus::{
    request_handler, BusError, EventFilter, InMemoryMessageBus, MessageBus, Scope,
};
use tempfile::TempDir;
use tokio::time::timeout;

const SYSTEM_ID: &str = "test-host";
const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    _dir: TempDir,
    bus: Arc<InMemoryMessageBus>,
    service: BridgeService,
    path: PathBuf,
}

async fn start(configure: impl FnOnce(&mut BridgeConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BridgeConfig::default();
    config.endpoint.socket_root = dir.path().to_path_buf();
    config.heartbeat.enabled = false;
    configure(&mut config);

    let bus = Arc::new(InMemoryMessageBus::new());
    bus.add_request_listener(
        "base#System bitsId",
        Scope::none(),
        request_handler(|_meta, _params| async { Ok(json!(SYSTEM_ID)) }),
    );

    let mut service = BridgeService::new(config).unwrap();
    service.start(bus.clone()).await.unwrap();
    let path = service.socket_path().unwrap().to_path_buf();

    Harness {
        _dir: dir,
        bus,
        service,
        path,
    }
}

/// Round-trips a request so every earlier message on the connection is handled.
async fn barrier(client: &IpcClient) {
    let id = timeout(WAIT, client.send_request("base#System bitsId", json!({"scope": null}), vec![]))
        .await
        .expect("Barrier should complete")
        .unwrap();
    assert_eq!(id, json!(SYSTEM_ID));
}

#[tokio::test]
async fn test_socket_named_after_host_id() {
    let mut h = start(|_| {}).await;
    assert_eq!(h.path.file_name().unwrap(), "bits.test-host");
    h.service.stop().await;
}

#[tokio::test]
async fn test_client_request_reaches_bus() {
    let mut h = start(|_| {}).await;
    let client = IpcClient::connect(&h.path).await.unwrap();

    barrier(&client).await;

    h.bus.add_request_listener(
        "math#sum",
        Scope::none(),
        request_handler(|_meta, params| async move {
            Ok(json!(params.iter().skip(1).filter_map(Value::as_i64).sum::<i64>()))
        }),
    );
    let sum = client
        .send_request("math#sum", json!({"scope": null}), vec![json!(2), json!(3)])
        .await
        .unwrap();
    assert_eq!(sum, json!(5));

    client.close().await;
    h.service.stop().await;
}

#[tokio::test]
async fn test_client_event_reaches_bus_with_scope_first() {
    let mut h = start(|_| {}).await;
    let mut tap = h.bus.subscribe(EventFilter::events(["bits-ipc#Client connected"]));
    let client = IpcClient::connect(&h.path).await.unwrap();

    client
        .send_event("bits-ipc#Client connected", json!({"scope": null}), vec![json!("hi")])
        .await
        .unwrap();

    let event = timeout(WAIT, tap.recv()).await.unwrap().unwrap();
    assert_eq!(event.params, vec![json!({"scope": null}), json!("hi")]);

    client.close().await;
    h.service.stop().await;
}

#[tokio::test]
async fn test_bus_events_reach_listening_client() {
    let mut h = start(|_| {}).await;
    let client = IpcClient::connect(&h.path).await.unwrap();

    let mut events = client
        .add_event_listener("sensor#reading", json!({"scopes": null}))
        .await
        .unwrap();
    barrier(&client).await;
    assert_eq!(h.bus.event_listener_count("sensor#reading"), 1);
    assert_eq!(
        h.bus.event_listener_scopes("sensor#reading"),
        vec![Scope::from(json!({"scopes": null}))]
    );

    h.bus
        .publish("sensor#reading", vec![json!(1), json!("celsius")])
        .await
        .unwrap();
    let params = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(params, vec![json!(1), json!("celsius")]);

    client
        .remove_event_listener("sensor#reading", json!({"scopes": null}))
        .await
        .unwrap();
    barrier(&client).await;
    assert_eq!(h.bus.event_listener_count("sensor#reading"), 0);

    client.close().await;
    h.service.stop().await;
}

#[tokio::test]
async fn test_client_serves_bus_requests() {
    let mut h = start(|_| {}).await;
    let client = IpcClient::connect(&h.path).await.unwrap();

    client
        .add_request_listener(
            "client#greet",
            json!({"scopes": null}),
            client_request_handler(|params| async move {
                match params.first().and_then(Value::as_str) {
                    Some(name) => Ok(json!(format!("hello {}", name))),
                    None => Err(json!("name required")),
                }
            }),
        )
        .await
        .unwrap();
    barrier(&client).await;

    // The client answers with `params: [value]`, which becomes the result.
    let answer = timeout(WAIT, h.bus.request("client#greet", vec![json!("bits")]))
        .await
        .unwrap();
    assert_eq!(answer, Ok(json!(["hello bits"])));

    let rejected = timeout(WAIT, h.bus.request("client#greet", vec![]))
        .await
        .unwrap();
    assert_eq!(rejected, Err(BusError::Remote(json!("name required"))));

    client.close().await;
    h.service.stop().await;
}

#[tokio::test]
async fn test_disconnect_rejects_outstanding_requests() {
    let mut h = start(|_| {}).await;
    let client = IpcClient::connect(&h.path).await.unwrap();

    client
        .add_request_listener(
            "client#never",
            Value::Null,
            client_request_handler(|_params| futures::future::pending()),
        )
        .await
        .unwrap();
    barrier(&client).await;

    let call = tokio::spawn({
        let bus = h.bus.clone();
        async move { bus.request("client#never", vec![]).await }
    });

    let router = h.service.router().unwrap();
    timeout(WAIT, async {
        while router.pending().pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Request should be forwarded");

    client.close().await;

    assert_eq!(
        timeout(WAIT, call).await.unwrap().unwrap(),
        Err(BusError::ConnectionClosed)
    );
    assert_eq!(h.bus.request_listener_count("client#never"), 0);
    assert!(router.registry().is_empty());

    h.service.stop().await;
}

#[tokio::test]
async fn test_client_request_timeout() {
    let mut h = start(|_| {}).await;
    h.bus.add_request_listener(
        "slow#op",
        Scope::none(),
        request_handler(|_meta, _params| futures::future::pending()),
    );
    let client = IpcClient::connect(&h.path)
        .await
        .unwrap()
        .with_request_timeout(Duration::from_millis(50));

    let result = client.send_request("slow#op", Value::Null, vec![]).await;
    assert!(matches!(result, Err(ClientError::Timeout(50))));

    client.close().await;
    h.service.stop().await;
}

#[tokio::test]
async fn test_heartbeat_reaches_clients() {
    let mut h = start(|config| {
        config.heartbeat.enabled = true;
        config.heartbeat.interval = Duration::from_millis(20);
    })
    .await;
    let client = IpcClient::connect(&h.path).await.unwrap();

    let mut beats = client
        .add_event_listener("bits-ipc#heartbeat", json!({"scopes": null}))
        .await
        .unwrap();
    let beat = timeout(WAIT, beats.recv()).await.unwrap().unwrap();
    assert_eq!(beat[0], json!({"scopes": null}));
    assert!(beat[1].as_i64().unwrap() > 0);

    client.close().await;
    h.service.stop().await;
}

#[tokio::test]
async fn test_stop_closes_endpoint() {
    let mut h = start(|_| {}).await;
    h.service.stop().await;

    assert!(!h.path.exists());
    assert!(matches!(
        IpcClient::connect(&h.path).await,
        Err(ClientError::Connect(_))
    ));
}
