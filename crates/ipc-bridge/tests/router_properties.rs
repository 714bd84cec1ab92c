//! # Router Behaviour Tests
//!
//! Drives [`BridgeRouter`] directly against the in-memory bus, with a bare
//! [`ConnectionHandle`] standing in for a socket:
//!
//! 1. Client events become exactly one bus publish
//! 2. Client requests get exactly one response, and none on failure
//! 3. Event listeners forward until the connection dies, then retire
//! 4. Forwarded requests resolve only from the matching response
//! 5. Concurrent forwarded requests resolve independently
//! 6. Unknown message types are dropped without harming the connection
//! 7. Closing a connection rejects its requests and removes its listeners
//! 8. A configured timeout rejects unanswered forwarded requests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ipc_bridge::domain::message::{ListenerSpec, ResponseMessage};
use ipc_bridge::{BridgeRouter, ConnectionHandle, RequestId, WireMessage};
use proptest::prelude::*;
use serde_json::{json, Value};
use shared_bus::{
    event_handler, request_handler, BusError, BusResult, EventFilter, InMemoryMessageBus,
    MessageBus, Scope,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(1);
const QUIET: Duration = Duration::from_millis(100);

fn setup(request_timeout: Option<Duration>) -> (Arc<InMemoryMessageBus>, BridgeRouter) {
    let bus = Arc::new(InMemoryMessageBus::new());
    let router = BridgeRouter::new(bus.clone(), request_timeout);
    (bus, router)
}

async fn next(rx: &mut mpsc::Receiver<WireMessage>) -> WireMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("Should receive within timeout")
        .expect("Outbound queue should be open")
}

async fn assert_quiet(rx: &mut mpsc::Receiver<WireMessage>) {
    assert!(
        timeout(QUIET, rx.recv()).await.is_err(),
        "No message should be pushed"
    );
}

fn spawn_request(bus: &Arc<InMemoryMessageBus>, event: &str, params: Vec<Value>) -> JoinHandle<BusResult<Value>> {
    let bus = Arc::clone(bus);
    let event = event.to_string();
    tokio::spawn(async move { bus.request(&event, params).await })
}

async fn forwarded(rx: &mut mpsc::Receiver<WireMessage>) -> (String, RequestId, Vec<Value>) {
    match next(rx).await {
        WireMessage::Request {
            event,
            request_id,
            params,
        } => (event, request_id, params),
        other => panic!("Expected a forwarded request, got {:?}", other),
    }
}

fn response(event: &str, id: RequestId, result: Value) -> WireMessage {
    WireMessage::Response(ResponseMessage::success(event, id, result))
}

#[tokio::test]
async fn test_event_message_publishes_once() {
    let (bus, router) = setup(None);
    let (conn, _rx) = ConnectionHandle::new(16);
    let mut tap = bus.subscribe(EventFilter::all());

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    bus.add_event_listener(
        "sensor#reading",
        Scope::none(),
        event_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    router
        .handle_raw(
            json!({
                "type": "event",
                "event": "sensor#reading",
                "params": [{"scopes": null}, 21.5]
            }),
            &conn,
        )
        .await;

    let published = timeout(WAIT, tap.recv()).await.unwrap().unwrap();
    assert_eq!(published.event, "sensor#reading");
    assert_eq!(published.params, vec![json!({"scopes": null}), json!(21.5)]);
    assert_eq!(bus.events_published(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_message_gets_one_response() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);
    bus.add_request_listener(
        "math#double",
        Scope::none(),
        request_handler(|_meta, params| async move {
            let n = params.get(1).and_then(Value::as_i64).unwrap_or_default();
            Ok(json!(n * 2))
        }),
    );

    router
        .handle_raw(
            json!({
                "type": "request",
                "event": "math#double",
                "requestId": 17,
                "params": [{"scope": null}, 21]
            }),
            &conn,
        )
        .await;

    assert_eq!(
        next(&mut rx).await,
        response("math#double", RequestId::Number(17), json!(42))
    );
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_rejected_request_gets_no_response() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);
    bus.add_request_listener(
        "math#fail",
        Scope::none(),
        request_handler(|_meta, _params| async { Err(BusError::Remote(json!("nope"))) }),
    );

    router
        .handle(
            WireMessage::Request {
                event: "math#fail".into(),
                request_id: RequestId::from("1"),
                params: vec![],
            },
            &conn,
        )
        .await;
    router
        .handle(
            WireMessage::Request {
                event: "nobody#home".into(),
                request_id: RequestId::from("2"),
                params: vec![],
            },
            &conn,
        )
        .await;

    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_slow_request_does_not_block_later_messages() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
    bus.add_request_listener(
        "slow#op",
        Scope::none(),
        request_handler(move |_meta, _params| {
            let release_rx = Arc::clone(&release_rx);
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(json!("slow"))
            }
        }),
    );
    bus.add_request_listener(
        "fast#op",
        Scope::none(),
        request_handler(|_meta, _params| async { Ok(json!("fast")) }),
    );

    for (event, id) in [("slow#op", 1), ("fast#op", 2)] {
        router
            .handle(
                WireMessage::Request {
                    event: event.into(),
                    request_id: RequestId::Number(id),
                    params: vec![],
                },
                &conn,
            )
            .await;
    }

    assert_eq!(
        next(&mut rx).await,
        response("fast#op", RequestId::Number(2), json!("fast"))
    );
    release_tx.send(()).unwrap();
    assert_eq!(
        next(&mut rx).await,
        response("slow#op", RequestId::Number(1), json!("slow"))
    );
}

#[tokio::test]
async fn test_event_listener_forwards_until_connection_dies() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);

    router
        .handle(
            WireMessage::AddEventListener(ListenerSpec::new("sensor#reading", json!({"scopes": null}))),
            &conn,
        )
        .await;

    for n in 0..2 {
        bus.publish("sensor#reading", vec![json!(n)]).await.unwrap();
        assert_eq!(
            next(&mut rx).await,
            WireMessage::Event {
                event: "sensor#reading".into(),
                params: vec![json!(n)],
            }
        );
    }

    conn.mark_closed();
    bus.publish("sensor#reading", vec![json!(99)]).await.unwrap();
    assert_quiet(&mut rx).await;
    assert_eq!(bus.event_listener_count("sensor#reading"), 0);
    assert!(router.registry().is_empty());
}

#[tokio::test]
async fn test_duplicate_add_is_noop() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);
    let add = WireMessage::AddEventListener(ListenerSpec::new("a#b", Value::Null));

    router.handle(add.clone(), &conn).await;
    router.handle(add, &conn).await;
    assert_eq!(bus.event_listener_count("a#b"), 1);

    bus.publish("a#b", vec![]).await.unwrap();
    next(&mut rx).await;
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_forwarded_request_resolves_only_on_matching_response() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);
    router
        .handle(
            WireMessage::AddRequestListener(ListenerSpec::new("client#echo", json!({"scopes": null}))),
            &conn,
        )
        .await;

    let mut call = spawn_request(&bus, "client#echo", vec![json!("hello")]);
    let (event, id, params) = forwarded(&mut rx).await;
    assert_eq!(event, "client#echo");
    assert_eq!(params, vec![json!("hello")]);

    // Wrong id, then right id on the wrong event.
    router
        .handle(response("client#echo", RequestId::from("not-it"), json!(0)), &conn)
        .await;
    router
        .handle(response("client#other", id.clone(), json!(0)), &conn)
        .await;
    assert!(timeout(QUIET, &mut call).await.is_err());
    assert_eq!(router.pending().pending_count(), 1);

    router
        .handle(response("client#echo", id, json!("hello")), &conn)
        .await;
    assert_eq!(call.await.unwrap(), Ok(json!("hello")));
    assert_eq!(router.pending().pending_count(), 0);
}

#[tokio::test]
async fn test_response_params_are_the_result_when_result_absent() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);
    router
        .handle(
            WireMessage::AddRequestListener(ListenerSpec::new("bits-ipc#ping", Value::Null)),
            &conn,
        )
        .await;

    let call = spawn_request(&bus, "bits-ipc#ping", vec![]);
    let (_, id, _) = forwarded(&mut rx).await;
    router
        .handle_raw(
            json!({
                "type": "response",
                "event": "bits-ipc#ping",
                "responseId": id,
                "params": ["pong"]
            }),
            &conn,
        )
        .await;

    assert_eq!(call.await.unwrap(), Ok(json!(["pong"])));
}

#[tokio::test]
async fn test_concurrent_forwarded_requests_resolve_independently() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);
    router
        .handle(
            WireMessage::AddRequestListener(ListenerSpec::new("client#work", Value::Null)),
            &conn,
        )
        .await;

    let first = spawn_request(&bus, "client#work", vec![json!("first")]);
    let second = spawn_request(&bus, "client#work", vec![json!("second")]);

    let mut forwarded_requests = vec![forwarded(&mut rx).await, forwarded(&mut rx).await];
    assert_ne!(forwarded_requests[0].1, forwarded_requests[1].1);

    // Answer in reverse arrival order, echoing each request's own param.
    forwarded_requests.reverse();
    for (event, id, params) in forwarded_requests {
        router.handle(response(&event, id, params[0].clone()), &conn).await;
    }

    assert_eq!(first.await.unwrap(), Ok(json!("first")));
    assert_eq!(second.await.unwrap(), Ok(json!("second")));
}

#[tokio::test]
async fn test_unknown_type_does_not_poison_connection() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);

    router
        .handle_raw(json!({"type": "subscribe", "event": "a#b"}), &conn)
        .await;
    router.handle_raw(json!({"no": "type"}), &conn).await;
    router.handle_raw(json!([1, 2, 3]), &conn).await;
    assert_eq!(bus.events_published(), 0);
    assert!(conn.is_alive());

    router
        .handle_raw(json!({"type": "event", "event": "a#b", "params": []}), &conn)
        .await;
    assert_eq!(bus.events_published(), 1);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_connection_close_rejects_requests_and_removes_listeners() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);
    let (other, _other_rx) = ConnectionHandle::new(16);

    router
        .handle(
            WireMessage::AddRequestListener(ListenerSpec::new("client#work", Value::Null)),
            &conn,
        )
        .await;
    router
        .handle(
            WireMessage::AddEventListener(ListenerSpec::new("sensor#reading", Value::Null)),
            &conn,
        )
        .await;
    router
        .handle(
            WireMessage::AddEventListener(ListenerSpec::new("sensor#reading", Value::Null)),
            &other,
        )
        .await;

    let call = spawn_request(&bus, "client#work", vec![]);
    forwarded(&mut rx).await;

    conn.mark_closed();
    router.connection_closed(conn.id());

    assert_eq!(call.await.unwrap(), Err(BusError::ConnectionClosed));
    assert_eq!(bus.request_listener_count("client#work"), 0);
    assert_eq!(bus.event_listener_count("sensor#reading"), 1);
    assert_eq!(router.registry().len(), 1);
    assert_eq!(router.pending().pending_count(), 0);
}

#[tokio::test]
async fn test_timeout_rejects_unanswered_forwarded_request() {
    let (bus, router) = setup(Some(Duration::from_millis(50)));
    let (conn, mut rx) = ConnectionHandle::new(16);
    router
        .handle(
            WireMessage::AddRequestListener(ListenerSpec::new("client#slow", Value::Null)),
            &conn,
        )
        .await;

    let call = spawn_request(&bus, "client#slow", vec![]);
    let (_, id, _) = forwarded(&mut rx).await;

    assert_eq!(call.await.unwrap(), Err(BusError::Timeout(50)));
    assert_eq!(router.pending().pending_count(), 0);

    // A late answer finds nothing to complete.
    router
        .handle(response("client#slow", id, json!("late")), &conn)
        .await;
    assert_eq!(
        router
            .pending()
            .stats()
            .total_timeouts
            .load(Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn test_abandoned_bus_call_frees_waiter() {
    let (bus, router) = setup(None);
    let (conn, mut rx) = ConnectionHandle::new(16);
    router
        .handle(
            WireMessage::AddRequestListener(ListenerSpec::new("client#work", Value::Null)),
            &conn,
        )
        .await;

    let call = spawn_request(&bus, "client#work", vec![]);
    forwarded(&mut rx).await;
    assert_eq!(router.pending().pending_count(), 1);

    call.abort();
    let _ = call.await;
    assert_eq!(router.pending().pending_count(), 0);
}

proptest! {
    #[test]
    fn prop_unrecognized_type_is_rejected(kind in "[a-zA-Z]{1,24}") {
        prop_assume!(ipc_bridge::MessageType::parse(&kind).is_none());
        let parsed = WireMessage::parse(json!({"type": kind, "event": "a#b", "params": []}));
        prop_assert!(matches!(
            parsed,
            Err(ipc_bridge::domain::message::MessageError::UnknownType(_))
        ));
    }
}
