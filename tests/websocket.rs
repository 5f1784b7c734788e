//! Integration tests for the WebSocket manipulator
//!
//! Each test runs a real in-process WebSocket server and drives the client
//! against it, including disconnects, reconnections, and token rotation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use drover::{
    Context, DroverError, EventKind, EventManipulator, Identity, Manipulable, Manipulator,
    TokenProvider, WebSocketManipulator, WsConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Thing {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    name: String,
}

impl Thing {
    fn with_id(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
        }
    }
}

impl Manipulable for Thing {
    fn identity(&self) -> Identity {
        Identity::new("thing", "things")
    }

    fn identifier(&self) -> &str {
        &self.id
    }

    fn set_identifier(&mut self, id: String) {
        self.id = id;
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// Accept one connection and return the socket plus the requested URI
async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();

    let uri = Arc::new(StdMutex::new(String::new()));
    let uri_capture = uri.clone();

    let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
        *uri_capture.lock().unwrap() = req.uri().to_string();
        Ok(resp)
    })
    .await
    .unwrap();

    let uri = uri.lock().unwrap().clone();
    (ws, uri)
}

fn handshake_ok() -> Message {
    Message::Text(json!({"statusCode": 200}).to_string())
}

fn ok_response(request_id: &str, body: Value) -> Message {
    Message::Text(
        json!({
            "request": {"requestID": request_id},
            "statusCode": 200,
            "body": body,
        })
        .to_string(),
    )
}

fn error_response(request_id: &str, status: u16, code: i64, description: &str) -> Message {
    Message::Text(
        json!({
            "request": {"requestID": request_id},
            "statusCode": status,
            "errors": [{"code": code, "description": description}],
        })
        .to_string(),
    )
}

fn event(identity: &str, kind: &str, entity: Value) -> Message {
    Message::Text(json!({"identity": identity, "entity": entity, "type": kind}).to_string())
}

/// Read the next text frame and parse it
async fn next_request(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await.expect("connection closed").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(_) => panic!("connection closed while waiting for a request"),
            _ => continue,
        }
    }
}

fn test_config(url: &str) -> WsConfig {
    WsConfig::new(url, "user", "secret")
        .namespace("/test")
        .request_timeout(Duration::from_secs(5))
        .reconnect_delay(Duration::from_millis(50))
}

#[tokio::test]
async fn test_retrieve_happy_path() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, uri) = accept(&listener).await;
        assert!(uri.starts_with("/wsapi?"));
        assert!(uri.contains("token=secret"));
        assert!(uri.contains("namespace=/test"));
        ws.send(handshake_ok()).await.unwrap();

        let request = next_request(&mut ws).await;
        assert_eq!(request["operation"], "retrieve");
        assert_eq!(request["identity"], "thing");
        assert_eq!(request["objectID"], "abc");
        assert_eq!(request["username"], "user");
        assert_eq!(request["password"], "secret");

        let request_id = request["requestID"].as_str().unwrap();
        ws.send(ok_response(request_id, json!({"ID": "abc", "name": "Z"})))
            .await
            .unwrap();
    });

    let m = WebSocketManipulator::connect(test_config(&url)).await.unwrap();

    let mut things = [Thing::with_id("abc")];
    m.retrieve(&Context::new(), &mut things).await.unwrap();
    assert_eq!(things[0].name, "Z");

    server.await.unwrap();
    m.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests_are_multiplexed() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        ws.send(handshake_ok()).await.unwrap();

        let first = next_request(&mut ws).await;
        let second = next_request(&mut ws).await;

        // A response nobody is waiting for must be dropped silently.
        ws.send(ok_response("unknown-rid", json!({}))).await.unwrap();

        // Answer in reverse arrival order.
        for request in [&second, &first] {
            let request_id = request["requestID"].as_str().unwrap();
            let object_id = request["objectID"].as_str().unwrap();
            ws.send(ok_response(
                request_id,
                json!({"ID": object_id, "name": format!("name-{object_id}")}),
            ))
            .await
            .unwrap();
        }
    });

    let m = WebSocketManipulator::connect(test_config(&url)).await.unwrap();

    let mut a = [Thing::with_id("a")];
    let mut b = [Thing::with_id("b")];
    let ctx_a = Context::new();
    let ctx_b = Context::new();
    let (ra, rb) = tokio::join!(
        m.retrieve(&ctx_a, &mut a),
        m.retrieve(&ctx_b, &mut b),
    );
    ra.unwrap();
    rb.unwrap();

    assert_eq!(a[0].name, "name-a");
    assert_eq!(b[0].name, "name-b");

    server.await.unwrap();
    m.stop().await;
}

#[tokio::test]
async fn test_non_2xx_maps_to_specific_error() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        ws.send(handshake_ok()).await.unwrap();

        let request = next_request(&mut ws).await;
        let request_id = request["requestID"].as_str().unwrap();
        ws.send(error_response(request_id, 404, 404, "not found"))
            .await
            .unwrap();
    });

    let m = WebSocketManipulator::connect(test_config(&url)).await.unwrap();

    let mut things = [Thing::with_id("missing")];
    let err = m.retrieve(&Context::new(), &mut things).await.unwrap_err();
    assert!(matches!(err, DroverError::ObjectNotFound(msg) if msg == "not found"));

    server.await.unwrap();
    m.stop().await;
}

#[tokio::test]
async fn test_request_timeout() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        ws.send(handshake_ok()).await.unwrap();

        // Swallow the request and never answer.
        let _request = next_request(&mut ws).await;
        // Hold the socket open until the client gives up.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let config = test_config(&url).request_timeout(Duration::from_millis(200));
    let m = WebSocketManipulator::connect(config).await.unwrap();

    let mut things = [Thing::with_id("abc")];
    let err = m.retrieve(&Context::new(), &mut things).await.unwrap_err();
    assert!(matches!(err, DroverError::CannotCommunicate(msg) if msg == "Request timeout"));

    m.stop().await;
    server.abort();
}

#[tokio::test]
async fn test_reconnect_after_connection_loss() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        // First connection: handshake, then die.
        let (mut ws, _) = accept(&listener).await;
        ws.send(handshake_ok()).await.unwrap();
        drop(ws);

        // Second connection: back to normal service.
        let (mut ws, _) = accept(&listener).await;
        ws.send(handshake_ok()).await.unwrap();

        loop {
            let request = next_request(&mut ws).await;
            let request_id = request["requestID"].as_str().unwrap();
            let object_id = request["objectID"].as_str().unwrap();
            ws.send(ok_response(request_id, json!({"ID": object_id, "name": "restored"})))
                .await
                .unwrap();
        }
    });

    let config = test_config(&url).request_timeout(Duration::from_millis(300));
    let m = WebSocketManipulator::connect(config).await.unwrap();

    // Requests issued while the connection is down fail; the background
    // loop restores the connection and later requests succeed.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut things = [Thing::with_id("abc")];
        match m.retrieve(&Context::new(), &mut things).await {
            Ok(()) => {
                assert_eq!(things[0].name, "restored");
                break;
            }
            Err(e) => {
                assert!(e.is_communication(), "unexpected error: {e}");
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "connection never recovered"
                );
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    m.stop().await;
    server.abort();
}

#[derive(Debug)]
enum Seen {
    Event(String, EventKind),
    Error,
}

async fn next_seen(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within deadline")
        .expect("handler channel closed")
}

#[tokio::test]
async fn test_subscribe_events_and_recovery() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        // Request socket: handshake, then hold it open.
        let (mut ws, uri) = accept(&listener).await;
        assert!(uri.starts_with("/wsapi?"));
        ws.send(handshake_ok()).await.unwrap();
        tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });

        // First event connection: two events, one filtered out, then die.
        let (mut ws, uri) = accept(&listener).await;
        assert!(uri.starts_with("/events?"));
        assert!(uri.contains("token=secret"));
        ws.send(event("thing", "create", json!({"ID": "abc"})))
            .await
            .unwrap();
        ws.send(event("other", "create", json!({"ID": "zzz"})))
            .await
            .unwrap();
        // Give the client time to drain before the disconnect.
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(ws);

        // Second event connection: recovery, then one more event.
        let (mut ws, _) = accept(&listener).await;
        ws.send(event("thing", "update", json!({"ID": "abc"})))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let m = WebSocketManipulator::connect(test_config(&url)).await.unwrap();

    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let recoveries = Arc::new(AtomicUsize::new(0));

    let handler: drover::EventHandler = {
        let seen_tx = seen_tx.clone();
        Arc::new(move |received: drover::Result<drover::EventFrame>| {
            let seen = match received {
                Ok(event) => Seen::Event(event.identity, event.kind),
                Err(_) => Seen::Error,
            };
            let _ = seen_tx.send(seen);
        })
    };
    let recovery: drover::RecoveryHandler = {
        let recoveries = recoveries.clone();
        Arc::new(move || {
            recoveries.fetch_add(1, Ordering::SeqCst);
        })
    };

    let subscription = m
        .subscribe(
            &[Identity::new("thing", "things")],
            false,
            handler,
            Some(recovery),
        )
        .unwrap();

    // The "other" event is filtered out, so the sequence is:
    // event, receive error, recovery, event.
    assert!(matches!(
        next_seen(&mut seen_rx).await,
        Seen::Event(identity, EventKind::Create) if identity == "thing"
    ));
    assert!(matches!(next_seen(&mut seen_rx).await, Seen::Error));
    assert!(matches!(
        next_seen(&mut seen_rx).await,
        Seen::Event(identity, EventKind::Update) if identity == "thing"
    ));

    // Recovery fired exactly once: not on the initial connect, once for
    // the reconnect.
    assert_eq!(recoveries.load(Ordering::SeqCst), 1);

    subscription.unsubscribe();
    m.stop().await;
    server.abort();
}

struct CountingProvider {
    issued: AtomicUsize,
}

#[async_trait]
impl TokenProvider for CountingProvider {
    async fn issue_token(&self) -> drover::Result<String> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(format!("T{n}"))
    }
}

#[tokio::test]
async fn test_token_refresh_used_on_redial() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        // Initial dial carries the first issued token.
        let (mut ws, uri) = accept(&listener).await;
        assert!(uri.contains("token=T0"));
        ws.send(handshake_ok()).await.unwrap();

        // Let at least one refresh interval elapse, then kill the socket.
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(ws);

        // The redial presents the rotated token.
        let (mut ws, uri) = accept(&listener).await;
        assert!(!uri.contains("token=T0"), "redial reused the stale token: {uri}");
        assert!(uri.contains("token=T"));
        ws.send(handshake_ok()).await.unwrap();
    });

    let provider = Arc::new(CountingProvider {
        issued: AtomicUsize::new(0),
    });

    let m = WebSocketManipulator::connect_with_token_provider(
        test_config(&url),
        provider,
        Duration::from_millis(50),
    )
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server assertions never completed")
        .unwrap();

    m.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_fails_fast() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        ws.send(handshake_ok()).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let m = WebSocketManipulator::connect(test_config(&url)).await.unwrap();
    assert!(m.is_running());

    m.stop().await;
    m.stop().await;
    assert!(!m.is_running());

    let start = tokio::time::Instant::now();
    let mut things = [Thing::with_id("abc")];
    let err = m.retrieve(&Context::new(), &mut things).await.unwrap_err();
    assert!(err.is_communication());
    assert!(start.elapsed() < Duration::from_secs(1));

    server.abort();
}

#[tokio::test]
async fn test_rejected_handshake_fails_construction() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        ws.send(Message::Text(
            json!({
                "statusCode": 401,
                "errors": [{"code": 401, "description": "invalid token"}],
            })
            .to_string(),
        ))
        .await
        .unwrap();
    });

    let err = WebSocketManipulator::connect(test_config(&url)).await.unwrap_err();
    assert!(matches!(err, DroverError::CannotExecuteQuery(msg) if msg == "invalid token"));

    server.await.unwrap();
}

#[tokio::test]
async fn test_count_returns_total() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        ws.send(handshake_ok()).await.unwrap();

        let request = next_request(&mut ws).await;
        assert_eq!(request["operation"], "info");
        assert_eq!(request["parameters"]["filter"], "name == Z");

        let request_id = request["requestID"].as_str().unwrap();
        ws.send(Message::Text(
            json!({
                "request": {"requestID": request_id},
                "statusCode": 200,
                "total": 42,
            })
            .to_string(),
        ))
        .await
        .unwrap();
    });

    let m = WebSocketManipulator::connect(test_config(&url)).await.unwrap();

    let total = m
        .count(
            &Context::new().with_filter("name == Z"),
            &Identity::new("thing", "things"),
        )
        .await
        .unwrap();
    assert_eq!(total, 42);

    server.await.unwrap();
    m.stop().await;
}

#[tokio::test]
async fn test_create_round_trips_body() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        ws.send(handshake_ok()).await.unwrap();

        let request = next_request(&mut ws).await;
        assert_eq!(request["operation"], "create");
        assert_eq!(request["body"]["name"], "fresh");
        assert!(request.get("objectID").is_none());

        let request_id = request["requestID"].as_str().unwrap();
        ws.send(ok_response(
            request_id,
            json!({"ID": "server-assigned", "name": "fresh"}),
        ))
        .await
        .unwrap();
    });

    let m = WebSocketManipulator::connect(test_config(&url)).await.unwrap();

    let mut things = [Thing {
        id: String::new(),
        name: "fresh".to_string(),
    }];
    m.create(&Context::new(), &mut things).await.unwrap();
    assert_eq!(things[0].id, "server-assigned");

    server.await.unwrap();
    m.stop().await;
}

#[tokio::test]
async fn test_not_implemented_operations() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        ws.send(handshake_ok()).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let m = WebSocketManipulator::connect(test_config(&url)).await.unwrap();
    let identity = Identity::new("thing", "things");

    assert!(matches!(
        m.delete_many(&Context::new(), &identity).await.unwrap_err(),
        DroverError::NotImplemented(_)
    ));
    assert!(matches!(
        m.assign(&Context::new(), &identity, &["a".to_string()])
            .await
            .unwrap_err(),
        DroverError::NotImplemented(_)
    ));
    assert!(matches!(
        m.increment(&Context::new(), &identity, "hits", 1)
            .await
            .unwrap_err(),
        DroverError::NotImplemented(_)
    ));

    m.stop().await;
    server.abort();
}
