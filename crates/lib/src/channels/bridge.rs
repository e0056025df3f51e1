//! Bridge connector: opens chat-network sessions through a sidecar over WebSocket.
//!
//! One WebSocket per session. A writer task drains outgoing frames; a reader task matches
//! responses to pending requests and turns lifecycle events into [`SessionEvent`]s.

use crate::channels::inbound::InboundMessage;
use crate::channels::protocol::{BridgeFrame, BridgeRequest};
use crate::config::{self, Config};
use crate::connection::{Connector, DisconnectCause, EventSink, SessionEvent, SessionHandle};
use crate::credentials::Credentials;
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::{self, Message};

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, String>>>>>;

/// Map a bridge event onto a session event. Unknown events yield `None`.
pub fn event_to_session(event: &str, payload: &Value) -> Option<SessionEvent> {
    let field = |k: &str| payload.get(k).and_then(|v| v.as_str());
    match event {
        "qr" => field("code")
            .or_else(|| field("qr"))
            .map(|c| SessionEvent::PairingChallenge(c.to_string())),
        "ready" | "open" => Some(SessionEvent::Open),
        "disconnected" | "close" => Some(SessionEvent::Close(DisconnectCause::from_reason(
            field("reason").unwrap_or(""),
        ))),
        "auth_failure" => Some(SessionEvent::Close(DisconnectCause::LoggedOut)),
        "creds" => Some(SessionEvent::CredentialsChanged(Credentials(
            payload
                .get("credentials")
                .cloned()
                .unwrap_or_else(|| payload.clone()),
        ))),
        "message" => {
            let from = field("from")?;
            let text = field("body").or_else(|| field("text")).unwrap_or("");
            Some(SessionEvent::MessageReceived(InboundMessage {
                from: from.to_string(),
                text: text.to_string(),
            }))
        }
        _ => None,
    }
}

pub struct BridgeConnector {
    url: String,
    request_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            request_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config::resolve_bridge_url(config),
            Duration::from_secs(config.bridge.request_timeout_secs.max(1)),
        )
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(
        &self,
        credentials: Option<Credentials>,
        sink: EventSink,
    ) -> Result<Arc<dyn SessionHandle>, String> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| format!("connecting to bridge at {}: {}", self.url, e))?;
        let (mut write, read) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let ending = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if write.send(msg).await.is_err() || is_close {
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(read_loop(
            read,
            sink,
            pending.clone(),
            closed.clone(),
            ending.clone(),
        ));

        let session = Arc::new(BridgeSession {
            out_tx,
            pending,
            closed,
            ending,
            request_timeout: self.request_timeout,
        });
        if let Err(e) = session
            .request("connect", json!({ "credentials": credentials }))
            .await
        {
            session.close().await;
            return Err(e);
        }
        log::info!("bridge session opened at {}", self.url);
        Ok(session)
    }
}

async fn read_loop<S>(
    mut read: S,
    sink: EventSink,
    pending: Pending,
    closed: Arc<AtomicBool>,
    ending: Arc<AtomicBool>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut close_reported = false;
    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                log::debug!("bridge read error: {}", e);
                break;
            }
        };
        match serde_json::from_str::<BridgeFrame>(&text) {
            Ok(BridgeFrame::Res {
                id,
                ok,
                payload,
                error,
            }) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let result = if ok {
                        Ok(payload.unwrap_or(Value::Null))
                    } else {
                        Err(error.unwrap_or_else(|| "bridge request failed".to_string()))
                    };
                    let _ = tx.send(result);
                }
            }
            Ok(BridgeFrame::Event { event, payload }) => {
                if event == "auth_failure" {
                    log::warn!(
                        "bridge reported auth failure: {}",
                        payload.get("message").and_then(|m| m.as_str()).unwrap_or("")
                    );
                }
                match event_to_session(&event, &payload) {
                    Some(ev) => {
                        if matches!(ev, SessionEvent::Close(_)) {
                            close_reported = true;
                        }
                        if !sink.emit(ev).await {
                            break;
                        }
                    }
                    None => log::debug!("ignoring bridge event {}", event),
                }
            }
            Err(e) => log::debug!("unparseable bridge frame: {}", e),
        }
    }
    // Mark closed before draining so a request racing this point cannot wait for its timeout.
    closed.store(true, Ordering::SeqCst);
    pending.lock().await.clear();
    if !close_reported && !ending.load(Ordering::SeqCst) {
        let _ = sink
            .emit(SessionEvent::Close(DisconnectCause::Transient))
            .await;
    }
    log::debug!("bridge reader for generation {} finished", sink.generation());
}

struct BridgeSession {
    out_tx: mpsc::Sender<Message>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    ending: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl BridgeSession {
    async fn request(&self, method: &str, params: Value) -> Result<Value, String> {
        let req = BridgeRequest::new(method, params);
        let text = serde_json::to_string(&req).map_err(|e| e.to_string())?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(req.id.clone(), tx);
        if self.closed.load(Ordering::SeqCst) || self.out_tx.send(Message::Text(text)).await.is_err() {
            self.pending.lock().await.remove(&req.id);
            return Err("bridge connection closed".to_string());
        }
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("bridge connection closed".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&req.id);
                Err(format!(
                    "bridge did not answer {} within {}s",
                    method,
                    self.request_timeout.as_secs()
                ))
            }
        }
    }

    async fn close(&self) {
        self.ending.store(true, Ordering::SeqCst);
        let _ = self.out_tx.send(Message::Close(None)).await;
    }
}

#[async_trait]
impl SessionHandle for BridgeSession {
    async fn send(&self, address: &str, content: &str) -> Result<(), String> {
        self.request("send", json!({ "to": address, "text": content }))
            .await
            .map(|_| ())
    }

    async fn logout(&self) -> Result<(), String> {
        self.request("logout", json!({})).await.map(|_| ())
    }

    async fn end(&self) -> Result<(), String> {
        self.ending.store(true, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.request("end", json!({})).await.map(|_| ());
        self.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Input;
    use tokio::net::TcpListener;

    type ServerWs = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    async fn next_request(ws: &mut ServerWs) -> BridgeRequest {
        while let Some(msg) = ws.next().await {
            if let Ok(Message::Text(text)) = msg {
                return serde_json::from_str(&text).expect("request frame");
            }
        }
        panic!("client closed before sending a request");
    }

    async fn reply(ws: &mut ServerWs, frame: BridgeFrame) {
        let text = serde_json::to_string(&frame).expect("serialize frame");
        ws.send(Message::Text(text)).await.expect("send frame");
    }

    #[test]
    fn maps_bridge_events() {
        assert_eq!(
            event_to_session("qr", &json!({ "code": "ABC" })),
            Some(SessionEvent::PairingChallenge("ABC".into()))
        );
        assert_eq!(event_to_session("ready", &Value::Null), Some(SessionEvent::Open));
        assert_eq!(
            event_to_session("disconnected", &json!({ "reason": "LOGOUT" })),
            Some(SessionEvent::Close(DisconnectCause::LoggedOut))
        );
        assert_eq!(
            event_to_session("disconnected", &json!({ "reason": "NAVIGATION" })),
            Some(SessionEvent::Close(DisconnectCause::Transient))
        );
        assert_eq!(
            event_to_session("auth_failure", &json!({ "message": "bad session" })),
            Some(SessionEvent::Close(DisconnectCause::LoggedOut))
        );
        assert_eq!(
            event_to_session("creds", &json!({ "credentials": { "k": 1 } })),
            Some(SessionEvent::CredentialsChanged(Credentials(json!({ "k": 1 }))))
        );
        assert_eq!(
            event_to_session("message", &json!({ "from": "1@c.us", "body": "hey" })),
            Some(SessionEvent::MessageReceived(InboundMessage {
                from: "1@c.us".into(),
                text: "hey".into(),
            }))
        );
        assert_eq!(event_to_session("message", &json!({})), None);
        assert_eq!(event_to_session("loading_screen", &Value::Null), None);
    }

    #[tokio::test]
    async fn relays_requests_and_events_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");

            let req = next_request(&mut ws).await;
            assert_eq!(req.method, "connect");
            assert_eq!(req.params["credentials"]["me"], "6281234");
            reply(&mut ws, BridgeFrame::ok(&req.id, json!({}))).await;
            reply(&mut ws, BridgeFrame::event("qr", json!({ "code": "ABC" }))).await;

            let req = next_request(&mut ws).await;
            assert_eq!(req.method, "send");
            assert_eq!(req.params["to"], "6281234@c.us");
            assert_eq!(req.params["text"], "hi");
            reply(&mut ws, BridgeFrame::ok(&req.id, json!({}))).await;

            let req = next_request(&mut ws).await;
            assert_eq!(req.method, "logout");
            reply(&mut ws, BridgeFrame::err(&req.id, "not paired")).await;
        });

        let (tx, mut rx) = mpsc::channel(16);
        let sink = EventSink::new(7, tx);
        let connector = BridgeConnector::new(format!("ws://{}", addr), Duration::from_secs(5));
        let session = connector
            .connect(Some(Credentials(json!({ "me": "6281234" }))), sink)
            .await
            .expect("connect");

        match rx.recv().await {
            Some(Input::Session {
                generation: 7,
                event: SessionEvent::PairingChallenge(code),
            }) => assert_eq!(code, "ABC"),
            _ => panic!("expected pairing challenge"),
        }

        session.send("6281234@c.us", "hi").await.expect("send");
        assert_eq!(session.logout().await, Err("not paired".to_string()));
        server.await.expect("server task");

        match rx.recv().await {
            Some(Input::Session {
                event: SessionEvent::Close(DisconnectCause::Transient),
                ..
            }) => {}
            _ => panic!("expected transient close after the bridge went away"),
        }
        assert!(session.end().await.is_ok());
    }

    #[tokio::test]
    async fn connect_fails_when_bridge_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        drop(listener);
        let (tx, _rx) = mpsc::channel(4);
        let connector = BridgeConnector::new(format!("ws://{}", addr), Duration::from_secs(1));
        let err = connector
            .connect(None, EventSink::new(1, tx))
            .await
            .err()
            .expect("connect must fail");
        assert!(err.contains("connecting to bridge"));
    }
}
