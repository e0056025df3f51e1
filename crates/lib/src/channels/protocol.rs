//! Bridge wire protocol (JSON text frames over WebSocket).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway to bridge: `{ "type": "req", "id", "method", "params" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl BridgeRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            typ: "req".to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Bridge to gateway: a response to a request, or an unsolicited lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeFrame {
    /// `{ "type": "res", "id", "ok", "payload" or "error" }`.
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// `{ "type": "event", "event", "payload" }`.
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

impl BridgeFrame {
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        BridgeFrame::Res {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        BridgeFrame::Res {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn event(event: impl Into<String>, payload: Value) -> Self {
        BridgeFrame::Event {
            event: event.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = BridgeRequest::new("send", json!({ "to": "1@c.us", "text": "hi" }));
        let v = serde_json::to_value(&req).expect("serialize");
        assert_eq!(v["type"], "req");
        assert_eq!(v["method"], "send");
        assert_eq!(v["params"]["to"], "1@c.us");
        assert!(!req.id.is_empty());
    }

    #[test]
    fn parses_response_and_event_frames() {
        let res: BridgeFrame =
            serde_json::from_str(r#"{"type":"res","id":"7","ok":false,"error":"nope"}"#)
                .expect("parse res");
        assert!(matches!(res, BridgeFrame::Res { ok: false, error: Some(ref e), .. } if e == "nope"));

        let ev: BridgeFrame =
            serde_json::from_str(r#"{"type":"event","event":"ready"}"#).expect("parse event");
        assert!(matches!(ev, BridgeFrame::Event { ref event, payload: Value::Null } if event == "ready"));
    }
}
