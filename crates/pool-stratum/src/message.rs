use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A Stratum V1 request or notification. The wire shape is identical; the
/// only difference is whether `id` is present. A server-pushed notification
/// (`mining.notify`, `mining.set_difficulty`, ...) carries `id: null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RequestMessage {
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn request(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A Stratum V1 response to a previously received request. Exactly one of
/// `result`/`error` is meaningful at a time; both are serialized because
/// most miner implementations expect the `result` key to be present (even
/// as `null`) alongside `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: Value,
    #[serde(default)]
    pub result: Value,
    pub error: Option<ErrorObject>,
}

impl ResponseMessage {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn err(id: Value, error: ErrorObject) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(error),
        }
    }
}

/// `[code, message, traceback]` as sent on the wire. `traceback` is always
/// `null` in practice but kept as an open slot for forward compatibility
/// with pools that fill it in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject(pub i32, pub String, pub Option<Value>);

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self(code, message.into(), None)
    }
}

/// Either half of the Stratum V1 message union. Deserialized untagged: an
/// incoming object with a `method` key is a request/notification, anything
/// else is treated as a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(RequestMessage),
    Response(ResponseMessage),
}

impl From<RequestMessage> for Message {
    fn from(r: RequestMessage) -> Self {
        Message::Request(r)
    }
}

impl From<ResponseMessage> for Message {
    fn from(r: ResponseMessage) -> Self {
        Message::Response(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips() {
        let msg: Message = serde_json::from_value(json!({
            "id": 1,
            "method": "mining.subscribe",
            "params": ["cgminer/4.10.0"]
        }))
        .unwrap();
        match msg {
            Message::Request(r) => {
                assert_eq!(r.method, "mining.subscribe");
                assert!(!r.is_notification());
            }
            Message::Response(_) => panic!("expected a request"),
        }
    }

    #[test]
    fn notification_has_null_id() {
        let msg = RequestMessage::notification("mining.notify", json!(["job1"]));
        let value = serde_json::to_value(Message::Request(msg)).unwrap();
        assert!(value["id"].is_null());
    }

    #[test]
    fn response_without_method_key_parses_as_response() {
        let msg: Message = serde_json::from_value(json!({
            "id": 1,
            "result": true,
            "error": null
        }))
        .unwrap();
        assert!(matches!(msg, Message::Response(_)));
    }
}
