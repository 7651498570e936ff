// Protocol message bodies and replies

use serde::Deserialize;
use serde_json::{Map, Value, json};

pub const CHANNEL_HANDSHAKE: &str = "/meta/handshake";
pub const CHANNEL_CONNECT: &str = "/meta/connect";
pub const CHANNEL_SUBSCRIBE: &str = "/meta/subscribe";
pub const CONNECTION_TYPE: &str = "long-polling";

/// Replay marker asking the server for new events only.
const REPLAY_NEW_EVENTS: i64 = -2;

pub(crate) fn handshake_request() -> Value {
    json!([{
        "ext": { "replay": true },
        "supportedConnectionTypes": [CONNECTION_TYPE],
        "channel": CHANNEL_HANDSHAKE,
        "id": "1",
        "version": "1.0",
    }])
}

pub(crate) fn advice_request(client_id: &str) -> Value {
    json!([{
        "clientId": client_id,
        "advice": { "timeout": 0 },
        "channel": CHANNEL_CONNECT,
        "id": "2",
        "connectionType": CONNECTION_TYPE,
    }])
}

pub(crate) fn subscribe_request(client_id: &str, topic: &str) -> Value {
    let mut replay = Map::new();
    replay.insert(topic.to_owned(), json!(REPLAY_NEW_EVENTS));
    json!([{
        "ext": { "replay": replay },
        "clientId": client_id,
        "channel": CHANNEL_SUBSCRIBE,
        "subscription": topic,
        "id": "3",
    }])
}

pub(crate) fn connect_request(client_id: &str, id: u32) -> Value {
    json!([{
        "clientId": client_id,
        "channel": CHANNEL_CONNECT,
        "id": id.to_string(),
        "connectionType": CONNECTION_TYPE,
    }])
}

/// Server reply to a meta-channel request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub channel: Option<String>,
    #[serde(default)]
    pub successful: bool,
    pub client_id: Option<String>,
    pub error: Option<String>,
    pub advice: Option<Advice>,
    pub id: Option<String>,
}

/// Connection advice sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Advice {
    pub timeout: Option<u64>,
    pub interval: Option<u64>,
    pub reconnect: Option<String>,
}

/// Result of one connect exchange: the event envelopes that preceded the
/// trailing status reply.
#[derive(Debug, Clone, Default)]
pub struct ConnectBatch {
    pub events: Vec<Value>,
    pub status: Reply,
}

/// Extract `data.payload` from an event envelope.
pub fn decode_event(envelope: &Value) -> Option<Value> {
    envelope.get("data")?.get("payload").cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_requests_only_new_events_for_topic() {
        let body = subscribe_request("c1", "/topic/Orders");
        assert_eq!(body[0]["ext"]["replay"]["/topic/Orders"], -2);
        assert_eq!(body[0]["subscription"], "/topic/Orders");
        assert_eq!(body[0]["clientId"], "c1");
    }

    #[test]
    fn connect_sends_id_as_string() {
        let body = connect_request("c1", 42);
        assert_eq!(body[0]["id"], "42");
        assert_eq!(body[0]["connectionType"], "long-polling");
    }

    #[test]
    fn event_payload_is_extracted() {
        let envelope = json!({
            "channel": "/topic/Orders",
            "data": { "event": { "replayId": 7 }, "payload": { "Id": "001" } }
        });
        assert_eq!(decode_event(&envelope), Some(json!({ "Id": "001" })));
        assert_eq!(decode_event(&json!({ "channel": "/meta/connect" })), None);
    }
}
