//! Wire codec for the peer's `nodes` channel.
//!
//! Every frame is `"<channel>:<json>"`. Requests wrap an inner payload in a
//! `stateEvents` envelope; responses arrive in the same envelope and are
//! dispatched on `payload.event`.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::events::StateSummary;

/// Channel literal prefixed to every frame.
pub const CHANNEL: &str = "nodes";

/// Envelope `type` for avatar state traffic.
pub const STATE_EVENTS: &str = "stateEvents";

/// Identifies this client to the peer, both as the subscription token and in
/// the connection URL.
pub const CLIENT_TOKEN: &str = "veadolink";

const NODE_ID: &str = "mini";
const NODE_NAME: &str = "avatar state";

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A request this client can send to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Start receiving push events.
    Subscribe,
    /// Stop receiving push events.
    Unsubscribe,
    /// Ask for the full state list.
    List,
    /// Ask which state is active.
    Peek,
    /// Ask for one state's thumbnail.
    Thumbnail(String),
    /// Make a state active.
    SetState(String),
    /// Toggle a state.
    ToggleState(String),
}

impl Request {
    fn inner_payload(&self) -> Value {
        match self {
            Self::Subscribe => json!({"event": "listen", "token": CLIENT_TOKEN}),
            Self::Unsubscribe => json!({"event": "unlisten", "token": CLIENT_TOKEN}),
            Self::List => json!({"event": "list"}),
            Self::Peek => json!({"event": "peek"}),
            Self::Thumbnail(state) => json!({"event": "thumb", "state": state}),
            Self::SetState(state) => json!({"event": "set", "state": state}),
            Self::ToggleState(state) => json!({"event": "toggle", "state": state}),
        }
    }

    /// Encode into a wire frame.
    pub fn encode(&self) -> String {
        let envelope = json!({
            "event": "payload",
            "type": STATE_EVENTS,
            "id": NODE_ID,
            "name": NODE_NAME,
            "payload": self.inner_payload(),
        });
        format!("{CHANNEL}:{envelope}")
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A decoded push message from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Full state list.
    List(Vec<StateSummary>),
    /// The currently active state.
    Peek(String),
    /// One state's thumbnail. The PNG is still base64 encoded.
    Thumbnail(ThumbnailPayload),
}

/// Body of a `thumb` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThumbnailPayload {
    #[serde(rename = "state")]
    pub state_id: String,
    pub hash: String,
    pub width: u32,
    pub height: u32,
    /// Base64 encoded PNG.
    pub png: String,
}

/// Why a frame could not be decoded. Always recoverable: the caller logs and
/// drops the frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame has no channel separator")]
    MissingChannel,

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected envelope type {0:?}")]
    UnexpectedType(Option<String>),

    #[error("envelope has no payload")]
    MissingPayload,

    #[error("unrecognized message event {0:?}")]
    Unrecognized(Option<String>),
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct ListPayload {
    states: Vec<StateSummary>,
}

#[derive(Deserialize)]
struct PeekPayload {
    state: String,
}

/// Decode a wire frame.
pub fn decode(raw: &str) -> Result<Response, DecodeError> {
    let (_channel, body) = raw.split_once(':').ok_or(DecodeError::MissingChannel)?;
    let envelope: InboundEnvelope = serde_json::from_str(body)?;

    if envelope.kind.as_deref() != Some(STATE_EVENTS) {
        return Err(DecodeError::UnexpectedType(envelope.kind));
    }
    let payload = envelope.payload.ok_or(DecodeError::MissingPayload)?;

    let event = payload.get("event").and_then(Value::as_str).map(str::to_owned);
    match event.as_deref() {
        Some("list") => {
            let list: ListPayload = serde_json::from_value(payload)?;
            Ok(Response::List(list.states))
        }
        Some("peek") => {
            let peek: PeekPayload = serde_json::from_value(payload)?;
            Ok(Response::Peek(peek.state))
        }
        Some("thumb") => Ok(Response::Thumbnail(serde_json::from_value(payload)?)),
        _ => Err(DecodeError::Unrecognized(event)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn split_frame(frame: &str) -> (&str, Value) {
        let (channel, body) = frame.split_once(':').unwrap();
        (channel, serde_json::from_str(body).unwrap())
    }

    fn frame(payload: Value) -> String {
        format!(
            "nodes:{}",
            json!({"event": "payload", "type": "stateEvents", "id": "mini", "name": "avatar state", "payload": payload})
        )
    }

    #[test]
    fn test_encode_envelope() {
        let frame = Request::List.encode();
        let (channel, body) = split_frame(&frame);
        assert_eq!(channel, "nodes");
        assert_eq!(
            body,
            json!({
                "event": "payload",
                "type": "stateEvents",
                "id": "mini",
                "name": "avatar state",
                "payload": {"event": "list"},
            })
        );
    }

    #[test]
    fn test_encode_inner_payloads() {
        let cases = [
            (Request::Subscribe, json!({"event": "listen", "token": "veadolink"})),
            (Request::Unsubscribe, json!({"event": "unlisten", "token": "veadolink"})),
            (Request::Peek, json!({"event": "peek"})),
            (Request::Thumbnail("happy".into()), json!({"event": "thumb", "state": "happy"})),
            (Request::SetState("sad".into()), json!({"event": "set", "state": "sad"})),
            (Request::ToggleState("mad".into()), json!({"event": "toggle", "state": "mad"})),
        ];
        for (request, expected) in cases {
            let frame = request.encode();
            let (_, body) = split_frame(&frame);
            assert_eq!(body["payload"], expected, "{request:?}");
        }
    }

    #[test]
    fn test_decode_list() {
        let raw = frame(json!({
            "event": "list",
            "states": [
                {"id": "happy", "name": "Happy", "thumbHash": "h1"},
                {"id": "sad", "name": "Sad", "thumbHash": "h2"},
            ],
        }));
        let Response::List(states) = decode(&raw).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].id, "happy");
        assert_eq!(states[0].name, "Happy");
        assert_eq!(states[1].thumb_hash, "h2");
    }

    #[test]
    fn test_decode_peek() {
        let raw = frame(json!({"event": "peek", "state": "happy"}));
        assert_eq!(decode(&raw).unwrap(), Response::Peek("happy".into()));
    }

    #[test]
    fn test_decode_thumb_keeps_base64() {
        let raw = frame(json!({
            "event": "thumb",
            "state": "happy",
            "hash": "h1",
            "width": 64,
            "height": 32,
            "png": "aGVsbG8=",
        }));
        let Response::Thumbnail(thumb) = decode(&raw).unwrap() else {
            panic!("expected thumbnail");
        };
        assert_eq!(thumb.state_id, "happy");
        assert_eq!(thumb.hash, "h1");
        assert_eq!((thumb.width, thumb.height), (64, 32));
        assert_eq!(thumb.png, "aGVsbG8=");
    }

    #[test]
    fn test_decode_payload_with_colons() {
        let raw = frame(json!({"event": "peek", "state": "a:b:c"}));
        assert_eq!(decode(&raw).unwrap(), Response::Peek("a:b:c".into()));
    }

    #[test]
    fn test_decode_missing_channel() {
        assert!(matches!(decode("no separator"), Err(DecodeError::MissingChannel)));
    }

    #[test]
    fn test_decode_bad_json() {
        assert!(matches!(decode("nodes:{oops"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_wrong_type() {
        let raw = format!("nodes:{}", json!({"type": "somethingElse", "payload": {}}));
        assert!(matches!(
            decode(&raw),
            Err(DecodeError::UnexpectedType(Some(t))) if t == "somethingElse"
        ));
    }

    #[test]
    fn test_decode_missing_payload() {
        let raw = format!("nodes:{}", json!({"type": "stateEvents"}));
        assert!(matches!(decode(&raw), Err(DecodeError::MissingPayload)));
    }

    #[test]
    fn test_decode_unrecognized_event() {
        let raw = frame(json!({"event": "listen"}));
        assert!(matches!(
            decode(&raw),
            Err(DecodeError::Unrecognized(Some(e))) if e == "listen"
        ));
    }

    #[test]
    fn test_decode_missing_keys_is_error() {
        let raw = frame(json!({"event": "peek"}));
        assert!(matches!(decode(&raw), Err(DecodeError::Json(_))));

        let raw = frame(json!({"event": "list", "states": [{"id": "x"}]}));
        assert!(matches!(decode(&raw), Err(DecodeError::Json(_))));
    }
}
