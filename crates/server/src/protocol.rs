//! Line-delimited JSON wire format.
//!
//! Every stdin line is one [`Event`], tagged by `"event"`. Every event gets
//! exactly one [`Reply`] line on stdout.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use waystation_core::{ControlMessage, Request, RequestMode, Response, ResponseSource, Trigger};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Install,
    Activate,
    Request {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default)]
        mode: RequestMode,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        body: Option<String>,
    },
    Sync {
        tag: String,
    },
    PeriodicSync {
        tag: String,
    },
    Message {
        kind: ControlMessage,
    },
    /// Queue a payload for later delivery. Strings are stored verbatim, any other JSON value is serialized.
    Enqueue {
        tag: String,
        payload: Value,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

impl Event {
    /// Fetch events may overlap each other and everything else; the rest run one at a time.
    pub fn runs_concurrently(&self) -> bool {
        matches!(self, Event::Request { .. })
    }

    /// The engine trigger for this event, or `None` for events handled outside the dispatcher.
    pub fn into_trigger(self) -> Option<Trigger> {
        match self {
            Event::Install => Some(Trigger::Install),
            Event::Activate => Some(Trigger::Activate),
            Event::Request { method, url, mode, headers, body } => {
                let mut request = Request::new(method, url, mode);
                for (name, value) in headers {
                    request = request.with_header(&name, value);
                }
                request.body = body.map(Bytes::from);
                Some(Trigger::Request(request))
            }
            Event::Sync { tag } => Some(Trigger::Sync { tag }),
            Event::PeriodicSync { tag } => Some(Trigger::PeriodicSync { tag }),
            Event::Message { kind } => Some(Trigger::Message(kind)),
            Event::Enqueue { .. } => None,
        }
    }
}

/// Payload bytes of an enqueue event.
pub fn payload_bytes(payload: &Value) -> Bytes {
    match payload {
        Value::String(s) => Bytes::from(s.clone()),
        other => Bytes::from(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn ok(result: Value) -> Self {
        Self { ok: true, result: Some(result), error: None }
    }

    pub fn err(error: ErrorBody) -> Self {
        Self { ok: false, result: None, error: Some(error) }
    }
}

/// A response as sent over the wire. UTF-8 bodies travel as text, anything else as base64.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireResponse {
    pub status: u16,
    pub source: ResponseSource,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        let (body, body_base64) = match std::str::from_utf8(&response.body) {
            Ok(text) => (Some(text.to_string()), None),
            Err(_) => (None, Some(STANDARD.encode(&response.body))),
        };
        Self { status: response.status, source: response.source, headers: response.headers, body, body_base64 }
    }
}
