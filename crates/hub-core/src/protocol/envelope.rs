//! JSON framing for the hub control channel.
//!
//! Outbound, every command is one text message:
//! ```text
//! {"hbus": {"cmd": <name>, "id": <correlation id>, "params": <object>}}
//! ```
//!
//! Inbound frames come in two shapes:
//! ```text
//! {"cmd": <name>, "id": <correlation id>, "code": 200, "msg": "OK", "data": <any>}
//! {"type": <topic>, "data": <any>}
//! ```
//! A frame that carries an `id` is a [`Reply`]; anything else is a
//! [`Notification`].  `data` is kept as undecoded JSON ([`Payload`]) until a
//! caller asks for a concrete type.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use serde_json::value::RawValue;
use serde_json::Value;
use thiserror::Error;

/// Synthetic message attached to `type` notifications, which carry no status.
pub const SYNTHETIC_SUCCESS_MESSAGE: &str = "Success";

/// Errors produced while encoding or classifying frames.
///
/// Decoding errors mark a frame as malformed.  The read loop logs and skips
/// such frames; they never end a session.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The text is not JSON at all.
    #[error("malformed frame: not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),

    /// The text is JSON but not an object.
    #[error("malformed frame: top-level value is not an object")]
    NotAnObject,

    /// The object has neither a `cmd` nor a `type` member.
    #[error("malformed frame: neither `cmd` nor `type` present")]
    Unclassifiable,

    /// A known member has the wrong JSON type or an unusable value.
    #[error("malformed frame: {0}")]
    InvalidField(String),

    /// Command parameters could not be serialized.
    #[error("could not encode parameters for `{command}`: {source}")]
    Encode {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

// ── Status codes ──────────────────────────────────────────────────────────────

/// A hub status code.
///
/// The hub uses HTTP-like codes and occasionally a decimal subtype such as
/// `200.2`, so the value is kept as `f64`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct StatusCode(pub f64);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200.0);
    pub const PROGRESS: StatusCode = StatusCode(100.0);

    /// `true` for any code in `200..300`, subtypes included.
    pub fn is_success(self) -> bool {
        (200.0..300.0).contains(&self.0)
    }

    /// `true` only for the plain progress code `100`.
    pub fn is_progress(self) -> bool {
        self.0 == 100.0
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl From<f64> for StatusCode {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{}", self.0 as i64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ── Payload ───────────────────────────────────────────────────────────────────

/// The undecoded `data` member of an inbound frame.
#[derive(Debug, Clone, Default)]
pub struct Payload(Option<Box<RawValue>>);

impl Payload {
    /// An absent payload; decodes as JSON `null`.
    pub fn empty() -> Self {
        Self(None)
    }

    /// Wraps already-serialized JSON text.
    pub fn from_json(json: impl Into<String>) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json.into()).map(|raw| Self(Some(raw)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// The raw JSON text, `null` when absent.
    pub fn as_json(&self) -> &str {
        self.0.as_deref().map(RawValue::get).unwrap_or("null")
    }

    /// Decodes the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.as_json())
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_json() == other.as_json()
    }
}

// ── Outbound ──────────────────────────────────────────────────────────────────

/// A command ready to be written to the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub name: String,
    pub id: String,
    pub params: Value,
}

#[derive(Serialize, Deserialize)]
struct HbusBody {
    cmd: String,
    id: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize, Deserialize)]
struct HbusFrame {
    hbus: HbusBody,
}

impl OutboundCommand {
    /// Builds a command, serializing `params` to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Encode`] if `params` cannot be serialized.
    pub fn new<P: Serialize + ?Sized>(
        name: impl Into<String>,
        id: impl Into<String>,
        params: &P,
    ) -> Result<Self, FrameError> {
        let name = name.into();
        let params = serde_json::to_value(params).map_err(|source| FrameError::Encode {
            command: name.clone(),
            source,
        })?;
        Ok(Self {
            name,
            id: id.into(),
            params,
        })
    }

    /// Renders the `{"hbus": ...}` text frame.
    pub fn encode(&self) -> Result<String, FrameError> {
        let frame = HbusFrame {
            hbus: HbusBody {
                cmd: self.name.clone(),
                id: self.id.clone(),
                params: self.params.clone(),
            },
        };
        serde_json::to_string(&frame).map_err(|source| FrameError::Encode {
            command: self.name.clone(),
            source,
        })
    }

    /// Parses an `{"hbus": ...}` frame, as the hub side of a connection would.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let frame: HbusFrame = serde_json::from_str(text).map_err(classify_json_error)?;
        Ok(Self {
            name: frame.hbus.cmd,
            id: frame.hbus.id,
            params: frame.hbus.params,
        })
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// A frame answering a specific command.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub command: String,
    pub id: String,
    pub code: StatusCode,
    pub message: String,
    pub payload: Payload,
}

/// A frame nobody asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub code: StatusCode,
    pub message: String,
    pub payload: Payload,
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Reply(Reply),
    Notification(Notification),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CodeField {
    Number(f64),
    Text(String),
}

#[derive(Deserialize)]
struct InboundFrame {
    cmd: Option<String>,
    id: Option<String>,
    code: Option<CodeField>,
    msg: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    data: Option<Box<RawValue>>,
}

impl Envelope {
    /// Classifies one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] describing why the frame is malformed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hub_core::protocol::Envelope;
    ///
    /// let envelope = Envelope::decode(r#"{"cmd":"x","id":"A","code":200}"#).unwrap();
    /// assert_eq!(envelope.correlation_id(), Some("A"));
    /// assert!(envelope.code().is_success());
    /// ```
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        if !text.trim_start().starts_with('{') {
            // Distinguish "valid JSON, wrong shape" from "not JSON".
            return match serde_json::from_str::<Value>(text) {
                Ok(_) => Err(FrameError::NotAnObject),
                Err(e) => Err(FrameError::NotJson(e)),
            };
        }

        let frame: InboundFrame = serde_json::from_str(text).map_err(classify_json_error)?;
        let payload = Payload(frame.data);
        let code = match frame.code {
            None => StatusCode::OK,
            Some(CodeField::Number(n)) => StatusCode(n),
            Some(CodeField::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(StatusCode)
                .map_err(|_| FrameError::InvalidField(format!("`code` is not numeric: {s:?}")))?,
        };
        let message = frame.msg.unwrap_or_default();

        match (frame.cmd, frame.id, frame.kind) {
            (Some(command), Some(id), _) => Ok(Envelope::Reply(Reply {
                command,
                id,
                code,
                message,
                payload,
            })),
            (Some(topic), None, _) => Ok(Envelope::Notification(Notification {
                topic,
                code,
                message,
                payload,
            })),
            (None, _, Some(topic)) => Ok(Envelope::Notification(Notification {
                topic,
                code: StatusCode::OK,
                message: SYNTHETIC_SUCCESS_MESSAGE.to_string(),
                payload,
            })),
            (None, _, None) => Err(FrameError::Unclassifiable),
        }
    }

    /// The command name or notification topic.
    pub fn topic(&self) -> &str {
        match self {
            Envelope::Reply(r) => &r.command,
            Envelope::Notification(n) => &n.topic,
        }
    }

    /// The correlation id, present only on replies.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Envelope::Reply(r) => Some(&r.id),
            Envelope::Notification(_) => None,
        }
    }

    pub fn code(&self) -> StatusCode {
        match self {
            Envelope::Reply(r) => r.code,
            Envelope::Notification(n) => n.code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Envelope::Reply(r) => &r.message,
            Envelope::Notification(n) => &n.message,
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            Envelope::Reply(r) => &r.payload,
            Envelope::Notification(n) => &n.payload,
        }
    }
}

fn classify_json_error(e: serde_json::Error) -> FrameError {
    match e.classify() {
        Category::Data => FrameError::InvalidField(e.to_string()),
        Category::Syntax | Category::Eof | Category::Io => FrameError::NotJson(e),
    }
}
