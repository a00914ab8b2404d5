// Event frame decoding
//
// The node pushes JSON frames of the form
// `{"time", "source", "item", "name", "data"}`, optionally wrapped in an
// outer `{"event": {...}}` object. `name` selects the shape of `data`.

use serde::{Deserialize, Serialize};

use crate::auth::AccessLevel;
use crate::error::Error;

// ── Event payloads ───────────────────────────────────────────────────

/// Periodic state report. The only low-latency confirmation of the node's
/// operating mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub state: String,
}

/// Operating-mode transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    #[serde(default)]
    pub from_state: String,
    pub to_state: String,
}

impl StateChange {
    /// The heartbeat this transition is equivalent to once applied.
    pub fn as_heartbeat(&self) -> Heartbeat {
        Heartbeat {
            state: self.to_state.clone(),
        }
    }
}

/// A repeat number reported by `setupCapture` or `labelEnd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatNotice {
    pub repeat: u32,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub repeat_width: Option<u32>,
    #[serde(default)]
    pub repeat_height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One symbol found by sector detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub symbology: String,
    pub region: Region,
    #[serde(default)]
    pub orientation: i32,
}

/// Sector detection progress. Detection streams partial results and ends
/// with a terminal frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupDetect {
    pub terminal: bool,
    pub detections: Vec<Detection>,
}

/// Another client (or this one) opened or replaced a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateChange {
    #[serde(default)]
    pub id: Option<String>,
    pub access_level: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub state: Option<String>,
}

impl SessionStateChange {
    pub fn level(&self) -> Option<AccessLevel> {
        AccessLevel::parse(&self.access_level)
    }

    /// `state == "0"` announces a newly opened session; other values report
    /// a session ending.
    pub fn is_opened(&self) -> bool {
        self.state.as_deref() == Some("0")
    }
}

// ── Tagged event ─────────────────────────────────────────────────────

/// A decoded event-stream notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum InspectionEvent {
    Heartbeat(Heartbeat),
    StateChange(StateChange),
    SetupCapture(RepeatNotice),
    SetupDetect(SetupDetect),
    LabelEnd(RepeatNotice),
    SessionStateChange(SessionStateChange),
}

/// Discriminant of [`InspectionEvent`], used to key handler slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Heartbeat,
    StateChange,
    SetupCapture,
    SetupDetect,
    LabelEnd,
    SessionStateChange,
}

impl EventKind {
    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::StateChange => "stateChange",
            Self::SetupCapture => "setupCapture",
            Self::SetupDetect => "setupDetect",
            Self::LabelEnd => "labelEnd",
            Self::SessionStateChange => "sessionStateChange",
        }
    }
}

impl InspectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Heartbeat(_) => EventKind::Heartbeat,
            Self::StateChange(_) => EventKind::StateChange,
            Self::SetupCapture(_) => EventKind::SetupCapture,
            Self::SetupDetect(_) => EventKind::SetupDetect,
            Self::LabelEnd(_) => EventKind::LabelEnd,
            Self::SessionStateChange(_) => EventKind::SessionStateChange,
        }
    }

    /// Repeat number carried by capture and label-end events.
    pub fn repeat(&self) -> Option<u32> {
        match self {
            Self::SetupCapture(n) | Self::LabelEnd(n) => Some(n.repeat),
            _ => None,
        }
    }
}

/// A decoded event together with its frame metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub time: Option<String>,
    /// `system` for system-level events, otherwise the node.
    pub source: Option<String>,
    pub item: Option<i64>,
    pub event: InspectionEvent,
}

// ── Decoding ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    item: Option<i64>,
    name: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct DetectData {
    #[serde(default)]
    end: bool,
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for well-formed frames with an unknown `name`, and
/// [`Error::MalformedFrame`] when the frame is not JSON or a known event's
/// `data` does not have the expected shape.
pub fn decode_frame(text: &str) -> Result<Option<EventEnvelope>, Error> {
    let mut value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::MalformedFrame(e.to_string()))?;

    if let Some(inner) = value.get_mut("event").filter(|v| v.is_object()) {
        value = inner.take();
    }

    let raw: RawFrame =
        serde_json::from_value(value).map_err(|e| Error::MalformedFrame(e.to_string()))?;

    let Some(event) = decode_data(&raw.name, raw.data)? else {
        return Ok(None);
    };

    Ok(Some(EventEnvelope {
        time: raw.time,
        source: raw.source,
        item: raw.item,
        event,
    }))
}

fn decode_data(name: &str, data: serde_json::Value) -> Result<Option<InspectionEvent>, Error> {
    fn parse<T: serde::de::DeserializeOwned>(
        name: &str,
        data: serde_json::Value,
    ) -> Result<T, Error> {
        serde_json::from_value(data).map_err(|e| Error::MalformedFrame(format!("{name}: {e}")))
    }

    let event = match name {
        "heartbeat" => InspectionEvent::Heartbeat(parse(name, data)?),
        "stateChange" => InspectionEvent::StateChange(parse(name, data)?),
        "setupCapture" => InspectionEvent::SetupCapture(parse(name, data)?),
        "labelEnd" => InspectionEvent::LabelEnd(parse(name, data)?),
        "sessionStateChange" => InspectionEvent::SessionStateChange(parse(name, data)?),
        "setupDetect" | "setupDetectEnd" => {
            let detect: DetectData = if data.is_null() {
                DetectData {
                    end: false,
                    detections: Vec::new(),
                }
            } else {
                parse(name, data)?
            };
            InspectionEvent::SetupDetect(SetupDetect {
                terminal: detect.end || name == "setupDetectEnd",
                detections: detect.detections,
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn decode(value: serde_json::Value) -> Option<InspectionEvent> {
        decode_frame(&value.to_string()).unwrap().map(|e| e.event)
    }

    #[test]
    fn heartbeat_bare_frame() {
        let env = decode_frame(
            r#"{"time":"12:00:01","source":"node","item":1,"name":"heartbeat","data":{"state":"editing"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(env.source.as_deref(), Some("node"));
        assert_eq!(
            env.event,
            InspectionEvent::Heartbeat(Heartbeat {
                state: "editing".into()
            })
        );
    }

    #[test]
    fn wrapped_frame_is_unwrapped() {
        let ev = decode(json!({
            "event": {"name": "labelEnd", "data": {"repeat": 12, "position": 3}}
        }));
        assert_eq!(ev.as_ref().and_then(InspectionEvent::repeat), Some(12));
        assert_eq!(ev.map(|e| e.kind()), Some(EventKind::LabelEnd));
    }

    #[test]
    fn state_change_maps_to_heartbeat() {
        let Some(InspectionEvent::StateChange(sc)) = decode(json!({
            "name": "stateChange",
            "data": {"fromState": "editing", "toState": "running"}
        })) else {
            panic!("expected stateChange");
        };
        assert_eq!(sc.from_state, "editing");
        assert_eq!(sc.as_heartbeat().state, "running");
    }

    #[test]
    fn setup_detect_terminal_flag() {
        let partial = decode(json!({
            "name": "setupDetect",
            "data": {"detections": [{
                "symbology": "upcA",
                "region": {"x": 1, "y": 2, "width": 300, "height": 120},
                "orientation": 90
            }]}
        }));
        let Some(InspectionEvent::SetupDetect(d)) = partial else {
            panic!("expected setupDetect");
        };
        assert!(!d.terminal);
        assert_eq!(d.detections[0].region.width, 300);

        let end = decode(json!({"name": "setupDetect", "data": {"end": true}}));
        assert!(matches!(end, Some(InspectionEvent::SetupDetect(d)) if d.terminal));

        let named_end = decode(json!({"name": "setupDetectEnd"}));
        assert!(matches!(named_end, Some(InspectionEvent::SetupDetect(d)) if d.terminal));
    }

    #[test]
    fn session_state_change_level() {
        let Some(InspectionEvent::SessionStateChange(s)) = decode(json!({
            "name": "sessionStateChange",
            "data": {"id": "u2", "accessLevel": "control", "token": "T2", "state": "0"}
        })) else {
            panic!("expected sessionStateChange");
        };
        assert_eq!(s.level(), Some(AccessLevel::Control));
        assert_eq!(s.token, "T2");
        assert!(s.is_opened());

        let closed = SessionStateChange {
            state: Some("1".into()),
            ..s
        };
        assert!(!closed.is_opened());
    }

    #[test]
    fn unknown_names_are_ignored() {
        assert_eq!(decode(json!({"name": "inspectionEnd", "data": {}})), None);
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            decode_frame("not json"),
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"name":"labelEnd","data":{"repeat":"x"}}"#),
            Err(Error::MalformedFrame(msg)) if msg.starts_with("labelEnd")
        ));
    }
}
