//! JSON wire protocol: inbound command parsing and outbound message shapes.
//!
//! Inbound messages are objects with a `message` discriminant, matched
//! case-insensitively. Outbound messages carry a `type` discriminant, except
//! the `ping` reply which mirrors the request shape.

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use serde_json::{json, Map, Value};

use treeline_accessibility::{SessionEvent, Snapshot};

/// A parsed client command. Parameter validation beyond presence of the
/// discriminant happens in the dispatcher, so a recognized command with bad
/// parameters still produces its typed failure response.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Capture { visible_only: bool },
    CaptureNotImportant { visible_only: bool },
    PerformAction {
        resource_id: Option<String>,
        hash_code: Option<String>,
        action: Option<String>,
        text: Option<String>,
    },
    PerformGesture {
        gesture_type: Option<String>,
        x: Option<f32>,
        y: Option<f32>,
        end_x: Option<f32>,
        end_y: Option<f32>,
        duration: Option<u64>,
    },
    LaunchActivity {
        launch_type: Option<String>,
        package_name: Option<String>,
        class_name: Option<String>,
        intent_action: Option<String>,
        data: Option<String>,
        category: Option<String>,
        extras: Option<Value>,
    },
    FindByViewId { view_id: Option<String>, verbose: bool },
    FindByText { text: Option<String>, verbose: bool },
    FindByRegex { pattern: Option<String>, verbose: bool },
    FindByProps { properties: Option<Value>, verbose: bool },
    Ping,
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn bool_field(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn f32_field(object: &Map<String, Value>, key: &str) -> Option<f32> {
    object.get(key).and_then(Value::as_f64).map(|v| v as f32)
}

/// Node ids travel as either a JSON number or a decimal string.
fn id_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

impl Command {
    /// Parses one inbound frame. Errors name what went wrong so the caller
    /// can echo them back as an `error` message.
    pub fn parse(raw: &str) -> Result<Command> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| anyhow!("Invalid JSON: {e}"))?;
        let Some(object) = value.as_object() else {
            bail!("Expected a JSON object");
        };
        let Some(message) = object.get("message").and_then(|v| v.as_str()) else {
            bail!("Missing 'message' field");
        };

        let verbose = bool_field(object, "verbose");
        let command = match message.to_lowercase().as_str() {
            "capture" => Command::Capture {
                visible_only: bool_field(object, "visibleOnly"),
            },
            "capturenotimportant" => Command::CaptureNotImportant {
                visible_only: bool_field(object, "visibleOnly"),
            },
            "performaction" => Command::PerformAction {
                resource_id: string_field(object, "resourceId"),
                hash_code: id_field(object, "hashCode"),
                action: string_field(object, "action"),
                text: string_field(object, "text"),
            },
            "performgesture" => Command::PerformGesture {
                gesture_type: string_field(object, "gestureType"),
                x: f32_field(object, "x"),
                y: f32_field(object, "y"),
                end_x: f32_field(object, "endX"),
                end_y: f32_field(object, "endY"),
                duration: object.get("duration").and_then(Value::as_u64),
            },
            "launchactivity" => Command::LaunchActivity {
                launch_type: string_field(object, "launchType"),
                package_name: string_field(object, "packageName"),
                class_name: string_field(object, "className"),
                intent_action: string_field(object, "intentAction"),
                data: string_field(object, "data"),
                category: string_field(object, "category"),
                extras: object.get("extras").cloned(),
            },
            "findbyviewid" | "customfindbyviewid" => Command::FindByViewId {
                view_id: string_field(object, "viewId"),
                verbose,
            },
            "findbytext" | "customfindbytext" => Command::FindByText {
                text: string_field(object, "text"),
                verbose,
            },
            "findbyregex" => Command::FindByRegex {
                pattern: string_field(object, "pattern"),
                verbose,
            },
            "findbyprops" => Command::FindByProps {
                properties: object.get("properties").cloned(),
                verbose,
            },
            "ping" => Command::Ping,
            other => bail!("Unknown command: {other}"),
        };
        Ok(command)
    }
}

fn snapshot_children(snapshot: &Snapshot) -> Value {
    Value::Array(
        snapshot
            .windows
            .iter()
            .map(|w| serde_json::to_value(&w.record).unwrap_or(Value::Null))
            .collect(),
    )
}

/// Full capture, broadcast to every client.
pub fn tree_message(snapshot: &Snapshot) -> Value {
    json!({
        "type": "tree",
        "name": "",
        "children": snapshot_children(snapshot),
    })
}

/// Auto-capture after the screen settled.
pub fn stable_tree_message(snapshot: &Snapshot) -> Value {
    json!({
        "type": "stableTree",
        "timestamp": snapshot.captured_at.timestamp_millis(),
        "children": snapshot_children(snapshot),
    })
}

pub fn action_result(success: bool, message: &str) -> Value {
    json!({ "type": "actionResult", "success": success, "message": message })
}

pub fn gesture_result(success: bool, message: &str) -> Value {
    json!({ "type": "gestureResult", "success": success, "message": message })
}

pub fn launch_result(success: bool, message: &str) -> Value {
    json!({ "type": "launchResult", "success": success, "message": message })
}

pub fn find_result(nodes: Vec<Value>, query: &str, search_type: &str) -> Value {
    json!({
        "type": "findResult",
        "success": true,
        "count": nodes.len(),
        "nodes": nodes,
        "query": query,
        "searchType": search_type,
    })
}

pub fn find_failure(message: &str, query: &str, search_type: &str) -> Value {
    json!({
        "type": "findResult",
        "success": false,
        "count": 0,
        "nodes": [],
        "query": query,
        "searchType": search_type,
        "message": message,
    })
}

pub fn error_message(message: &str) -> Value {
    json!({ "type": "error", "message": message })
}

pub fn pong() -> Value {
    json!({ "message": "pong" })
}

/// Session events become `accessibilityEvent` broadcasts.
pub fn accessibility_event(event: &SessionEvent) -> Value {
    let timestamp = Utc::now().timestamp_millis();
    match event {
        SessionEvent::ScrollSequenceEnd {
            total_scroll_x,
            total_scroll_y,
            scroll_event_count,
            scroll_timestamps,
            source,
        } => {
            let mut message = json!({
                "type": "accessibilityEvent",
                "eventType": "SCROLL_SEQUENCE_END",
                "timestamp": timestamp,
                "totalScrollX": total_scroll_x,
                "totalScrollY": total_scroll_y,
                "scrollEventCount": scroll_event_count,
                "scrollTimestamps": scroll_timestamps,
            });
            if let Some(source) = source {
                message["source"] = source.to_wire();
            }
            message
        }
        SessionEvent::TextSequenceEnd {
            session_text,
            text_event_count,
            paste_event_count,
            contains_paste,
            session_duration_ms,
            text_field_source,
            tree_context,
        } => {
            let mut message = json!({
                "type": "accessibilityEvent",
                "eventType": "TEXT_SEQUENCE_END",
                "timestamp": timestamp,
                "sessionText": session_text,
                "textEventCount": text_event_count,
                "pasteEventCount": paste_event_count,
                "containsPaste": contains_paste,
                "sessionDurationMs": session_duration_ms,
            });
            if let Some(source) = text_field_source {
                message["textFieldSource"] = source.to_wire();
            }
            if let Some(context) = tree_context {
                message["treeContext"] = snapshot_children(context);
            }
            message
        }
        SessionEvent::Announcement { announcement } => json!({
            "type": "accessibilityEvent",
            "eventType": "ANNOUNCEMENT",
            "timestamp": timestamp,
            "announcement": announcement,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_is_case_insensitive() {
        assert_eq!(Command::parse(r#"{"message":"PING"}"#).unwrap(), Command::Ping);
        assert_eq!(
            Command::parse(r#"{"message":"Capture"}"#).unwrap(),
            Command::Capture { visible_only: false }
        );
    }

    #[test]
    fn test_capture_visible_only_flag() {
        let command =
            Command::parse(r#"{"message":"captureNotImportant","visibleOnly":true}"#).unwrap();
        assert_eq!(command, Command::CaptureNotImportant { visible_only: true });
    }

    #[test]
    fn test_perform_action_accepts_numeric_hash_code() {
        let command =
            Command::parse(r#"{"message":"performAction","hashCode":12345,"action":"CLICK"}"#)
                .unwrap();
        match command {
            Command::PerformAction { hash_code, action, .. } => {
                assert_eq!(hash_code.as_deref(), Some("12345"));
                assert_eq!(action.as_deref(), Some("CLICK"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_custom_find_aliases() {
        let a = Command::parse(r#"{"message":"findByText","text":"OK"}"#).unwrap();
        let b = Command::parse(r#"{"message":"customFindByText","text":"OK"}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_command_and_bad_json() {
        let err = Command::parse(r#"{"message":"frobnicate"}"#).unwrap_err();
        assert!(err.to_string().contains("Unknown command: frobnicate"));

        let err = Command::parse("not json").unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));

        let err = Command::parse(r#"{"other":1}"#).unwrap_err();
        assert!(err.to_string().contains("Missing 'message' field"));
    }

    #[test]
    fn test_pong_shape() {
        assert_eq!(pong(), json!({"message": "pong"}));
    }

    #[test]
    fn test_text_event_wire_carries_context_when_present() {
        let base = SessionEvent::TextSequenceEnd {
            session_text: "hello".to_string(),
            text_event_count: 5,
            paste_event_count: 0,
            contains_paste: false,
            session_duration_ms: 1200,
            text_field_source: None,
            tree_context: None,
        };
        let wire = accessibility_event(&base);
        assert_eq!(wire["eventType"], "TEXT_SEQUENCE_END");
        assert_eq!(wire["sessionText"], "hello");
        assert!(wire.get("treeContext").is_none());

        let with_context = SessionEvent::TextSequenceEnd {
            session_text: "hello".to_string(),
            text_event_count: 5,
            paste_event_count: 0,
            contains_paste: false,
            session_duration_ms: 1200,
            text_field_source: None,
            tree_context: Some(Snapshot {
                captured_at: Utc::now(),
                windows: Vec::new(),
            }),
        };
        let wire = accessibility_event(&with_context);
        assert_eq!(wire["treeContext"], json!([]));
    }

    #[test]
    fn test_scroll_event_wire_shape() {
        let event = SessionEvent::ScrollSequenceEnd {
            total_scroll_x: 12,
            total_scroll_y: -40,
            scroll_event_count: 3,
            scroll_timestamps: vec![1, 2, 3],
            source: None,
        };
        let wire = accessibility_event(&event);
        assert_eq!(wire["type"], "accessibilityEvent");
        assert_eq!(wire["eventType"], "SCROLL_SEQUENCE_END");
        assert_eq!(wire["totalScrollY"], -40);
        assert_eq!(wire["scrollTimestamps"], json!([1, 2, 3]));
        assert!(wire.get("source").is_none());
    }
}
