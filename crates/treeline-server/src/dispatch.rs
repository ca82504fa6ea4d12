//! Command dispatcher: validates parsed commands, runs them against the
//! engine, and produces outbound messages with their routing.
//!
//! The dispatcher holds no session state. Everything time-dependent lives in
//! the driver task; the only coupling is a control message that cancels a
//! pending stability capture when a client captures manually.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use treeline_accessibility::{
    query, CaptureFilter, GestureKind, GestureRequest, LaunchRequest, LaunchType, NodeAction,
    PropMap, Query, TreeOracle, TreeWalker,
};

use crate::driver::DriverControl;
use crate::protocol::{
    self, action_result, error_message, find_failure, find_result, gesture_result, launch_result,
    Command,
};

/// Stroke length for the directional scroll gestures, in pixels.
const SCROLL_STROKE_PX: f32 = 300.0;
const DEFAULT_GESTURE_DURATION_MS: u64 = 500;
const DEFAULT_LONG_PRESS_DURATION_MS: u64 = 1000;

/// Where a message should go.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Reply to the requesting connection only.
    Requester(Value),
    /// Broadcast to every connected client.
    All(Value),
}

pub struct Dispatcher {
    oracle: Arc<dyn TreeOracle>,
    walker: TreeWalker,
    control: mpsc::UnboundedSender<DriverControl>,
}

impl Dispatcher {
    pub fn new(
        oracle: Arc<dyn TreeOracle>,
        walker: TreeWalker,
        control: mpsc::UnboundedSender<DriverControl>,
    ) -> Self {
        Self {
            oracle,
            walker,
            control,
        }
    }

    /// Handles one raw inbound frame.
    pub fn handle(&self, raw: &str) -> Vec<Outbound> {
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(error) => {
                debug!("rejecting frame: {error}");
                return vec![Outbound::Requester(error_message(&error.to_string()))];
            }
        };

        match command {
            Command::Capture { visible_only } => self.capture(true, visible_only),
            Command::CaptureNotImportant { visible_only } => self.capture(false, visible_only),
            Command::PerformAction {
                resource_id,
                hash_code,
                action,
                text,
            } => vec![Outbound::Requester(self.perform_action(
                resource_id.as_deref(),
                hash_code.as_deref(),
                action.as_deref(),
                text.as_deref(),
            ))],
            Command::PerformGesture {
                gesture_type,
                x,
                y,
                end_x,
                end_y,
                duration,
            } => vec![Outbound::Requester(self.perform_gesture(
                gesture_type.as_deref(),
                x,
                y,
                end_x,
                end_y,
                duration,
            ))],
            Command::LaunchActivity {
                launch_type,
                package_name,
                class_name,
                intent_action,
                data,
                category,
                extras,
            } => vec![Outbound::Requester(self.launch(
                launch_type.as_deref(),
                package_name,
                class_name,
                intent_action,
                data,
                category,
                extras,
            ))],
            Command::FindByViewId { view_id, verbose } => {
                let reply = match view_id {
                    Some(view_id) => self.find(Query::ViewId(view_id.clone()), &view_id, "viewId", verbose),
                    None => find_failure("viewId parameter is required", "", "viewId"),
                };
                vec![Outbound::Requester(reply)]
            }
            Command::FindByText { text, verbose } => {
                let reply = match text {
                    Some(text) => self.find(Query::Text(text.clone()), &text, "text", verbose),
                    None => find_failure("text parameter is required", "", "text"),
                };
                vec![Outbound::Requester(reply)]
            }
            Command::FindByRegex { pattern, verbose } => {
                let reply = match pattern {
                    Some(pattern) => {
                        self.find(Query::Pattern(pattern.clone()), &pattern, "regex", verbose)
                    }
                    None => find_failure("pattern parameter is required", "", "regex"),
                };
                vec![Outbound::Requester(reply)]
            }
            Command::FindByProps { properties, verbose } => {
                vec![Outbound::Requester(self.find_by_props(properties, verbose))]
            }
            Command::Ping => vec![Outbound::Requester(protocol::pong())],
        }
    }

    fn capture(&self, important_only: bool, visible_only: bool) -> Vec<Outbound> {
        // A manual capture supersedes any pending stability capture.
        let _ = self.control.send(DriverControl::ManualCapture);

        let filter = CaptureFilter {
            important_only,
            visible_only,
        };
        let snapshot = self.walker.walk(&self.oracle.windows(), &filter);
        debug!(windows = snapshot.windows.len(), "captured tree");
        vec![Outbound::All(protocol::tree_message(&snapshot))]
    }

    fn perform_action(
        &self,
        resource_id: Option<&str>,
        hash_code: Option<&str>,
        action: Option<&str>,
        text: Option<&str>,
    ) -> Value {
        let windows = self.oracle.windows();

        let (target, criteria) = if let Some(resource_id) =
            resource_id.filter(|s| !s.is_empty())
        {
            (
                query::first_by_view_id(&windows, resource_id),
                format!("resource ID '{resource_id}'"),
            )
        } else if let Some(hash_code) = hash_code.filter(|s| !s.is_empty()) {
            let Ok(node_id) = hash_code.parse::<i64>() else {
                return action_result(false, &format!("Invalid hash code format: {hash_code}"));
            };
            (
                query::first_by_node_id(&windows, node_id),
                format!("hash code '{hash_code}'"),
            )
        } else {
            return action_result(
                false,
                "No search criteria provided (resourceId or hashCode required)",
            );
        };

        let Some(node_id) = target else {
            return action_result(false, &format!("Node with {criteria} not found"));
        };

        let Some(action_name) = action.filter(|s| !s.is_empty()) else {
            return action_result(false, "Action parameter is required");
        };

        // CLEAR_TEXT is sugar for setting empty text.
        let is_clear = matches!(
            action_name.to_uppercase().as_str(),
            "CLEAR_TEXT" | "ACTION_CLEAR_TEXT"
        );
        let parsed = if is_clear {
            Some(NodeAction::SetText)
        } else {
            NodeAction::from_wire(action_name)
        };
        let Some(node_action) = parsed else {
            return action_result(false, &format!("Unknown action type: {action_name}"));
        };

        let action_text = if is_clear {
            Some("")
        } else if node_action == NodeAction::SetText {
            match text {
                Some(text) => Some(text),
                None => {
                    return action_result(false, "Text parameter is required for SET_TEXT action")
                }
            }
        } else {
            None
        };

        let phrase = if is_clear {
            "Clear text".to_string()
        } else {
            action_phrase(&node_action)
        };
        match self.oracle.perform_action(node_id, &node_action, action_text) {
            Ok(true) => action_result(
                true,
                &format!("{phrase} action performed successfully (target found by {criteria})"),
            ),
            Ok(false) => action_result(false, &format!("{phrase} action failed")),
            Err(error) => action_result(false, &format!("Error performing action: {error}")),
        }
    }

    fn perform_gesture(
        &self,
        gesture_type: Option<&str>,
        x: Option<f32>,
        y: Option<f32>,
        end_x: Option<f32>,
        end_y: Option<f32>,
        duration: Option<u64>,
    ) -> Value {
        let Some(type_name) = gesture_type.filter(|s| !s.is_empty()) else {
            return gesture_result(false, "Gesture type is required");
        };
        let Some(kind) = GestureKind::from_wire(type_name) else {
            return gesture_result(false, &format!("Unknown gesture type: {type_name}"));
        };
        let (Some(x), Some(y)) = (x, y) else {
            return gesture_result(false, "x and y coordinates are required");
        };

        let end = match kind {
            GestureKind::Swipe | GestureKind::Scroll => {
                let (Some(end_x), Some(end_y)) = (end_x, end_y) else {
                    return gesture_result(
                        false,
                        &format!(
                            "endX and endY are required for {} gesture",
                            type_name.to_uppercase()
                        ),
                    );
                };
                Some((end_x, end_y))
            }
            GestureKind::ScrollUp => Some((x, y - SCROLL_STROKE_PX)),
            GestureKind::ScrollDown => Some((x, y + SCROLL_STROKE_PX)),
            GestureKind::ScrollLeft => Some((x - SCROLL_STROKE_PX, y)),
            GestureKind::ScrollRight => Some((x + SCROLL_STROKE_PX, y)),
            _ => None,
        };

        let duration_ms = duration.unwrap_or(match kind {
            GestureKind::LongPress => DEFAULT_LONG_PRESS_DURATION_MS,
            _ => DEFAULT_GESTURE_DURATION_MS,
        });
        let request = GestureRequest {
            kind,
            x,
            y,
            end,
            duration_ms,
        };

        match self.oracle.dispatch_gesture(&request) {
            Ok(true) => gesture_result(
                true,
                &format!("{} gesture performed successfully", capitalize(kind.describe())),
            ),
            Ok(false) => {
                gesture_result(false, &format!("{} gesture failed", capitalize(kind.describe())))
            }
            Err(error) => gesture_result(false, &format!("Error performing gesture: {error}")),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn launch(
        &self,
        launch_type: Option<&str>,
        package_name: Option<String>,
        class_name: Option<String>,
        intent_action: Option<String>,
        data: Option<String>,
        category: Option<String>,
        extras: Option<Value>,
    ) -> Value {
        let Some(type_name) = launch_type.filter(|s| !s.is_empty()) else {
            return launch_result(false, "Launch type is required");
        };
        let Some(launch_type) = LaunchType::from_wire(type_name) else {
            return launch_result(false, &format!("Unknown launch type: {type_name}"));
        };

        let request = LaunchRequest {
            launch_type,
            package_name,
            class_name,
            intent_action,
            data,
            category,
            extras: parse_extras(extras),
        };
        let description = match request.validate() {
            Ok(description) => description,
            Err(message) => return launch_result(false, &message),
        };

        match self.oracle.launch(&request) {
            Ok(true) => launch_result(true, &format!("Successfully launched {description}")),
            Ok(false) => launch_result(false, &format!("Failed to launch {description}")),
            Err(error) => launch_result(false, &format!("Error launching activity: {error}")),
        }
    }

    fn find(&self, query: Query, raw_query: &str, search_type: &str, verbose: bool) -> Value {
        let windows = self.oracle.windows();
        let nodes = query::run(&windows, &query, verbose)
            .iter()
            .map(|n| serde_json::to_value(n).unwrap_or(Value::Null))
            .collect();
        find_result(nodes, raw_query, search_type)
    }

    fn find_by_props(&self, properties: Option<Value>, verbose: bool) -> Value {
        let Some(properties) = properties else {
            return find_failure("properties parameter is required", "", "props");
        };
        let raw_query = properties.to_string();
        let props: PropMap = match serde_json::from_value(properties) {
            Ok(props) => props,
            Err(error) => {
                return find_failure(&format!("Invalid properties object: {error}"), &raw_query, "props")
            }
        };
        self.find(Query::Props(props), &raw_query, "props", verbose)
    }
}

/// Accepts extras as an inline object or a JSON-encoded string. Malformed
/// extras are dropped, never fatal to the launch.
fn parse_extras(extras: Option<Value>) -> Option<serde_json::Map<String, Value>> {
    match extras {
        Some(Value::Object(map)) => Some(map),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) | Err(_) => {
                warn!("ignoring malformed extras JSON");
                None
            }
        },
        Some(_) => {
            warn!("ignoring non-object extras");
            None
        }
        None => None,
    }
}

fn action_phrase(action: &NodeAction) -> String {
    match action {
        NodeAction::Click => "Click".to_string(),
        NodeAction::Focus => "Focus".to_string(),
        NodeAction::LongClick => "Long click".to_string(),
        NodeAction::ScrollForward => "Scroll forward".to_string(),
        NodeAction::ScrollBackward => "Scroll backward".to_string(),
        NodeAction::SetText => "Set text".to_string(),
        NodeAction::AccessibilityFocus => "Accessibility focus".to_string(),
        NodeAction::ClearAccessibilityFocus => "Clear accessibility focus".to_string(),
        NodeAction::Expand => "Expand".to_string(),
        NodeAction::Collapse => "Collapse".to_string(),
        NodeAction::Custom(label) => label.clone(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
