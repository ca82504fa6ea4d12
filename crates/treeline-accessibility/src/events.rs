//! Raw UI event stream and the session events distilled from it.
//!
//! Raw events arrive from the oracle at whatever rate the platform produces
//! them; the aggregator trackers collapse bursts into single session events.

use serde_json::{json, Value};

use crate::encode::simple_class_name;
use crate::oracle::UiNode;
use crate::tree::Snapshot;

/// Identity of the node a raw event originated from, captured at event time.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    pub node_id: i64,
    pub window_id: i32,
    pub resource_id: Option<String>,
    pub class_name: Option<String>,
    pub text: Option<String>,
    pub content_description: Option<String>,
}

impl SourceNode {
    pub fn from_node(node: &UiNode, window_id: i32) -> Self {
        Self {
            node_id: node.node_id,
            window_id,
            resource_id: node.resource_id.clone(),
            class_name: node.class_name.clone(),
            text: node.text.clone(),
            content_description: node.content_description.clone(),
        }
    }

    /// Whether two events came from the same on-screen element.
    pub fn same_anchor(&self, other: &SourceNode) -> bool {
        self.node_id == other.node_id && self.window_id == other.window_id
    }

    /// Wire form used inside `accessibilityEvent` payloads.
    pub fn to_wire(&self) -> Value {
        let name = self
            .class_name
            .as_deref()
            .map(simple_class_name)
            .unwrap_or_else(|| "??".to_string());
        let mut object = json!({
            "name": name,
            "metadata": {
                "hashCode": self.node_id,
                "role": name,
            },
        });
        // Optional fields are omitted, never null.
        if let Some(text) = &self.text {
            object["text"] = json!(text);
        }
        if let Some(content) = &self.content_description {
            object["contentDescription"] = json!(content);
        }
        if let Some(resource_id) = &self.resource_id {
            object["resourceId"] = json!(resource_id);
        }
        object
    }
}

/// What happened, stripped of platform framing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawUiEventKind {
    Scroll { delta_x: i32, delta_y: i32 },
    TextChanged {
        text: String,
        /// Characters added by this change; large jumps indicate a paste.
        added_count: i32,
        is_text_input: bool,
    },
    ContentChanged,
    Click { is_text_input: bool },
    Focus { is_text_input: bool },
    Announcement { text: String },
    WindowStateChanged,
}

/// One event as received from the oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct RawUiEvent {
    pub kind: RawUiEventKind,
    /// Wall-clock time of the event in epoch milliseconds.
    pub epoch_ms: i64,
    pub source: Option<SourceNode>,
}

/// A completed interaction session, ready for broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ScrollSequenceEnd {
        total_scroll_x: i32,
        total_scroll_y: i32,
        scroll_event_count: usize,
        /// Epoch-ms timestamps of the raw scrolls, in arrival order.
        scroll_timestamps: Vec<i64>,
        source: Option<SourceNode>,
    },
    TextSequenceEnd {
        /// Full field content as of the last change.
        session_text: String,
        text_event_count: usize,
        paste_event_count: usize,
        contains_paste: bool,
        session_duration_ms: i64,
        text_field_source: Option<SourceNode>,
        /// Forest capture taken when the session opened, best effort.
        tree_context: Option<Snapshot>,
    },
    Announcement { announcement: String },
}
