//! Canonical node records.
//!
//! A [`NodeRecord`] is the JSON-stable form of one tree node. Field order is
//! fixed by struct declaration order, so re-serializing the same forest yields
//! byte-identical output apart from volatile ids ([`NodeRecord::stripped`]
//! clears those for structural comparison).

use serde::{Deserialize, Serialize};

use crate::oracle::UiNode;

/// Encoder settings. `density` is the display scale factor (px per dp).
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub density: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self { density: 1.0 }
    }
}

/// Per-node attribute bag. Serialized under `metadata` with all absent
/// fields omitted. The same struct carries window-level metadata (windowId,
/// title, role "Window") on window records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_invalid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    /// `"invisible"` when the node is not visible to the user, else absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub important_for_accessibility: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x1: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y1: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x2: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y2: Option<i32>,
    /// Device-independent width, formatted to two decimals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaled_width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaled_height: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dp_scale_factor: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Text of the labelling node, content description preferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labeled_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labeled_by_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Content description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_description: Option<String>,
    /// `"checked"` or `"not checked"`, only for checkable nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,
    /// `"Rows: R, Columns: C"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<bool>,
    /// `"Row: r, Column: c"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_item_info: Option<String>,
}

/// Canonical record for one node (or one window, where `id` carries the
/// root node's volatile id and metadata carries the window fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub metadata: NodeMetadata,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<NodeRecord>,
}

impl NodeRecord {
    /// Clone with all volatile ids cleared, recursively. Two captures of an
    /// unchanged screen compare equal in stripped form even though the
    /// underlying node ids differ per capture.
    pub fn stripped(&self) -> NodeRecord {
        let mut record = self.clone();
        record.strip_in_place();
        record
    }

    fn strip_in_place(&mut self) {
        self.id = None;
        self.metadata.hash_code = None;
        self.metadata.labeled_by_id = None;
        for child in &mut self.children {
            child.strip_in_place();
        }
    }
}

/// Collapses text to a single trimmed line.
fn flatten_text(raw: &str) -> String {
    raw.replace(['\n', '\r'], "").trim().to_string()
}

/// Last path segment of a fully qualified class name, dots removed.
/// `android.widget.Button` becomes `Button`.
pub(crate) fn simple_class_name(full: &str) -> String {
    match full.rfind('.') {
        Some(index) => full[index..].replace('.', ""),
        None => full.to_string(),
    }
}

impl EncoderConfig {
    /// Pixels to device-independent pixels at the configured density.
    pub fn px_to_dp(&self, px: f32) -> f32 {
        px / self.density
    }

    /// Encodes one node into its canonical record. Children are not filled
    /// in; the walker attaches them. `label_text` is the resolved text of
    /// the labelling node, if the node has one.
    ///
    /// The node is only read. Absent fields are omitted from the record,
    /// never emitted as placeholder values.
    pub fn encode(&self, node: &UiNode, label_text: Option<&str>) -> NodeRecord {
        let name = node
            .class_name
            .as_deref()
            .map(simple_class_name)
            .unwrap_or_else(|| "??".to_string());

        let mut metadata = NodeMetadata {
            hash_code: Some(node.node_id),
            role: Some(name.clone()),
            role_description: node.role_description.as_deref().map(flatten_text),
            important_for_accessibility: Some(node.important_for_accessibility),
            x1: Some(node.bounds.left),
            y1: Some(node.bounds.top),
            x2: Some(node.bounds.right),
            y2: Some(node.bounds.bottom),
            scaled_width: Some(format!("{:.2}", self.px_to_dp(node.bounds.width() as f32))),
            scaled_height: Some(format!("{:.2}", self.px_to_dp(node.bounds.height() as f32))),
            dp_scale_factor: Some(self.px_to_dp(1.0)),
            ..Default::default()
        };

        if node.content_invalid {
            metadata.content_invalid = Some(true);
        }
        metadata.error_message = node.error.as_deref().map(flatten_text);
        metadata.tooltip = node.tooltip.as_deref().map(flatten_text);
        if !node.visible {
            metadata.visibility = Some("invisible".to_string());
        }
        metadata.pane_title = node.pane_title.as_deref().map(flatten_text);
        metadata.text = node.text.as_deref().map(flatten_text);
        metadata.hint = node.hint.as_deref().map(flatten_text);
        metadata.content = node.content_description.as_deref().map(flatten_text);
        metadata.state_description = node.state_description.as_deref().map(flatten_text);

        if let Some(label_id) = node.labeled_by {
            metadata.labeled_by = label_text.map(flatten_text);
            metadata.labeled_by_id = Some(label_id);
        }

        if node.checkable {
            metadata.checkable = Some(if node.checked {
                "checked".to_string()
            } else {
                "not checked".to_string()
            });
        }

        if !node.actions.is_empty() {
            metadata.actions = Some(node.actions.iter().map(|a| a.token()).collect());
        }

        let mut properties = Vec::new();
        if node.focusable {
            properties.push("focusable".to_string());
        }
        if node.screen_reader_focusable {
            properties.push("screen reader focusable".to_string());
        }
        if node.focused {
            properties.push("focused".to_string());
        }
        if node.selected {
            properties.push("selected".to_string());
        }
        if node.scrollable {
            properties.push("scrollable".to_string());
        }
        if node.clickable {
            properties.push("clickable".to_string());
        }
        if node.long_clickable {
            properties.push("long clickable".to_string());
        }
        if node.accessibility_focused {
            properties.push("accessibility focused".to_string());
        }
        if !node.enabled {
            properties.push("disabled".to_string());
        }
        if !properties.is_empty() {
            metadata.properties = Some(properties);
        }

        if let Some(info) = node.collection {
            metadata.collection_info =
                Some(format!("Rows: {}, Columns: {}", info.rows, info.columns));
        }
        if node.heading {
            metadata.heading = Some(true);
        }
        if let Some(item) = node.collection_item {
            metadata.collection_item_info =
                Some(format!("Row: {}, Column: {}", item.row, item.column));
        }

        NodeRecord {
            id: None,
            name,
            metadata,
            children: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{Bounds, CollectionInfo, CollectionItemInfo, NodeAction, UiNode};

    fn button_node() -> UiNode {
        let mut node = UiNode::new(4242);
        node.class_name = Some("android.widget.Button".to_string());
        node.text = Some("  Submit\n".to_string());
        node.bounds = Bounds::new(0, 0, 200, 100);
        node.clickable = true;
        node.focusable = true;
        node.actions = vec![NodeAction::Click, NodeAction::Custom("Dismiss".to_string())];
        node
    }

    #[test]
    fn test_encode_basic_fields() {
        let config = EncoderConfig { density: 2.0 };
        let record = config.encode(&button_node(), None);

        assert_eq!(record.name, "Button");
        assert_eq!(record.metadata.hash_code, Some(4242));
        assert_eq!(record.metadata.role.as_deref(), Some("Button"));
        assert_eq!(record.metadata.text.as_deref(), Some("Submit"));
        assert_eq!(record.metadata.x2, Some(200));
        assert_eq!(record.metadata.scaled_width.as_deref(), Some("100.00"));
        assert_eq!(record.metadata.scaled_height.as_deref(), Some("50.00"));
        assert_eq!(record.metadata.dp_scale_factor, Some(0.5));
        assert_eq!(
            record.metadata.actions.as_deref(),
            Some(&["click".to_string(), "Dismiss (custom)".to_string()][..])
        );
        assert_eq!(
            record.metadata.properties.as_deref(),
            Some(&["focusable".to_string(), "clickable".to_string()][..])
        );
    }

    #[test]
    fn test_absent_fields_are_omitted_from_json() {
        let config = EncoderConfig::default();
        let mut node = UiNode::new(1);
        node.class_name = Some("android.view.View".to_string());
        let json = serde_json::to_string(&config.encode(&node, None)).unwrap();

        assert!(!json.contains("tooltip"));
        assert!(!json.contains("errorMessage"));
        assert!(!json.contains("checkable"));
        assert!(!json.contains("visibility"));
        assert!(!json.contains("\"children\""));
        assert!(json.contains("\"importantForAccessibility\":true"));
    }

    #[test]
    fn test_missing_class_name_falls_back() {
        let config = EncoderConfig::default();
        let record = config.encode(&UiNode::new(7), None);
        assert_eq!(record.name, "??");
        assert_eq!(record.metadata.role.as_deref(), Some("??"));
    }

    #[test]
    fn test_invisible_and_checkable_states() {
        let config = EncoderConfig::default();
        let mut node = UiNode::new(9);
        node.visible = false;
        node.checkable = true;
        node.checked = false;
        let record = config.encode(&node, None);

        assert_eq!(record.metadata.visibility.as_deref(), Some("invisible"));
        assert_eq!(record.metadata.checkable.as_deref(), Some("not checked"));
    }

    #[test]
    fn test_collection_strings() {
        let config = EncoderConfig::default();
        let mut node = UiNode::new(3);
        node.collection = Some(CollectionInfo { rows: 4, columns: 2 });
        node.collection_item = Some(CollectionItemInfo { row: 1, column: 0 });
        let record = config.encode(&node, None);

        assert_eq!(
            record.metadata.collection_info.as_deref(),
            Some("Rows: 4, Columns: 2")
        );
        assert_eq!(
            record.metadata.collection_item_info.as_deref(),
            Some("Row: 1, Column: 0")
        );
    }

    #[test]
    fn test_labeled_by_resolution() {
        let config = EncoderConfig::default();
        let mut node = UiNode::new(10);
        node.labeled_by = Some(77);
        let record = config.encode(&node, Some("Username"));

        assert_eq!(record.metadata.labeled_by.as_deref(), Some("Username"));
        assert_eq!(record.metadata.labeled_by_id, Some(77));
    }

    #[test]
    fn test_stripped_clears_volatile_ids_recursively() {
        let config = EncoderConfig::default();
        let mut parent = config.encode(&button_node(), None);
        let mut child_node = UiNode::new(4243);
        child_node.labeled_by = Some(4242);
        parent.children.push(config.encode(&child_node, Some("Submit")));
        parent.id = Some(4242);

        let stripped = parent.stripped();
        assert_eq!(stripped.id, None);
        assert_eq!(stripped.metadata.hash_code, None);
        assert_eq!(stripped.children[0].metadata.hash_code, None);
        assert_eq!(stripped.children[0].metadata.labeled_by_id, None);
        // Non-volatile label text survives.
        assert_eq!(stripped.children[0].metadata.labeled_by.as_deref(), Some("Submit"));
    }

    #[test]
    fn test_stripped_equality_across_captures() {
        let config = EncoderConfig::default();
        let mut first = button_node();
        let mut second = button_node();
        first.node_id = 1111;
        second.node_id = 2222;

        let a = config.encode(&first, None);
        let b = config.encode(&second, None);
        assert_ne!(a, b);
        assert_eq!(a.stripped(), b.stripped());
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let config = EncoderConfig::default();
        let record = config.encode(&button_node(), None);
        let first = serde_json::to_string(&record).unwrap();
        let second = serde_json::to_string(&record).unwrap();
        assert_eq!(first, second);
    }
}
