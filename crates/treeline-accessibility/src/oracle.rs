//! Oracle-side data model: the borrowed view of the OS accessibility forest.
//!
//! The OS owns the real tree; the engine only ever sees call-scoped copies
//! obtained through [`TreeOracle::windows`]. Nodes live in a per-window arena
//! and reference children by index, so a malformed forest with a cyclic child
//! link is representable — the walker's cycle guard is a real property, not a
//! type-system accident.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Index of a node inside its window's arena.
pub type NodeIndex = usize;

/// Absolute screen-coordinate rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Collection container metadata (rows/columns of a grid or list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    pub rows: i32,
    pub columns: i32,
}

/// Position of an item inside a collection container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionItemInfo {
    pub row: i32,
    pub column: i32,
}

/// Semantic actions a node advertises. Custom actions carry their label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    Click,
    Focus,
    LongClick,
    ScrollForward,
    ScrollBackward,
    SetText,
    AccessibilityFocus,
    ClearAccessibilityFocus,
    Expand,
    Collapse,
    Custom(String),
}

impl NodeAction {
    /// Human-readable token used in canonical records and action lists.
    pub fn token(&self) -> String {
        match self {
            NodeAction::Click => "click".to_string(),
            NodeAction::Focus => "focus".to_string(),
            NodeAction::LongClick => "long click".to_string(),
            NodeAction::ScrollForward => "scroll forward".to_string(),
            NodeAction::ScrollBackward => "scroll backward".to_string(),
            NodeAction::SetText => "set text".to_string(),
            NodeAction::AccessibilityFocus => "a11y focus".to_string(),
            NodeAction::ClearAccessibilityFocus => "clear a11y focus".to_string(),
            NodeAction::Expand => "expand".to_string(),
            NodeAction::Collapse => "collapse".to_string(),
            NodeAction::Custom(label) => format!("{} (custom)", label),
        }
    }

    /// Numeric id for verbose action lists. Custom actions have no fixed id.
    pub fn wire_id(&self) -> i32 {
        match self {
            NodeAction::Click => 16,
            NodeAction::Focus => 1,
            NodeAction::LongClick => 32,
            NodeAction::ScrollForward => 4096,
            NodeAction::ScrollBackward => 8192,
            NodeAction::SetText => 2_097_152,
            NodeAction::AccessibilityFocus => 64,
            NodeAction::ClearAccessibilityFocus => 128,
            NodeAction::Expand => 262_144,
            NodeAction::Collapse => 524_288,
            NodeAction::Custom(_) => -1,
        }
    }

    /// Parses a client-supplied action name (`CLICK` or `ACTION_CLICK`,
    /// case-insensitive). `CLEAR_TEXT` is not a distinct action here — the
    /// dispatcher maps it to `SetText` with an empty string.
    pub fn from_wire(name: &str) -> Option<NodeAction> {
        let normalized = name.to_uppercase();
        let stripped = normalized.strip_prefix("ACTION_").unwrap_or(&normalized);
        match stripped {
            "CLICK" => Some(NodeAction::Click),
            "FOCUS" => Some(NodeAction::Focus),
            "LONG_CLICK" => Some(NodeAction::LongClick),
            "SCROLL_FORWARD" => Some(NodeAction::ScrollForward),
            "SCROLL_BACKWARD" => Some(NodeAction::ScrollBackward),
            "SET_TEXT" => Some(NodeAction::SetText),
            "ACCESSIBILITY_FOCUS" => Some(NodeAction::AccessibilityFocus),
            "CLEAR_ACCESSIBILITY_FOCUS" => Some(NodeAction::ClearAccessibilityFocus),
            "EXPAND" => Some(NodeAction::Expand),
            "COLLAPSE" => Some(NodeAction::Collapse),
            _ => None,
        }
    }
}

/// One node of the oracle forest. All text fields are optional; boolean flags
/// default to the uninteresting state except `visible`/`enabled` which a
/// freshly constructed node sets to true.
#[derive(Debug, Clone, Default)]
pub struct UiNode {
    /// Oracle-assigned transient id. Not stable across captures.
    pub node_id: i64,
    /// Application-assigned resource id. Stable across captures.
    pub resource_id: Option<String>,
    /// Fully qualified class name, e.g. `android.widget.Button`.
    pub class_name: Option<String>,
    pub role_description: Option<String>,
    pub bounds: Bounds,

    pub text: Option<String>,
    pub content_description: Option<String>,
    pub hint: Option<String>,
    pub error: Option<String>,
    pub tooltip: Option<String>,
    pub pane_title: Option<String>,
    pub state_description: Option<String>,

    pub visible: bool,
    pub enabled: bool,
    pub focusable: bool,
    pub focused: bool,
    pub checkable: bool,
    pub checked: bool,
    pub selected: bool,
    pub scrollable: bool,
    pub clickable: bool,
    pub long_clickable: bool,
    pub accessibility_focused: bool,
    pub content_invalid: bool,
    pub important_for_accessibility: bool,
    pub heading: bool,
    pub screen_reader_focusable: bool,
    /// True for editable text fields; drives text-input session tracking.
    pub editable: bool,

    pub collection: Option<CollectionInfo>,
    pub collection_item: Option<CollectionItemInfo>,
    pub actions: Vec<NodeAction>,
    /// Transient id of the node labelling this one, if any.
    pub labeled_by: Option<i64>,

    pub children: Vec<NodeIndex>,
}

impl UiNode {
    pub fn new(node_id: i64) -> Self {
        Self {
            node_id,
            visible: true,
            enabled: true,
            important_for_accessibility: true,
            ..Default::default()
        }
    }
}

/// A window of the oracle forest: an arena of nodes plus a root index.
#[derive(Debug, Clone, Default)]
pub struct UiWindow {
    pub window_id: i32,
    pub title: Option<String>,
    pub active: bool,
    pub bounds: Bounds,
    nodes: Vec<UiNode>,
    root: Option<NodeIndex>,
}

impl UiWindow {
    pub fn new(window_id: i32, title: Option<String>) -> Self {
        Self {
            window_id,
            title,
            active: true,
            ..Default::default()
        }
    }

    /// Adds a node to the arena and returns its index.
    pub fn push_node(&mut self, node: UiNode) -> NodeIndex {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn set_root(&mut self, index: NodeIndex) {
        self.root = Some(index);
    }

    /// Links `child` under `parent`. No cycle check — the walker guards.
    pub fn add_child(&mut self, parent: NodeIndex, child: NodeIndex) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
    }

    pub fn root_index(&self) -> Option<NodeIndex> {
        self.root
    }

    pub fn root(&self) -> Option<&UiNode> {
        self.root.and_then(|i| self.nodes.get(i))
    }

    pub fn node(&self, index: NodeIndex) -> Option<&UiNode> {
        self.nodes.get(index)
    }

    /// Linear lookup by transient node id.
    pub fn node_by_id(&self, node_id: i64) -> Option<&UiNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Gesture kinds accepted over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Tap,
    DoubleTap,
    LongPress,
    Swipe,
    Scroll,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
}

impl GestureKind {
    pub fn from_wire(name: &str) -> Option<GestureKind> {
        match name.to_uppercase().as_str() {
            "TAP" | "CLICK" => Some(GestureKind::Tap),
            "DOUBLE_TAP" => Some(GestureKind::DoubleTap),
            "LONG_PRESS" | "LONG_CLICK" => Some(GestureKind::LongPress),
            "SWIPE" => Some(GestureKind::Swipe),
            "SCROLL" => Some(GestureKind::Scroll),
            "SCROLL_UP" => Some(GestureKind::ScrollUp),
            "SCROLL_DOWN" => Some(GestureKind::ScrollDown),
            "SCROLL_LEFT" => Some(GestureKind::ScrollLeft),
            "SCROLL_RIGHT" => Some(GestureKind::ScrollRight),
            _ => None,
        }
    }

    /// Whether the gesture needs explicit end coordinates.
    pub fn needs_end_point(&self) -> bool {
        matches!(self, GestureKind::Swipe | GestureKind::Scroll)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            GestureKind::Tap => "tap",
            GestureKind::DoubleTap => "double tap",
            GestureKind::LongPress => "long press",
            GestureKind::Swipe => "swipe",
            GestureKind::Scroll => "scroll",
            GestureKind::ScrollUp => "scroll up",
            GestureKind::ScrollDown => "scroll down",
            GestureKind::ScrollLeft => "scroll left",
            GestureKind::ScrollRight => "scroll right",
        }
    }
}

/// A fully validated gesture, ready for the oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureRequest {
    pub kind: GestureKind,
    pub x: f32,
    pub y: f32,
    pub end: Option<(f32, f32)>,
    pub duration_ms: u64,
}

/// How an activity launch should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchType {
    Package,
    Component,
    Intent,
    Url,
    Settings,
    Dial,
    Sms,
    Email,
}

impl LaunchType {
    pub fn from_wire(name: &str) -> Option<LaunchType> {
        match name.to_uppercase().as_str() {
            "PACKAGE" => Some(LaunchType::Package),
            "COMPONENT" => Some(LaunchType::Component),
            "INTENT" => Some(LaunchType::Intent),
            "URL" => Some(LaunchType::Url),
            "SETTINGS" => Some(LaunchType::Settings),
            "DIAL" => Some(LaunchType::Dial),
            "SMS" => Some(LaunchType::Sms),
            "EMAIL" => Some(LaunchType::Email),
            _ => None,
        }
    }
}

/// A validated activity-launch request.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub launch_type: LaunchType,
    pub package_name: Option<String>,
    pub class_name: Option<String>,
    pub intent_action: Option<String>,
    pub data: Option<String>,
    pub category: Option<String>,
    /// Parsed `extras` object; malformed extras are dropped before this point.
    pub extras: Option<serde_json::Map<String, serde_json::Value>>,
}

impl LaunchRequest {
    /// Checks type-specific required fields and builds the human description
    /// of what will be attempted. Returns `Err` with the validation message.
    pub fn validate(&self) -> std::result::Result<String, String> {
        fn given(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.is_empty())
        }

        match self.launch_type {
            LaunchType::Package => match given(&self.package_name) {
                Some(package) => Ok(format!("package '{package}'")),
                None => Err("Package name is required for PACKAGE launch type".to_string()),
            },
            LaunchType::Component => {
                match (given(&self.package_name), given(&self.class_name)) {
                    (Some(package), Some(class)) => {
                        Ok(format!("component '{package}/{class}'"))
                    }
                    _ => Err(
                        "Both package name and class name are required for COMPONENT launch type"
                            .to_string(),
                    ),
                }
            }
            LaunchType::Intent => {
                let Some(action) = given(&self.intent_action) else {
                    return Err("Intent action is required for INTENT launch type".to_string());
                };
                let mut description = format!("intent action '{action}'");
                if let Some(data) = given(&self.data) {
                    description.push_str(&format!(" with data '{data}'"));
                }
                if let Some(category) = given(&self.category) {
                    description.push_str(&format!(" and category '{category}'"));
                }
                Ok(description)
            }
            LaunchType::Url => match given(&self.data) {
                Some(url) => Ok(format!("URL '{url}'")),
                None => Err("URL is required for URL launch type (use 'data' field)".to_string()),
            },
            LaunchType::Settings => {
                let action = given(&self.intent_action).unwrap_or("android.settings.SETTINGS");
                Ok(format!("settings screen '{action}'"))
            }
            LaunchType::Dial => match given(&self.data) {
                Some(number) => Ok(format!("dialer with number '{number}'")),
                None => Err(
                    "Phone number is required for DIAL launch type (use 'data' field)".to_string(),
                ),
            },
            LaunchType::Sms => match given(&self.data) {
                Some(number) => Ok(format!("SMS to '{number}'")),
                None => Err(
                    "Phone number is required for SMS launch type (use 'data' field)".to_string(),
                ),
            },
            LaunchType::Email => match given(&self.data) {
                Some(address) => Ok(format!("email to '{address}'")),
                None => Ok("email client".to_string()),
            },
        }
    }
}

/// The external accessibility subsystem, abstracted.
///
/// Implementations return owned, call-scoped copies from [`windows`]; the
/// engine never stores a window or node across a call boundary.
///
/// [`windows`]: TreeOracle::windows
pub trait TreeOracle: Send + Sync {
    /// Current forest, in z-order.
    fn windows(&self) -> Vec<UiWindow>;

    /// Performs a semantic action on the node with the given transient id.
    /// `Ok(false)` means the target refused the action.
    fn perform_action(
        &self,
        node_id: i64,
        action: &NodeAction,
        text: Option<&str>,
    ) -> Result<bool>;

    /// Dispatches a coordinate gesture.
    fn dispatch_gesture(&self, gesture: &GestureRequest) -> Result<bool>;

    /// Attempts an activity launch. The request is pre-validated.
    fn launch(&self, request: &LaunchRequest) -> Result<bool>;
}

/// Stand-in used when no platform backend is attached. Reports an empty
/// forest and fails every dispatch with a descriptive error, so the server
/// stays functional (and honest) without an OS binding.
#[derive(Debug, Default)]
pub struct NullOracle;

impl TreeOracle for NullOracle {
    fn windows(&self) -> Vec<UiWindow> {
        Vec::new()
    }

    fn perform_action(&self, _: i64, _: &NodeAction, _: Option<&str>) -> Result<bool> {
        anyhow::bail!("no tree oracle attached")
    }

    fn dispatch_gesture(&self, _: &GestureRequest) -> Result<bool> {
        anyhow::bail!("no tree oracle attached")
    }

    fn launch(&self, _: &LaunchRequest) -> Result<bool> {
        anyhow::bail!("no tree oracle attached")
    }
}

/// In-memory oracle over a fixed forest. Every dispatch succeeds. Used by
/// tests and embedders that replay recorded trees.
#[derive(Debug, Default)]
pub struct StaticOracle {
    windows: Vec<UiWindow>,
}

impl StaticOracle {
    pub fn new(windows: Vec<UiWindow>) -> Self {
        Self { windows }
    }
}

impl TreeOracle for StaticOracle {
    fn windows(&self) -> Vec<UiWindow> {
        self.windows.clone()
    }

    fn perform_action(&self, _: i64, _: &NodeAction, _: Option<&str>) -> Result<bool> {
        Ok(true)
    }

    fn dispatch_gesture(&self, _: &GestureRequest) -> Result<bool> {
        Ok(true)
    }

    fn launch(&self, _: &LaunchRequest) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_wire_accepts_both_forms() {
        assert_eq!(NodeAction::from_wire("CLICK"), Some(NodeAction::Click));
        assert_eq!(NodeAction::from_wire("action_click"), Some(NodeAction::Click));
        assert_eq!(
            NodeAction::from_wire("ACTION_SCROLL_FORWARD"),
            Some(NodeAction::ScrollForward)
        );
        assert_eq!(NodeAction::from_wire("frobnicate"), None);
    }

    #[test]
    fn test_custom_action_token() {
        let action = NodeAction::Custom("Dismiss".to_string());
        assert_eq!(action.token(), "Dismiss (custom)");
    }

    #[test]
    fn test_gesture_kind_aliases() {
        assert_eq!(GestureKind::from_wire("click"), Some(GestureKind::Tap));
        assert_eq!(GestureKind::from_wire("LONG_CLICK"), Some(GestureKind::LongPress));
        assert!(GestureKind::Swipe.needs_end_point());
        assert!(!GestureKind::ScrollUp.needs_end_point());
    }

    #[test]
    fn test_launch_validation_messages() {
        let mut request = LaunchRequest {
            launch_type: LaunchType::Package,
            package_name: None,
            class_name: None,
            intent_action: None,
            data: None,
            category: None,
            extras: None,
        };
        assert!(request.validate().is_err());

        request.package_name = Some("com.example.app".to_string());
        assert_eq!(request.validate().unwrap(), "package 'com.example.app'");

        request.launch_type = LaunchType::Settings;
        assert_eq!(
            request.validate().unwrap(),
            "settings screen 'android.settings.SETTINGS'"
        );

        request.launch_type = LaunchType::Intent;
        request.intent_action = Some("android.intent.action.VIEW".to_string());
        request.data = Some("https://example.com".to_string());
        let description = request.validate().unwrap();
        assert!(description.contains("with data 'https://example.com'"));
    }

    #[test]
    fn test_window_arena_links() {
        let mut window = UiWindow::new(1, Some("Main".to_string()));
        let root = window.push_node(UiNode::new(100));
        let child = window.push_node(UiNode::new(101));
        window.set_root(root);
        window.add_child(root, child);

        assert_eq!(window.root().unwrap().node_id, 100);
        assert_eq!(window.node(root).unwrap().children, vec![child]);
    }
}
