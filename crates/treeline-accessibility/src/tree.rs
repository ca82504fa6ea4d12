//! Forest capture: turns the oracle's window list into a [`Snapshot`] of
//! canonical records.
//!
//! The walk is deterministic (same forest, same output) and defensive: a
//! window that cannot be resolved is skipped with a log line, a cyclic child
//! link terminates that branch, and system chrome windows are dropped by a
//! pluggable policy.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::encode::{EncoderConfig, NodeMetadata, NodeRecord};
use crate::oracle::{NodeIndex, UiNode, UiWindow};

/// Node-level capture filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureFilter {
    /// Drop nodes not marked important for accessibility. Children of a
    /// dropped node are lifted to its parent, so important descendants of
    /// unimportant containers survive.
    pub important_only: bool,
    /// Prune invisible leaves after the walk. An invisible node with a
    /// visible descendant is kept.
    pub visible_only: bool,
}

/// Decides which windows enter a snapshot, after encoding.
pub trait WindowPolicy: Send + Sync {
    fn keep(&self, window: &UiWindow, record: &NodeRecord) -> bool;
}

/// Default policy: drops system chrome. A window titled "Navigation bar" is
/// excluded, as is a window whose entire content is a status-bar or
/// notification-shade pane. Heuristic, not contract; swap the policy to
/// change it.
#[derive(Debug, Default)]
pub struct ChromePolicy;

impl WindowPolicy for ChromePolicy {
    fn keep(&self, window: &UiWindow, record: &NodeRecord) -> bool {
        if window.title.as_deref() == Some("Navigation bar") {
            return false;
        }
        if record.children.is_empty() {
            return false;
        }
        if record.children.len() == 1 {
            if let Some(pane) = record.children[0].metadata.pane_title.as_deref() {
                if pane == "Status bar" || pane == "Notification shade." {
                    return false;
                }
            }
        }
        true
    }
}

/// Keeps every window that has a root. Useful for tests and replay.
#[derive(Debug, Default)]
pub struct KeepAllWindows;

impl WindowPolicy for KeepAllWindows {
    fn keep(&self, _: &UiWindow, _: &NodeRecord) -> bool {
        true
    }
}

/// One captured window: the canonical record plus typed identity. Only the
/// record reaches the wire; `window_id` and `title` are engine-side handles
/// (the serialized form carries them inside the record's metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    #[serde(skip)]
    pub window_id: i32,
    #[serde(skip)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub record: NodeRecord,
}

/// A full capture of the forest at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub windows: Vec<WindowRecord>,
}

impl Snapshot {
    /// Structural equality modulo volatile ids: true when both captures
    /// describe the same screen content.
    pub fn same_structure(&self, other: &Snapshot) -> bool {
        if self.windows.len() != other.windows.len() {
            return false;
        }
        self.windows
            .iter()
            .zip(&other.windows)
            .all(|(a, b)| a.window_id == b.window_id && a.record.stripped() == b.record.stripped())
    }
}

/// Walks oracle windows into snapshots.
pub struct TreeWalker {
    pub encoder: EncoderConfig,
    pub policy: Box<dyn WindowPolicy>,
}

impl Default for TreeWalker {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            policy: Box::new(ChromePolicy),
        }
    }
}

impl TreeWalker {
    pub fn new(encoder: EncoderConfig, policy: Box<dyn WindowPolicy>) -> Self {
        Self { encoder, policy }
    }

    /// Captures the given forest. Windows are visited in the order given
    /// (z-order); inactive windows, rootless windows, and windows rejected
    /// by the policy are skipped, never fatal.
    pub fn walk(&self, windows: &[UiWindow], filter: &CaptureFilter) -> Snapshot {
        let mut records = Vec::new();
        for window in windows {
            if !window.active {
                continue;
            }
            match self.walk_window(window, filter) {
                Some(record) => {
                    if self.policy.keep(window, &record.record) {
                        records.push(record);
                    }
                }
                None => {
                    debug!(window_id = window.window_id, "skipping window without root");
                }
            }
        }
        Snapshot {
            captured_at: Utc::now(),
            windows: records,
        }
    }

    fn walk_window(&self, window: &UiWindow, filter: &CaptureFilter) -> Option<WindowRecord> {
        let root_index = window.root_index()?;
        let root = window.node(root_index)?;

        let mut visited = HashSet::new();
        visited.insert(root_index);
        let mut children = self.walk_children(window, root, filter, &mut visited);
        if filter.visible_only {
            children.retain_mut(|child| prune_invisible_leaves(child));
        }

        let metadata = NodeMetadata {
            window_id: Some(window.window_id),
            role: Some("Window".to_string()),
            title: window.title.clone(),
            x1: Some(root.bounds.left),
            y1: Some(root.bounds.top),
            x2: Some(root.bounds.right),
            y2: Some(root.bounds.bottom),
            ..Default::default()
        };
        Some(WindowRecord {
            window_id: window.window_id,
            title: window.title.clone(),
            record: NodeRecord {
                id: Some(root.node_id),
                name: "Window".to_string(),
                metadata,
                children,
            },
        })
    }

    /// Encodes the children of `node`, depth first. A child index already
    /// seen in this walk is a cycle and terminates that branch.
    fn walk_children(
        &self,
        window: &UiWindow,
        node: &UiNode,
        filter: &CaptureFilter,
        visited: &mut HashSet<NodeIndex>,
    ) -> Vec<NodeRecord> {
        let mut records = Vec::new();
        for &child_index in &node.children {
            if !visited.insert(child_index) {
                debug!(window_id = window.window_id, index = child_index, "cyclic child link");
                continue;
            }
            let Some(child) = window.node(child_index) else {
                continue;
            };

            if filter.important_only && !child.important_for_accessibility {
                // Lift the unimportant node's children into this position.
                records.extend(self.walk_children(window, child, filter, visited));
                continue;
            }

            let label_text = child
                .labeled_by
                .and_then(|id| window.node_by_id(id))
                .and_then(label_text_of);
            let mut record = self.encoder.encode(child, label_text.as_deref());
            record.children = self.walk_children(window, child, filter, visited);
            records.push(record);
        }
        records
    }
}

/// Label text of a node: the content description when non-blank, else text.
fn label_text_of(node: &UiNode) -> Option<String> {
    if let Some(content) = node.content_description.as_deref() {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    node.text.clone()
}

/// Recursively drops invisible leaves. Returns whether `record` survives.
/// A single bottom-up pass reaches the fixed point, so re-pruning a pruned
/// tree changes nothing.
fn prune_invisible_leaves(record: &mut NodeRecord) -> bool {
    record.children.retain_mut(|child| prune_invisible_leaves(child));
    record.metadata.visibility.is_none() || !record.children.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{Bounds, UiNode};

    fn window_with_chain(window_id: i32, title: &str) -> UiWindow {
        let mut window = UiWindow::new(window_id, Some(title.to_string()));
        let mut root_node = UiNode::new(1);
        root_node.class_name = Some("android.widget.FrameLayout".to_string());
        root_node.bounds = Bounds::new(0, 0, 1080, 1920);
        let root = window.push_node(root_node);

        let mut child_node = UiNode::new(2);
        child_node.class_name = Some("android.widget.TextView".to_string());
        child_node.text = Some("hello".to_string());
        let child = window.push_node(child_node);

        window.set_root(root);
        window.add_child(root, child);
        window
    }

    fn keep_all_walker() -> TreeWalker {
        TreeWalker::new(EncoderConfig::default(), Box::new(KeepAllWindows))
    }

    #[test]
    fn test_walk_basic_shape() {
        let walker = keep_all_walker();
        let snapshot = walker.walk(&[window_with_chain(5, "Main")], &CaptureFilter::default());

        assert_eq!(snapshot.windows.len(), 1);
        let record = &snapshot.windows[0].record;
        assert_eq!(record.name, "Window");
        assert_eq!(record.id, Some(1));
        assert_eq!(record.metadata.window_id, Some(5));
        assert_eq!(record.metadata.title.as_deref(), Some("Main"));
        // The root node itself is not re-encoded; its children are the tree.
        assert_eq!(record.children.len(), 1);
        assert_eq!(record.children[0].name, "TextView");
    }

    #[test]
    fn test_inactive_and_rootless_windows_skipped() {
        let mut inactive = window_with_chain(1, "A");
        inactive.active = false;
        let rootless = UiWindow::new(2, Some("B".to_string()));

        let walker = keep_all_walker();
        let snapshot = walker.walk(&[inactive, rootless], &CaptureFilter::default());
        assert!(snapshot.windows.is_empty());
    }

    #[test]
    fn test_chrome_policy_drops_navigation_bar_and_shade() {
        let walker = TreeWalker::default();

        let nav = window_with_chain(1, "Navigation bar");

        let mut shade = UiWindow::new(2, Some("ShadeHost".to_string()));
        let root = shade.push_node(UiNode::new(10));
        let mut pane_node = UiNode::new(11);
        pane_node.pane_title = Some("Notification shade.".to_string());
        let pane = shade.push_node(pane_node);
        shade.set_root(root);
        shade.add_child(root, pane);

        let app = window_with_chain(3, "Main");

        let snapshot = walker.walk(&[nav, shade, app], &CaptureFilter::default());
        assert_eq!(snapshot.windows.len(), 1);
        assert_eq!(snapshot.windows[0].window_id, 3);
    }

    #[test]
    fn test_cycle_guard_terminates() {
        let mut window = UiWindow::new(1, Some("Cyclic".to_string()));
        let root = window.push_node(UiNode::new(1));
        let a = window.push_node(UiNode::new(2));
        let b = window.push_node(UiNode::new(3));
        window.set_root(root);
        window.add_child(root, a);
        window.add_child(a, b);
        window.add_child(b, a); // cycle
        window.add_child(b, root); // back edge to root

        let walker = keep_all_walker();
        let snapshot = walker.walk(&[window], &CaptureFilter::default());

        let record = &snapshot.windows[0].record;
        assert_eq!(record.children.len(), 1);
        assert_eq!(record.children[0].children.len(), 1);
        assert!(record.children[0].children[0].children.is_empty());
    }

    #[test]
    fn test_important_only_lifts_children() {
        let mut window = UiWindow::new(1, Some("Main".to_string()));
        let root = window.push_node(UiNode::new(1));
        let mut wrapper_node = UiNode::new(2);
        wrapper_node.important_for_accessibility = false;
        let wrapper = window.push_node(wrapper_node);
        let mut inner_node = UiNode::new(3);
        inner_node.text = Some("kept".to_string());
        let inner = window.push_node(inner_node);
        window.set_root(root);
        window.add_child(root, wrapper);
        window.add_child(wrapper, inner);

        let walker = keep_all_walker();
        let filter = CaptureFilter {
            important_only: true,
            visible_only: false,
        };
        let snapshot = walker.walk(&[window], &filter);

        let children = &snapshot.windows[0].record.children;
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].metadata.hash_code, Some(3));
    }

    #[test]
    fn test_visible_only_prunes_leaves_but_keeps_ancestors() {
        let mut window = UiWindow::new(1, Some("Main".to_string()));
        let root = window.push_node(UiNode::new(1));
        let mut hidden_parent = UiNode::new(2);
        hidden_parent.visible = false;
        let parent = window.push_node(hidden_parent);
        let shown = window.push_node(UiNode::new(3));
        let mut hidden_leaf = UiNode::new(4);
        hidden_leaf.visible = false;
        let leaf = window.push_node(hidden_leaf);
        window.set_root(root);
        window.add_child(root, parent);
        window.add_child(parent, shown);
        window.add_child(root, leaf);

        let walker = keep_all_walker();
        let filter = CaptureFilter {
            important_only: false,
            visible_only: true,
        };
        let snapshot = walker.walk(&[window], &filter);

        let children = &snapshot.windows[0].record.children;
        // Invisible leaf dropped; invisible parent kept for its visible child.
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].metadata.hash_code, Some(2));
        assert_eq!(children[0].children[0].metadata.hash_code, Some(3));
    }

    fn window_with_ids(root_id: i64, child_id: i64, text: &str) -> UiWindow {
        let mut window = UiWindow::new(1, Some("Main".to_string()));
        let mut root_node = UiNode::new(root_id);
        root_node.class_name = Some("android.widget.FrameLayout".to_string());
        root_node.bounds = Bounds::new(0, 0, 1080, 1920);
        let root = window.push_node(root_node);
        let mut child_node = UiNode::new(child_id);
        child_node.class_name = Some("android.widget.TextView".to_string());
        child_node.text = Some(text.to_string());
        let child = window.push_node(child_node);
        window.set_root(root);
        window.add_child(root, child);
        window
    }

    #[test]
    fn test_window_record_serializes_without_typed_identity() {
        let walker = keep_all_walker();
        let snapshot = walker.walk(&[window_with_chain(5, "Main")], &CaptureFilter::default());

        let value = serde_json::to_value(&snapshot.windows[0]).expect("serializable");
        // The typed handles stay engine-side; the wire form is the record
        // alone, with window identity inside camelCase metadata.
        assert!(value.get("window_id").is_none());
        assert!(value.get("title").is_none());
        assert_eq!(value["metadata"]["windowId"], 5);
        assert_eq!(value["metadata"]["title"], "Main");
        assert_eq!(
            value,
            serde_json::to_value(&snapshot.windows[0].record).expect("serializable")
        );
    }

    #[test]
    fn test_same_structure_ignores_volatile_ids() {
        let walker = keep_all_walker();
        let filter = CaptureFilter::default();
        let first = walker.walk(&[window_with_ids(1, 2, "hello")], &filter);
        // Same shape, different transient ids.
        let second = walker.walk(&[window_with_ids(100, 200, "hello")], &filter);
        assert!(first.same_structure(&second));

        // A text change is a structural change.
        let third = walker.walk(&[window_with_ids(1, 2, "goodbye")], &filter);
        assert!(!first.same_structure(&third));
    }
}
