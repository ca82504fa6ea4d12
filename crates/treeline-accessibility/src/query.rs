//! Node query engine.
//!
//! Queries run against the live oracle forest, not against captured records:
//! window order first, then depth first within each window, cycle-guarded.
//! Matches stream through an internal visitor straight into their projected
//! form, so a large forest is never collected twice.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::oracle::{Bounds, NodeIndex, UiNode, UiWindow};

/// A find request, one per query mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Exact, case-sensitive match on text or content description.
    Text(String),
    /// Exact resource-id match.
    ViewId(String),
    /// Whole-string regex match on text or content description.
    Pattern(String),
    /// Conjunction of property constraints.
    Props(PropMap),
}

pub type PropMap = HashMap<String, PropValue>;

/// A property constraint value. Untagged: JSON strings, booleans and
/// integers all deserialize naturally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl PropValue {
    /// String form, for comparison against text-valued node properties.
    fn as_text(&self) -> String {
        match self {
            PropValue::Str(s) => s.clone(),
            PropValue::Bool(b) => b.to_string(),
            PropValue::Int(i) => i.to_string(),
        }
    }

    fn matches_bool(&self, actual: bool) -> bool {
        match self {
            PropValue::Bool(b) => actual == *b,
            // Anything but a case-insensitive "true" parses as false.
            PropValue::Str(s) => actual == s.eq_ignore_ascii_case("true"),
            PropValue::Int(_) => false,
        }
    }

    fn matches_int(&self, actual: i64) -> bool {
        match self {
            PropValue::Int(i) => actual == *i,
            PropValue::Str(s) => s.parse::<i64>().map(|v| actual == v).unwrap_or(false),
            PropValue::Bool(_) => false,
        }
    }

    fn matches_text(&self, actual: Option<&str>) -> bool {
        match actual {
            Some(value) => value == self.as_text(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundsInScreen {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl From<Bounds> for BoundsInScreen {
    fn from(b: Bounds) -> Self {
        Self {
            left: b.left,
            top: b.top,
            right: b.right,
            bottom: b.bottom,
        }
    }
}

/// One entry of a verbose action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub id: i32,
    pub label: String,
}

/// A query hit, projected for the wire. The compact form carries identity,
/// interaction flags and geometry; verbose adds the long tail of attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundNode {
    pub hash_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_id_resource_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_hash_code: Option<i64>,
    pub is_clickable: bool,
    pub is_enabled: bool,
    pub is_focusable: bool,
    pub is_focused: bool,
    pub is_scrollable: bool,
    pub is_visible_to_user: bool,
    pub bounds_in_screen: BoundsInScreen,

    // Verbose-only fields below.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_long_clickable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_checkable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_checked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_selected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_important_for_accessibility: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_content_invalid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_screen_reader_focusable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_item_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_list: Option<Vec<ActionEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labeled_by_hash_code: Option<i64>,
}

struct Visit<'a> {
    node: &'a UiNode,
    parent_id: Option<i64>,
    window: &'a UiWindow,
}

impl FoundNode {
    fn compact(visit: &Visit<'_>) -> FoundNode {
        let node = visit.node;
        FoundNode {
            hash_code: node.node_id,
            class_name: node.class_name.clone(),
            text: node.text.clone(),
            content_description: node.content_description.clone(),
            view_id_resource_name: node.resource_id.clone(),
            parent_hash_code: visit.parent_id,
            is_clickable: node.clickable,
            is_enabled: node.enabled,
            is_focusable: node.focusable,
            is_focused: node.focused,
            is_scrollable: node.scrollable,
            is_visible_to_user: node.visible,
            bounds_in_screen: node.bounds.into(),
            hint_text: None,
            error_text: None,
            tooltip_text: None,
            pane_title: None,
            state_description: None,
            role_description: None,
            is_long_clickable: None,
            is_checkable: None,
            is_checked: None,
            is_selected: None,
            is_important_for_accessibility: None,
            is_content_invalid: None,
            is_screen_reader_focusable: None,
            collection_info: None,
            collection_item_info: None,
            action_list: None,
            window_id: None,
            child_count: None,
            labeled_by_hash_code: None,
        }
    }

    fn verbose(visit: &Visit<'_>) -> FoundNode {
        let node = visit.node;
        let mut found = FoundNode::compact(visit);
        found.hint_text = node.hint.clone();
        found.error_text = node.error.clone();
        found.tooltip_text = node.tooltip.clone();
        found.pane_title = node.pane_title.clone();
        found.state_description = node.state_description.clone();
        found.role_description = node.role_description.clone();
        found.is_long_clickable = Some(node.long_clickable);
        found.is_checkable = Some(node.checkable);
        found.is_checked = Some(node.checked);
        found.is_selected = Some(node.selected);
        found.is_important_for_accessibility = Some(node.important_for_accessibility);
        found.is_content_invalid = Some(node.content_invalid);
        found.is_screen_reader_focusable = Some(node.screen_reader_focusable);
        found.collection_info = node
            .collection
            .map(|c| format!("Rows: {}, Columns: {}", c.rows, c.columns));
        found.collection_item_info = node
            .collection_item
            .map(|c| format!("Row: {}, Column: {}", c.row, c.column));
        if !node.actions.is_empty() {
            found.action_list = Some(
                node.actions
                    .iter()
                    .map(|a| ActionEntry {
                        id: a.wire_id(),
                        label: a.token(),
                    })
                    .collect(),
            );
        }
        found.window_id = Some(visit.window.window_id);
        found.child_count = Some(node.children.len());
        found.labeled_by_hash_code = node.labeled_by;
        found
    }
}

/// Runs a query over the forest, projecting each hit compactly or verbosely.
/// Never fails: a malformed regex pattern is logged and matches nothing.
pub fn run(windows: &[UiWindow], query: &Query, verbose: bool) -> Vec<FoundNode> {
    let project = if verbose { FoundNode::verbose } else { FoundNode::compact };
    let mut results = Vec::new();

    match query {
        Query::Text(needle) => {
            for_each_node(windows, |visit| {
                let text_hit = visit.node.text.as_deref() == Some(needle.as_str());
                let content_hit =
                    visit.node.content_description.as_deref() == Some(needle.as_str());
                if text_hit || content_hit {
                    results.push(project(visit));
                }
            });
        }
        Query::ViewId(view_id) => {
            for_each_node(windows, |visit| {
                if visit.node.resource_id.as_deref() == Some(view_id.as_str()) {
                    results.push(project(visit));
                }
            });
        }
        Query::Pattern(pattern) => {
            // Whole-string semantics: the pattern must cover the field. A
            // pattern that does not compile skips every regex test, so the
            // query still succeeds with no hits.
            let Ok(regex) = Regex::new(&format!("^(?:{pattern})$")) else {
                warn!("invalid regex pattern: {pattern}");
                return results;
            };
            for_each_node(windows, |visit| {
                let text_hit = visit
                    .node
                    .text
                    .as_deref()
                    .map(|t| regex.is_match(t))
                    .unwrap_or(false);
                let content_hit = visit
                    .node
                    .content_description
                    .as_deref()
                    .map(|c| regex.is_match(c))
                    .unwrap_or(false);
                if text_hit || content_hit {
                    results.push(project(visit));
                }
            });
        }
        Query::Props(props) => {
            // An empty constraint map matches nothing.
            if props.is_empty() {
                debug!("property query with no constraints");
                return results;
            }
            for_each_node(windows, |visit| {
                if matches_props(visit.node, props) {
                    results.push(project(visit));
                }
            });
        }
    }
    results
}

/// First node whose resource id matches, as its transient id.
pub fn first_by_view_id(windows: &[UiWindow], view_id: &str) -> Option<i64> {
    let mut found = None;
    for_each_node(windows, |visit| {
        if found.is_none() && visit.node.resource_id.as_deref() == Some(view_id) {
            found = Some(visit.node.node_id);
        }
    });
    found
}

/// Whether a node with the given transient id currently exists.
pub fn first_by_node_id(windows: &[UiWindow], node_id: i64) -> Option<i64> {
    let mut found = None;
    for_each_node(windows, |visit| {
        if found.is_none() && visit.node.node_id == node_id {
            found = Some(node_id);
        }
    });
    found
}

/// Every supplied known constraint must match; unknown constraint names are
/// trivially satisfied.
fn matches_props(node: &UiNode, props: &PropMap) -> bool {
    props.iter().all(|(key, expected)| {
        match key.to_lowercase().as_str() {
            "classname" => expected.matches_text(node.class_name.as_deref()),
            "text" => expected.matches_text(node.text.as_deref()),
            "contentdescription" => expected.matches_text(node.content_description.as_deref()),
            "viewid" | "viewidresourcename" | "resourceid" => {
                expected.matches_text(node.resource_id.as_deref())
            }
            "isclickable" => expected.matches_bool(node.clickable),
            "isenabled" => expected.matches_bool(node.enabled),
            "isfocusable" => expected.matches_bool(node.focusable),
            "isfocused" => expected.matches_bool(node.focused),
            "isscrollable" => expected.matches_bool(node.scrollable),
            "ischeckable" => expected.matches_bool(node.checkable),
            "ischecked" => expected.matches_bool(node.checked),
            "isselected" => expected.matches_bool(node.selected),
            "childcount" => expected.matches_int(node.children.len() as i64),
            _ => true,
        }
    })
}

/// Depth-first visit of every node in every window, roots included, with a
/// per-window cycle guard.
fn for_each_node<'a, F>(windows: &'a [UiWindow], mut visitor: F)
where
    F: FnMut(&Visit<'a>),
{
    for window in windows {
        let Some(root) = window.root_index() else {
            continue;
        };
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        visit_recursive(window, root, None, &mut visited, &mut visitor);
    }
}

fn visit_recursive<'a, F>(
    window: &'a UiWindow,
    index: NodeIndex,
    parent_id: Option<i64>,
    visited: &mut HashSet<NodeIndex>,
    visitor: &mut F,
) where
    F: FnMut(&Visit<'a>),
{
    if !visited.insert(index) {
        return;
    }
    let Some(node) = window.node(index) else {
        return;
    };
    visitor(&Visit {
        node,
        parent_id,
        window,
    });
    for &child in &node.children {
        visit_recursive(window, child, Some(node.node_id), visited, visitor);
    }
}
