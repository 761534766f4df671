//! UI change events and the read-only node tree they carry.
//!
//! Events are transient: produced by the host, classified once, dropped.
//! The node tree is only ever searched, never mutated, and no reference to
//! it outlives a single classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of UI change reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    WindowStateChanged,
    WindowContentChanged,
    ViewClicked,
    ViewFocused,
    TextChanged,
    NotificationChanged,
}

impl EventKind {
    /// Kinds that indicate the foreground app may have changed
    pub fn is_foreground_change(&self) -> bool {
        matches!(
            self,
            EventKind::WindowContentChanged | EventKind::WindowStateChanged | EventKind::ViewClicked
        )
    }

    /// Kinds on which a settings search box may expose typed input
    pub fn is_search_interaction(&self) -> bool {
        !matches!(self, EventKind::NotificationChanged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WindowStateChanged => "WindowStateChanged",
            EventKind::WindowContentChanged => "WindowContentChanged",
            EventKind::ViewClicked => "ViewClicked",
            EventKind::ViewFocused => "ViewFocused",
            EventKind::TextChanged => "TextChanged",
            EventKind::NotificationChanged => "NotificationChanged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "windowstatechanged" => Ok(EventKind::WindowStateChanged),
            "windowcontentchanged" => Ok(EventKind::WindowContentChanged),
            "viewclicked" => Ok(EventKind::ViewClicked),
            "viewfocused" => Ok(EventKind::ViewFocused),
            "textchanged" => Ok(EventKind::TextChanged),
            "notificationchanged" => Ok(EventKind::NotificationChanged),
            _ => Err(format!("Unknown event kind: '{s}'")),
        }
    }
}

/// Read-only view over a host UI tree node.
///
/// Children are handed to a callback rather than returned so that hosts
/// whose child lookups produce temporary handles can still implement this.
pub trait UiNode {
    /// Text label of this node, if any
    fn text(&self) -> Option<&str>;

    /// Call `predicate` on each child in order until it returns true.
    /// Returns whether any call returned true.
    fn any_child(&self, predicate: &mut dyn FnMut(&dyn UiNode) -> bool) -> bool;
}

/// Owned snapshot of a UI tree, used when events cross a channel or come
/// from a recorded event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TextNode>,
}

impl TextNode {
    pub fn leaf(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    pub fn with_children(text: Option<String>, children: Vec<TextNode>) -> Self {
        Self { text, children }
    }
}

impl UiNode for TextNode {
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    fn any_child(&self, predicate: &mut dyn FnMut(&dyn UiNode) -> bool) -> bool {
        self.children.iter().any(|child| predicate(child))
    }
}

/// Depth-first, case-insensitive search for `needle` in the text of `node`
/// or any of its descendants.
pub fn contains_text(node: &dyn UiNode, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    contains_lowered(node, &needle)
}

fn contains_lowered(node: &dyn UiNode, needle: &str) -> bool {
    if node
        .text()
        .is_some_and(|text| text.to_lowercase().contains(needle))
    {
        return true;
    }
    node.any_child(&mut |child| contains_lowered(child, needle))
}

/// Case-insensitive substring test
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// One UI change notification from the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiEvent {
    /// Package that owns the window; `None` or empty means the host could
    /// not identify it and the event is discarded
    #[serde(default)]
    pub package_id: Option<String>,

    /// Activity / view class name
    #[serde(default)]
    pub screen_class: String,

    pub event_kind: EventKind,

    /// Text the host attached to the event itself
    #[serde(default)]
    pub visible_text: String,

    /// Snapshot of the source node subtree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node: Option<TextNode>,
}

impl UiEvent {
    pub fn new(package_id: impl Into<String>, event_kind: EventKind) -> Self {
        Self {
            package_id: Some(package_id.into()),
            screen_class: String::new(),
            event_kind,
            visible_text: String::new(),
            source_node: None,
        }
    }

    pub fn with_screen_class(mut self, screen_class: impl Into<String>) -> Self {
        self.screen_class = screen_class.into();
        self
    }

    pub fn with_text(mut self, visible_text: impl Into<String>) -> Self {
        self.visible_text = visible_text.into();
        self
    }

    pub fn with_source(mut self, node: TextNode) -> Self {
        self.source_node = Some(node);
        self
    }

    /// The package id, if present and non-blank
    pub fn package(&self) -> Option<&str> {
        self.package_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}
