//! Frame log document
//!
//! An arena of event and marker nodes with parent/child links, serialized as
//! indented XML:
//!
//! ```text
//! <?xml version="1.0" encoding="utf-8"?>
//! <frame>
//!   <event name="Views" time="1.204">
//!     <event name="Terrain" time="0.873"/>
//!   </event>
//!   <marker value="after views"/>
//! </frame>
//! ```
//!
//! Times are milliseconds with three decimals and always use `.` as the
//! decimal separator.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle to a node in a [`FrameLog`]
    pub struct NodeKey;
}

/// Content of a log node
#[derive(Debug, Clone, PartialEq)]
pub enum LogNode {
    /// Timed span; `time_ms` stays `None` until the span is closed
    Event {
        /// Event name
        name: String,
        /// Duration in milliseconds
        time_ms: Option<f64>,
    },
    /// Untimed point
    Marker {
        /// Marker text
        value: String,
    },
}

#[derive(Debug)]
struct Node {
    content: LogNode,
    children: Vec<NodeKey>,
}

/// Tree of events recorded for one frame
#[derive(Debug, Default)]
pub struct FrameLog {
    nodes: SlotMap<NodeKey, Node>,
    roots: Vec<NodeKey>,
}

impl FrameLog {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an open event under `parent`, or at the top level
    pub fn open_event(&mut self, parent: Option<NodeKey>, name: &str) -> NodeKey {
        self.insert(
            parent,
            LogNode::Event {
                name: name.to_string(),
                time_ms: None,
            },
        )
    }

    /// Record the duration of an event
    pub fn close_event(&mut self, key: NodeKey, elapsed_ms: f64) {
        if let Some(Node {
            content: LogNode::Event { time_ms, .. },
            ..
        }) = self.nodes.get_mut(key)
        {
            *time_ms = Some(elapsed_ms);
        }
    }

    /// Append a marker under `parent`, or at the top level
    pub fn add_marker(&mut self, parent: Option<NodeKey>, value: &str) -> NodeKey {
        self.insert(parent, LogNode::Marker { value: value.to_string() })
    }

    /// Node content
    pub fn node(&self, key: NodeKey) -> Option<&LogNode> {
        self.nodes.get(key).map(|node| &node.content)
    }

    /// Children of `key` in insertion order
    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.nodes.get(key).map_or(&[], |node| node.children.as_slice())
    }

    /// Top-level nodes in insertion order
    pub fn roots(&self) -> &[NodeKey] {
        &self.roots
    }

    /// Total number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serialize as an indented XML document
    pub fn to_xml_string(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        if self.roots.is_empty() {
            out.push_str("<frame/>\n");
            return out;
        }
        out.push_str("<frame>\n");
        for &key in &self.roots {
            self.write_node(&mut out, key, 1);
        }
        out.push_str("</frame>\n");
        out
    }

    /// Write the document to `path`, creating missing parent directories
    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_xml_string())
    }

    fn insert(&mut self, parent: Option<NodeKey>, content: LogNode) -> NodeKey {
        let key = self.nodes.insert(Node {
            content,
            children: Vec::new(),
        });
        match parent.and_then(|parent| self.nodes.get_mut(parent)) {
            Some(parent) => parent.children.push(key),
            None => self.roots.push(key),
        }
        key
    }

    fn write_node(&self, out: &mut String, key: NodeKey, depth: usize) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        let indent = "  ".repeat(depth);
        match &node.content {
            LogNode::Marker { value } => {
                let _ = writeln!(out, "{indent}<marker value=\"{}\"/>", escape(value));
            }
            LogNode::Event { name, time_ms } => {
                let _ = write!(out, "{indent}<event name=\"{}\"", escape(name));
                if let Some(time) = time_ms {
                    let _ = write!(out, " time=\"{time:.3}\"");
                }
                if node.children.is_empty() {
                    out.push_str("/>\n");
                } else {
                    out.push_str(">\n");
                    for &child in &node.children {
                        self.write_node(out, child, depth + 1);
                    }
                    let _ = writeln!(out, "{indent}</event>");
                }
            }
        }
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
