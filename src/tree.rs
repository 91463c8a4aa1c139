//! Element tree capability consumed by the cache engine
//!
//! The cache never talks to the platform directly. Everything it needs from
//! the live UI-element graph goes through [`ElementTree`], which the macOS
//! backend implements over the Accessibility API and the tests implement
//! with an in-memory tree.

use std::fmt;

use serde::Serialize;

/// On-screen size of an element, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Size { width, height }
    }
}

/// On-screen frame of an element, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Frame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Read/act access to a live UI-element graph.
///
/// Handles are capability tokens owned by the platform. They compare by
/// identity and may stop resolving at any time; every query reports that as
/// `None`/`false` rather than an error.
pub trait ElementTree: Send + Sync + 'static {
    type Handle: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Root element of the running application whose process name matches.
    fn find_application(&self, process_name: &str) -> Option<Self::Handle>;

    /// The application's currently focused window.
    fn focused_window(&self, application: &Self::Handle) -> Option<Self::Handle>;

    /// All windows of the application, front to back.
    fn windows(&self, application: &Self::Handle) -> Option<Vec<Self::Handle>>;

    /// Validity probe. A handle whose role can still be read is alive.
    fn is_valid(&self, handle: &Self::Handle) -> bool {
        self.role(handle).is_some()
    }

    fn is_focused(&self, handle: &Self::Handle) -> bool;

    fn role(&self, handle: &Self::Handle) -> Option<String>;

    fn title(&self, handle: &Self::Handle) -> Option<String>;

    fn size(&self, handle: &Self::Handle) -> Option<Size>;

    fn frame(&self, handle: &Self::Handle) -> Option<Frame>;

    fn children(&self, handle: &Self::Handle) -> Option<Vec<Self::Handle>>;

    fn supports_action(&self, handle: &Self::Handle, action: &str) -> bool;

    fn invoke_action(&self, handle: &Self::Handle, action: &str) -> bool;
}

/// Render the hierarchy below `root` as an indented outline.
///
/// Walks every child down to `max_depth`, so this is for diagnostics only.
pub fn describe_hierarchy<T: ElementTree>(tree: &T, root: &T::Handle, max_depth: usize) -> String {
    let mut output = String::new();
    describe_node(tree, root, 1, max_depth, &mut output);
    output
}

fn describe_node<T: ElementTree>(
    tree: &T,
    node: &T::Handle,
    depth: usize,
    max_depth: usize,
    output: &mut String,
) {
    if depth > max_depth {
        return;
    }

    let indent = "  ".repeat(depth - 1);
    let role = tree.role(node).unwrap_or_else(|| "<unknown>".to_string());
    output.push_str(&indent);
    output.push_str(&role);

    if let Some(title) = tree.title(node).filter(|t| !t.is_empty()) {
        output.push_str(&format!(" \"{}\"", title));
    }

    match tree.size(node) {
        Some(size) => output.push_str(&format!(" ({}x{})", size.width, size.height)),
        None => output.push_str(" (no size)"),
    }

    match tree.children(node) {
        Some(children) => {
            output.push_str(&format!(" [{} children]\n", children.len()));
            for child in &children {
                describe_node(tree, child, depth + 1, max_depth, output);
            }
        }
        None => output.push_str(" [no children]\n"),
    }
}
