//! In-memory element tree for tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::tree::{ElementTree, Frame, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

struct Node {
    role: String,
    title: Option<String>,
    size: Option<Size>,
    origin: (f64, f64),
    valid: bool,
    focused: bool,
    children: Vec<NodeId>,
    focused_window: Option<NodeId>,
    actions: Vec<String>,
    presses: usize,
}

#[derive(Default)]
struct MockState {
    nodes: Vec<Node>,
    apps: Vec<(String, NodeId)>,
}

/// Blocks the first `children` call until released.
pub struct Gate {
    pub entered: Sender<()>,
    pub release: Receiver<()>,
}

#[derive(Default)]
pub struct MockTree {
    state: Mutex<MockState>,
    gate: Mutex<Option<Gate>>,
    find_calls: AtomicUsize,
    focused_window_calls: AtomicUsize,
    children_calls: AtomicUsize,
}

pub struct ToolbarFixture {
    pub tree: Arc<MockTree>,
    pub app: NodeId,
    pub window: NodeId,
    pub toolbar: NodeId,
    pub buttons: Vec<NodeId>,
    pub decorations: Vec<NodeId>,
}

pub const TARGET: &str = "MarginNote 4";

impl MockTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, role: &str, title: Option<&str>, size: Option<Size>) -> NodeId {
        let mut state = self.state.lock();
        let id = NodeId(state.nodes.len());
        state.nodes.push(Node {
            role: role.to_string(),
            title: title.map(str::to_string),
            size,
            origin: (0.0, 0.0),
            valid: true,
            focused: false,
            children: Vec::new(),
            focused_window: None,
            actions: Vec::new(),
            presses: 0,
        });
        id
    }

    pub fn add_child(&self, parent: NodeId, child: NodeId) {
        self.state.lock().nodes[parent.0].children.push(child);
    }

    pub fn register_app(&self, name: &str, app: NodeId) {
        self.state.lock().apps.push((name.to_string(), app));
    }

    pub fn remove_app(&self, name: &str) {
        self.state.lock().apps.retain(|(n, _)| n != name);
    }

    pub fn set_focused_window(&self, app: NodeId, window: Option<NodeId>) {
        self.state.lock().nodes[app.0].focused_window = window;
    }

    pub fn set_focused(&self, node: NodeId, focused: bool) {
        self.state.lock().nodes[node.0].focused = focused;
    }

    pub fn set_size(&self, node: NodeId, size: Size) {
        self.state.lock().nodes[node.0].size = Some(size);
    }

    pub fn set_origin(&self, node: NodeId, x: f64, y: f64) {
        self.state.lock().nodes[node.0].origin = (x, y);
    }

    pub fn set_actions(&self, node: NodeId, actions: &[&str]) {
        self.state.lock().nodes[node.0].actions = actions.iter().map(|a| a.to_string()).collect();
    }

    pub fn invalidate(&self, node: NodeId) {
        self.state.lock().nodes[node.0].valid = false;
    }

    pub fn presses(&self, node: NodeId) -> usize {
        self.state.lock().nodes[node.0].presses
    }

    pub fn gate_children(&self, gate: Gate) {
        *self.gate.lock() = Some(gate);
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn focused_window_calls(&self) -> usize {
        self.focused_window_calls.load(Ordering::SeqCst)
    }

    pub fn children_calls(&self) -> usize {
        self.children_calls.load(Ordering::SeqCst)
    }

    fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> Option<R>) -> Option<R> {
        let state = self.state.lock();
        state.nodes.get(id.0).filter(|n| n.valid).and_then(f)
    }

    /// app -> window(focused) -> group -> group -> [4 buttons 40x40 and
    /// 2 decorative 24x24 siblings], with non-matching siblings at each level.
    pub fn toolbar_fixture() -> ToolbarFixture {
        let tree = Arc::new(MockTree::new());
        let app = tree.add_node("AXApplication", Some(TARGET), None);
        tree.register_app(TARGET, app);

        let window = tree.add_node("AXWindow", Some("Notebook"), Some(Size::new(1200.0, 800.0)));
        tree.add_child(app, window);
        tree.set_focused(window, true);
        tree.set_focused_window(app, Some(window));

        let sidebar = tree.add_node("AXScrollArea", None, Some(Size::new(200.0, 760.0)));
        let content = tree.add_node("AXGroup", None, Some(Size::new(1200.0, 760.0)));
        let other = tree.add_node("AXGroup", None, Some(Size::new(100.0, 100.0)));
        for child in [sidebar, content, other] {
            tree.add_child(window, child);
        }

        let label = tree.add_node("AXStaticText", Some("Pens"), Some(Size::new(60.0, 20.0)));
        let toolbar = tree.add_node("AXGroup", None, Some(Size::new(400.0, 40.0)));
        tree.add_child(content, label);
        tree.add_child(content, toolbar);

        let mut buttons = Vec::new();
        let mut decorations = Vec::new();
        let layout = [true, false, true, true, false, true];
        for (i, is_tool) in layout.into_iter().enumerate() {
            let size = if is_tool {
                Size::new(40.0, 40.0)
            } else {
                Size::new(24.0, 24.0)
            };
            let node = tree.add_node("AXButton", None, Some(size));
            tree.set_origin(node, 10.0 + i as f64 * 44.0, 52.0);
            tree.set_actions(node, &["AXPress"]);
            tree.add_child(toolbar, node);
            if is_tool {
                buttons.push(node);
            } else {
                decorations.push(node);
            }
        }

        ToolbarFixture {
            tree,
            app,
            window,
            toolbar,
            buttons,
            decorations,
        }
    }
}

impl ElementTree for MockTree {
    type Handle = NodeId;

    fn find_application(&self, process_name: &str) -> Option<NodeId> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        state
            .apps
            .iter()
            .find(|(name, _)| name == process_name)
            .map(|(_, id)| *id)
    }

    fn focused_window(&self, application: &NodeId) -> Option<NodeId> {
        self.focused_window_calls.fetch_add(1, Ordering::SeqCst);
        let window = self.with_node(*application, |n| n.focused_window)?;
        self.with_node(window, |n| (n.role == "AXWindow").then_some(window))
    }

    fn windows(&self, application: &NodeId) -> Option<Vec<NodeId>> {
        let children = self.with_node(*application, |n| Some(n.children.clone()))?;
        let state = self.state.lock();
        Some(
            children
                .into_iter()
                .filter(|c| state.nodes[c.0].valid && state.nodes[c.0].role == "AXWindow")
                .collect(),
        )
    }

    fn is_focused(&self, handle: &NodeId) -> bool {
        self.with_node(*handle, |n| Some(n.focused)).unwrap_or(false)
    }

    fn role(&self, handle: &NodeId) -> Option<String> {
        self.with_node(*handle, |n| Some(n.role.clone()))
    }

    fn title(&self, handle: &NodeId) -> Option<String> {
        self.with_node(*handle, |n| n.title.clone())
    }

    fn size(&self, handle: &NodeId) -> Option<Size> {
        self.with_node(*handle, |n| n.size)
    }

    fn frame(&self, handle: &NodeId) -> Option<Frame> {
        self.with_node(*handle, |n| {
            n.size.map(|s| Frame {
                x: n.origin.0,
                y: n.origin.1,
                width: s.width,
                height: s.height,
            })
        })
    }

    fn children(&self, handle: &NodeId) -> Option<Vec<NodeId>> {
        self.children_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        self.with_node(*handle, |n| Some(n.children.clone()))
    }

    fn supports_action(&self, handle: &NodeId, action: &str) -> bool {
        self.with_node(*handle, |n| Some(n.actions.iter().any(|a| a == action)))
            .unwrap_or(false)
    }

    fn invoke_action(&self, handle: &NodeId, action: &str) -> bool {
        let mut state = self.state.lock();
        match state.nodes.get_mut(handle.0) {
            Some(node) if node.valid && node.actions.iter().any(|a| a == action) => {
                node.presses += 1;
                true
            }
            _ => false,
        }
    }
}
