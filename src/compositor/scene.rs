//! Scene graph
//!
//! An ownership tree of render nodes. Each active output owns one root;
//! shell code hangs windows, layers and decorations under it. Topology
//! changes are visible to the very next frame, there is no separate
//! commit step.
//!
//! Children are painted after their parent, and later siblings after
//! earlier ones, so the last child of a node is on top.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};
use thiserror::Error;

use crate::backend::OutputHandle;
use crate::compositor::Rect;
use crate::renderer::{PaintCommand, RenderTarget};

/// Unique identifier for scene nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        NodeId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifier of a client buffer, owned by whoever supplied it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// A client buffer referenced by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRef {
    pub id: BufferId,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// What a node contributes to the frame
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Grouping container; only its position matters
    Tree,
    /// Client content. Without a buffer it behaves like a container.
    Buffer {
        buffer: Option<BufferRef>,
        /// Destination size; defaults to the buffer size
        size: Option<Size>,
    },
    /// Solid color rectangle
    Rect { size: Size, color: [f32; 4] },
}

/// A node in the scene graph
#[derive(Debug)]
pub struct SceneNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Offset relative to the parent
    pub position: (i32, i32),
    /// Disabled nodes and their subtrees are not painted
    pub enabled: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Set on output roots only
    output: Option<OutputHandle>,
}

impl SceneNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            position: (0, 0),
            enabled: true,
            parent: None,
            children: Vec::new(),
            output: None,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The output owning this node, if it is an output root
    pub fn output(&self) -> Option<OutputHandle> {
        self.output
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("unknown scene node {0:?}")]
    UnknownNode(NodeId),
    #[error("attaching {node:?} under {parent:?} would create a cycle")]
    Cycle { node: NodeId, parent: NodeId },
    #[error("{0:?} is an output root and is owned by its output")]
    OutputRoot(NodeId),
}

/// The scene graph shared by every output
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, SceneNode>,
    output_roots: HashMap<OutputHandle, NodeId>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            output_roots: HashMap::new(),
        }
    }

    /// Create an unattached node
    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let node = SceneNode::new(kind);
        let id = node.id;
        self.nodes.insert(id, node);
        trace!("Created scene node {:?}", id);
        id
    }

    /// Create the root node owned by an output. An existing root for the
    /// same output is destroyed first.
    pub fn create_output_root(&mut self, handle: OutputHandle) -> NodeId {
        self.destroy_output_root(handle);

        let mut node = SceneNode::new(NodeKind::Tree);
        node.output = Some(handle);
        let id = node.id;
        self.nodes.insert(id, node);
        self.output_roots.insert(handle, id);
        debug!("Created scene root {:?} for output {:?}", id, handle);
        id
    }

    /// Destroy an output's root and everything under it
    pub fn destroy_output_root(&mut self, handle: OutputHandle) -> Vec<BufferId> {
        match self.output_roots.remove(&handle) {
            Some(root) => {
                debug!("Destroying scene root {:?} of output {:?}", root, handle);
                let mut released = Vec::new();
                self.destroy_subtree(root, &mut released);
                released
            }
            None => Vec::new(),
        }
    }

    pub fn output_root(&self, handle: OutputHandle) -> Option<NodeId> {
        self.output_roots.get(&handle).copied()
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn node(&self, id: NodeId) -> Result<&SceneNode, SceneError> {
        self.nodes.get(&id).ok_or(SceneError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut SceneNode, SceneError> {
        self.nodes.get_mut(&id).ok_or(SceneError::UnknownNode(id))
    }

    /// Make `node` the topmost child of `parent`, detaching it from any
    /// previous parent
    pub fn attach_node(&mut self, parent: NodeId, node: NodeId) -> Result<(), SceneError> {
        self.node(parent)?;
        if self.node(node)?.output.is_some() {
            return Err(SceneError::OutputRoot(node));
        }
        if self.is_ancestor_or_self(node, parent) {
            return Err(SceneError::Cycle { node, parent });
        }

        self.unlink(node);
        self.node_mut(parent)?.children.push(node);
        self.node_mut(node)?.parent = Some(parent);
        trace!("Attached {:?} under {:?}", node, parent);
        Ok(())
    }

    /// Unlink `node` (and its subtree) from its parent. The subtree stays
    /// alive but is unreachable from any output until attached again.
    pub fn detach_node(&mut self, node: NodeId) -> Result<(), SceneError> {
        if self.node(node)?.output.is_some() {
            return Err(SceneError::OutputRoot(node));
        }
        self.unlink(node);
        trace!("Detached {:?}", node);
        Ok(())
    }

    /// Move `node` to `index` among its siblings. Higher indices paint on
    /// top; an index past the end makes it the topmost sibling.
    pub fn reorder(&mut self, node: NodeId, index: usize) -> Result<(), SceneError> {
        let Some(parent) = self.node(node)?.parent else {
            return Ok(());
        };
        let siblings = &mut self.node_mut(parent)?.children;
        if let Some(current) = siblings.iter().position(|c| *c == node) {
            siblings.remove(current);
            let index = index.min(siblings.len());
            siblings.insert(index, node);
        }
        Ok(())
    }

    /// Destroy `node` and all of its descendants, depth first. Returns the
    /// buffers that are no longer referenced by the scene.
    pub fn destroy_node(&mut self, node: NodeId) -> Result<Vec<BufferId>, SceneError> {
        if self.node(node)?.output.is_some() {
            return Err(SceneError::OutputRoot(node));
        }
        self.unlink(node);
        let mut released = Vec::new();
        self.destroy_subtree(node, &mut released);
        Ok(released)
    }

    pub fn set_position(&mut self, node: NodeId, x: i32, y: i32) -> Result<(), SceneError> {
        self.node_mut(node)?.position = (x, y);
        Ok(())
    }

    pub fn set_enabled(&mut self, node: NodeId, enabled: bool) -> Result<(), SceneError> {
        self.node_mut(node)?.enabled = enabled;
        Ok(())
    }

    /// Replace the buffer of a buffer node. Other node kinds are turned
    /// into buffer nodes.
    pub fn set_buffer(
        &mut self,
        node: NodeId,
        buffer: Option<BufferRef>,
    ) -> Result<Option<BufferId>, SceneError> {
        let node = self.node_mut(node)?;
        let (previous, size) = match &node.kind {
            NodeKind::Buffer { buffer, size } => (buffer.map(|b| b.id), *size),
            _ => (None, None),
        };
        node.kind = NodeKind::Buffer { buffer, size };
        Ok(previous.filter(|prev| buffer.map(|b| b.id) != Some(*prev)))
    }

    pub fn children(&self, node: NodeId) -> Result<&[NodeId], SceneError> {
        Ok(self.node(node)?.children.as_slice())
    }

    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>, SceneError> {
        Ok(self.node(node)?.parent)
    }

    /// Whether `node` is reachable from some output root
    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            match self.nodes.get(&current) {
                Some(n) if n.output.is_some() => return true,
                Some(n) => match n.parent {
                    Some(parent) => current = parent,
                    None => return false,
                },
                None => return false,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Paint the subtree under `root` into `target`, back to front
    pub fn render_into(&self, root: NodeId, target: &mut RenderTarget) {
        target.begin_frame();
        let bounds = target.bounds();
        self.paint(root, (0, 0), bounds, target);
        trace!(
            "Rendered {:?}: {} paint command(s)",
            root,
            target.commands().len()
        );
    }

    fn paint(&self, id: NodeId, origin: (i32, i32), bounds: Rect, target: &mut RenderTarget) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if !node.enabled {
            return;
        }

        let x = origin.0.saturating_add(node.position.0);
        let y = origin.1.saturating_add(node.position.1);

        if let Some(command) = Self::paint_command(node, x, y) {
            if command.area().intersects(&bounds) {
                target.push(command);
            }
        }

        for child in &node.children {
            self.paint(*child, (x, y), bounds, target);
        }
    }

    fn paint_command(node: &SceneNode, x: i32, y: i32) -> Option<PaintCommand> {
        match &node.kind {
            NodeKind::Tree => None,
            NodeKind::Buffer { buffer, size } => {
                let buffer = (*buffer)?;
                let size = size.unwrap_or(Size {
                    width: buffer.width,
                    height: buffer.height,
                });
                Some(PaintCommand::Buffer {
                    node: node.id,
                    buffer: buffer.id,
                    area: Rect::new(x, y, size.width, size.height),
                })
            }
            NodeKind::Rect { size, color } => Some(PaintCommand::Fill {
                node: node.id,
                area: Rect::new(x, y, size.width, size.height),
                color: *color,
            }),
        }
    }

    /// Topmost painted node under an output-local point
    pub fn node_at(&self, root: NodeId, x: i32, y: i32) -> Option<NodeId> {
        self.hit_test(root, (0, 0), x, y)
    }

    fn hit_test(&self, id: NodeId, origin: (i32, i32), x: i32, y: i32) -> Option<NodeId> {
        let node = self.nodes.get(&id)?;
        if !node.enabled {
            return None;
        }
        let nx = origin.0.saturating_add(node.position.0);
        let ny = origin.1.saturating_add(node.position.1);

        for child in node.children.iter().rev() {
            if let Some(hit) = self.hit_test(*child, (nx, ny), x, y) {
                return Some(hit);
            }
        }

        Self::paint_command(node, nx, ny)
            .filter(|command| command.area().contains(x, y))
            .map(|_| id)
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    fn unlink(&mut self, node: NodeId) {
        let parent = self.nodes.get_mut(&node).and_then(|n| n.parent.take());
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != node);
        }
    }

    fn destroy_subtree(&mut self, node: NodeId, released: &mut Vec<BufferId>) {
        let Some(removed) = self.nodes.remove(&node) else {
            return;
        };
        for child in removed.children {
            self.destroy_subtree(child, released);
        }
        if let NodeKind::Buffer {
            buffer: Some(buffer),
            ..
        } = removed.kind
        {
            released.push(buffer.id);
        }
        trace!("Destroyed scene node {:?}", node);
    }
}
