//! Render targets
//!
//! Pixel work belongs to the GPU backend. The core hands it a
//! [`RenderTarget`] filled with a back-to-front paint list in
//! output-local coordinates and asks it to put that on screen.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::OutputHandle;
use crate::compositor::{BufferId, NodeId, Rect};

/// Unique identifier for render targets. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

impl TargetId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TargetId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One draw operation, in output-local coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaintCommand {
    /// Sample a client buffer into `area`
    Buffer {
        node: NodeId,
        buffer: BufferId,
        area: Rect,
    },
    /// Fill `area` with a solid RGBA color
    Fill {
        node: NodeId,
        area: Rect,
        color: [f32; 4],
    },
}

impl PaintCommand {
    pub fn node(&self) -> NodeId {
        match self {
            PaintCommand::Buffer { node, .. } | PaintCommand::Fill { node, .. } => *node,
        }
    }

    pub fn area(&self) -> Rect {
        match self {
            PaintCommand::Buffer { area, .. } | PaintCommand::Fill { area, .. } => *area,
        }
    }
}

/// Per-output render target
#[derive(Debug)]
pub struct RenderTarget {
    id: TargetId,
    handle: OutputHandle,
    width: u32,
    height: u32,
    valid: bool,
    commands: Vec<PaintCommand>,
}

impl RenderTarget {
    /// Create a target for an output of the given size
    pub fn new(handle: OutputHandle, width: u32, height: u32) -> Self {
        Self {
            id: TargetId::new(),
            handle,
            width,
            height,
            valid: true,
            commands: Vec::new(),
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn handle(&self) -> OutputHandle {
        self.handle
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Target bounds in output-local coordinates
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Whether the owning output still exists
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark the target unusable. Late completions for it become no-ops.
    pub fn invalidate(&mut self) {
        self.valid = false;
        self.commands.clear();
    }

    /// Reset the paint list for a new frame
    pub fn begin_frame(&mut self) {
        self.commands.clear();
    }

    pub fn push(&mut self, command: PaintCommand) {
        self.commands.push(command);
    }

    /// Paint list of the last rendered frame, back to front
    pub fn commands(&self) -> &[PaintCommand] {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_id_unique() {
        let id1 = TargetId::new();
        let id2 = TargetId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_invalidate_clears_commands() {
        let mut target = RenderTarget::new(OutputHandle(1), 640, 480);
        target.push(PaintCommand::Fill {
            node: NodeId(1),
            area: Rect::new(0, 0, 10, 10),
            color: [1.0, 0.0, 0.0, 1.0],
        });
        assert_eq!(target.commands().len(), 1);
        assert!(target.is_valid());

        target.invalidate();
        assert!(!target.is_valid());
        assert!(target.commands().is_empty());
    }

    #[test]
    fn test_bounds() {
        let target = RenderTarget::new(OutputHandle(1), 640, 480);
        assert_eq!(target.bounds(), Rect::new(0, 0, 640, 480));
    }
}
