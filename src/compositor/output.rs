//! Output registry
//!
//! This module tracks attached displays and their lifecycle. Outputs are
//! keyed by the backend's hardware handle, so removing an output
//! invalidates the key instead of leaving a dangling reference behind.

use std::collections::HashMap;

use log::{debug, info};

use crate::backend::{OutputDescriptor, OutputHandle};
use crate::compositor::{Mode, ModeInfo, NodeId, Rect};
use crate::renderer::RenderTarget;

/// Lifecycle of an output
///
/// ```text
/// Discovered -> Configuring -> Active -> Removed
///      ^             |
///      +-------------+  (commit rejected)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLifecycle {
    #[default]
    Discovered,
    Configuring,
    Active,
    Removed,
}

impl OutputLifecycle {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: OutputLifecycle) -> bool {
        use OutputLifecycle::*;
        matches!(
            (self, next),
            (Discovered, Configuring)
                | (Configuring, Active)
                | (Configuring, Discovered)
                | (Discovered, Removed)
                | (Configuring, Removed)
                | (Active, Removed)
        )
    }
}

/// A display output (monitor)
#[derive(Debug)]
pub struct Output {
    /// Hardware handle, unique while attached
    pub handle: OutputHandle,
    /// Output name (e.g., "eDP-1")
    pub name: String,
    /// Manufacturer name
    pub make: String,
    /// Model name
    pub model: String,
    /// Modes advertised by the hardware
    pub modes: Vec<ModeInfo>,
    /// What the hardware was driving when it was attached
    pub last_known_mode: Option<Mode>,
    /// Committed mode, set once the output is active
    pub current_mode: Option<Mode>,
    /// Position in the virtual layout
    pub area: Option<Rect>,
    /// Per-output root of the scene graph
    pub scene_root: Option<NodeId>,
    /// Render target allocated after the mode commit
    pub render_target: Option<RenderTarget>,
    lifecycle: OutputLifecycle,
}

impl Output {
    /// Create a new output in the Discovered state
    pub fn new(handle: OutputHandle, descriptor: OutputDescriptor) -> Self {
        Self {
            handle,
            name: descriptor.name,
            make: descriptor.make,
            model: descriptor.model,
            modes: descriptor.modes,
            last_known_mode: descriptor.current,
            current_mode: None,
            area: None,
            scene_root: None,
            render_target: None,
            lifecycle: OutputLifecycle::Discovered,
        }
    }

    pub fn lifecycle(&self) -> OutputLifecycle {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == OutputLifecycle::Active
    }

    /// Get current width
    pub fn width(&self) -> u32 {
        self.current_mode.map(|m| m.width).unwrap_or(0)
    }

    /// Get current height
    pub fn height(&self) -> u32 {
        self.current_mode.map(|m| m.height).unwrap_or(0)
    }

    /// Refresh what the hardware advertises
    pub fn update_descriptor(&mut self, descriptor: OutputDescriptor) {
        self.make = descriptor.make;
        self.model = descriptor.model;
        self.modes = descriptor.modes;
        if descriptor.current.is_some() {
            self.last_known_mode = descriptor.current;
        }
    }

    fn transition(&mut self, next: OutputLifecycle) {
        debug_assert!(
            self.lifecycle.can_transition_to(next),
            "illegal output transition {:?} -> {:?}",
            self.lifecycle,
            next
        );
        debug!("Output {}: {:?} -> {:?}", self.name, self.lifecycle, next);
        self.lifecycle = next;
    }
}

/// Owner of every attached output
#[derive(Debug, Default)]
pub struct OutputRegistry {
    outputs: HashMap<OutputHandle, Output>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
        }
    }

    /// Record a newly attached output in the Discovered state.
    ///
    /// A handle that is already known is not duplicated: its descriptor is
    /// refreshed and the existing output is returned.
    pub fn discover(&mut self, handle: OutputHandle, descriptor: OutputDescriptor) -> &mut Output {
        use std::collections::hash_map::Entry;

        match self.outputs.entry(handle) {
            Entry::Occupied(entry) => {
                let output = entry.into_mut();
                debug!("Output {} re-announced while {:?}", output.name, output.lifecycle);
                output.update_descriptor(descriptor);
                output
            }
            Entry::Vacant(entry) => {
                info!("New output {} ({:?})", descriptor.name, handle);
                entry.insert(Output::new(handle, descriptor))
            }
        }
    }

    /// Discovered -> Configuring. Returns `false` from any other state.
    pub fn begin_configure(&mut self, handle: OutputHandle) -> bool {
        match self.outputs.get_mut(&handle) {
            Some(output) if output.lifecycle == OutputLifecycle::Discovered => {
                output.transition(OutputLifecycle::Configuring);
                true
            }
            _ => false,
        }
    }

    /// Configuring -> Discovered, clearing anything half-configured
    pub fn configure_failed(&mut self, handle: OutputHandle) {
        if let Some(output) = self.outputs.get_mut(&handle) {
            if output.lifecycle == OutputLifecycle::Configuring {
                output.current_mode = None;
                output.render_target = None;
                output.transition(OutputLifecycle::Discovered);
            }
        }
    }

    /// Configuring -> Active
    pub fn activate(
        &mut self,
        handle: OutputHandle,
        mode: Mode,
        area: Rect,
        scene_root: NodeId,
        render_target: RenderTarget,
    ) -> bool {
        match self.outputs.get_mut(&handle) {
            Some(output) if output.lifecycle == OutputLifecycle::Configuring => {
                output.current_mode = Some(mode);
                output.area = Some(area);
                output.scene_root = Some(scene_root);
                output.render_target = Some(render_target);
                output.transition(OutputLifecycle::Active);
                true
            }
            _ => false,
        }
    }

    /// Take an output out of the registry, marking it Removed.
    ///
    /// Its render target is invalidated before it is handed back.
    pub fn remove(&mut self, handle: OutputHandle) -> Option<Output> {
        let mut output = self.outputs.remove(&handle)?;
        if let Some(target) = output.render_target.as_mut() {
            target.invalidate();
        }
        output.transition(OutputLifecycle::Removed);
        Some(output)
    }

    /// Get an output by handle
    pub fn get(&self, handle: OutputHandle) -> Option<&Output> {
        self.outputs.get(&handle)
    }

    /// Get a mutable output by handle
    pub fn get_mut(&mut self, handle: OutputHandle) -> Option<&mut Output> {
        self.outputs.get_mut(&handle)
    }

    pub fn contains(&self, handle: OutputHandle) -> bool {
        self.outputs.contains_key(&handle)
    }

    /// Get all outputs
    pub fn iter(&self) -> impl Iterator<Item = (&OutputHandle, &Output)> {
        self.outputs.iter()
    }

    /// Handles of every active output
    pub fn active(&self) -> impl Iterator<Item = OutputHandle> + '_ {
        self.outputs
            .values()
            .filter(|o| o.is_active())
            .map(|o| o.handle)
    }

    /// Get count of outputs
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::SceneGraph;

    fn descriptor(name: &str) -> OutputDescriptor {
        OutputDescriptor {
            name: name.to_string(),
            make: "Test".to_string(),
            model: "Monitor".to_string(),
            modes: vec![ModeInfo::preferred(Mode::new(1920, 1080, 60_000))],
            current: None,
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        use OutputLifecycle::*;
        assert!(Discovered.can_transition_to(Configuring));
        assert!(Configuring.can_transition_to(Active));
        assert!(Configuring.can_transition_to(Discovered));
        assert!(Active.can_transition_to(Removed));
        assert!(!Active.can_transition_to(Configuring));
        assert!(!Removed.can_transition_to(Discovered));
        assert!(!Removed.can_transition_to(Active));
        assert!(!Discovered.can_transition_to(Active));
    }

    #[test]
    fn test_discover_is_unique_per_handle() {
        let mut registry = OutputRegistry::new();
        registry.discover(OutputHandle(1), descriptor("A"));
        registry.discover(OutputHandle(1), descriptor("A"));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(OutputHandle(1)).unwrap().lifecycle(),
            OutputLifecycle::Discovered
        );
    }

    #[test]
    fn test_configure_and_activate() {
        let mut registry = OutputRegistry::new();
        let mut scene = SceneGraph::new();
        let handle = OutputHandle(1);
        let mode = Mode::new(1920, 1080, 60_000);

        registry.discover(handle, descriptor("A"));
        assert!(registry.begin_configure(handle));
        assert!(!registry.begin_configure(handle));

        let root = scene.create_output_root(handle);
        let target = RenderTarget::new(handle, mode.width, mode.height);
        assert!(registry.activate(handle, mode, Rect::new(0, 0, 1920, 1080), root, target));

        let output = registry.get(handle).unwrap();
        assert!(output.is_active());
        assert_eq!(output.width(), 1920);
        assert_eq!(registry.active().collect::<Vec<_>>(), vec![handle]);
    }

    #[test]
    fn test_failed_configure_returns_to_discovered() {
        let mut registry = OutputRegistry::new();
        let handle = OutputHandle(2);
        registry.discover(handle, descriptor("B"));
        registry.begin_configure(handle);
        registry.configure_failed(handle);

        let output = registry.get(handle).unwrap();
        assert_eq!(output.lifecycle(), OutputLifecycle::Discovered);
        assert!(output.current_mode.is_none());
        assert!(registry.begin_configure(handle));
    }

    #[test]
    fn test_remove_invalidates_target() {
        let mut registry = OutputRegistry::new();
        let mut scene = SceneGraph::new();
        let handle = OutputHandle(3);
        let mode = Mode::new(800, 600, 60_000);

        registry.discover(handle, descriptor("C"));
        registry.begin_configure(handle);
        let root = scene.create_output_root(handle);
        registry.activate(
            handle,
            mode,
            Rect::new(0, 0, 800, 600),
            root,
            RenderTarget::new(handle, 800, 600),
        );

        let removed = registry.remove(handle).unwrap();
        assert_eq!(removed.lifecycle(), OutputLifecycle::Removed);
        assert!(!removed.render_target.as_ref().unwrap().is_valid());
        assert!(registry.get(handle).is_none());
        assert!(registry.remove(handle).is_none());
    }
}
