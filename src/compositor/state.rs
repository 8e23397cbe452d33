//! Compositor context
//!
//! [`Compositor`] is the explicit context object tying the subsystems
//! together. Hardware notifications published on its bus are routed to
//! [`CompositorState`], which moves outputs through their lifecycle, places
//! them, gives them a scene root and drives their frame schedulers.
//!
//! Everything runs on the event loop thread. State handlers never publish
//! while holding the state borrowed: they return the notifications to emit
//! and the bus handler publishes them afterwards, so subscribers are free
//! to call back into the compositor.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::{debug, error, info, trace, warn};

use crate::backend::{Backend, BackendEventSink, OutputHandle};
use crate::compositor::{
    FrameOutcome, FrameScheduler, FrameState, LayoutConfig, ModeNegotiator, NodeId,
    OutputLayout, OutputLifecycle, OutputRegistry, SceneGraph,
};
use crate::event::{Event, EventBus, EventKind, SubscriptionId};
use crate::Error;

/// The state behind the compositor context
pub struct CompositorState {
    /// Attached outputs and their lifecycle
    pub outputs: OutputRegistry,
    /// Output placement in the virtual layout
    pub layout: OutputLayout,
    /// Render tree shared by every output
    pub scene: SceneGraph,
    negotiator: ModeNegotiator,
    schedulers: HashMap<OutputHandle, FrameScheduler>,
    backend: Box<dyn Backend>,
}

impl CompositorState {
    fn new(backend: Box<dyn Backend>, layout: LayoutConfig) -> Self {
        Self {
            outputs: OutputRegistry::new(),
            layout: OutputLayout::new(layout),
            scene: SceneGraph::new(),
            negotiator: ModeNegotiator::new(),
            schedulers: HashMap::new(),
            backend,
        }
    }

    /// Apply one hardware notification, returning the core notifications
    /// it produced
    fn handle_hardware_event(&mut self, event: &Event) -> Vec<Event> {
        match event {
            Event::OutputAttached(handle) => self.output_attached(*handle),
            Event::OutputModesChanged(handle) => self.output_modes_changed(*handle),
            Event::OutputDetached(handle) => self.remove_output(*handle),
            Event::PresentationComplete {
                handle,
                target,
                timestamp,
            } => {
                let Some(scheduler) = self.schedulers.get_mut(handle) else {
                    debug!("Late presentation for removed output {:?}", handle);
                    return Vec::new();
                };
                if !scheduler.presentation_complete(*target, *timestamp) {
                    return Vec::new();
                }
                self.request_frame(*handle);
                vec![Event::FrameDone {
                    handle: *handle,
                    timestamp: *timestamp,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn output_attached(&mut self, handle: OutputHandle) -> Vec<Event> {
        let Some(descriptor) = self.backend.describe_output(handle) else {
            warn!("Backend announced unknown output {:?}", handle);
            return Vec::new();
        };

        if let Some(output) = self.outputs.get(handle) {
            if output.lifecycle() != OutputLifecycle::Discovered {
                debug!(
                    "Ignoring attach for {} while {:?}",
                    output.name,
                    output.lifecycle()
                );
                return Vec::new();
            }
        }

        self.outputs.discover(handle, descriptor);
        self.configure(handle)
    }

    fn output_modes_changed(&mut self, handle: OutputHandle) -> Vec<Event> {
        let Some(output) = self.outputs.get_mut(handle) else {
            debug!("Mode change for unknown output {:?}", handle);
            return Vec::new();
        };
        if output.lifecycle() != OutputLifecycle::Discovered {
            debug!(
                "Ignoring mode change on {} while {:?}",
                output.name,
                output.lifecycle()
            );
            return Vec::new();
        }

        if let Some(descriptor) = self.backend.describe_output(handle) {
            output.update_descriptor(descriptor);
        }
        self.configure(handle)
    }

    /// Negotiate, commit, allocate and place a Discovered output
    fn configure(&mut self, handle: OutputHandle) -> Vec<Event> {
        let Some(output) = self.outputs.get(handle) else {
            return Vec::new();
        };
        let name = output.name.clone();

        let Some(chosen) = self
            .negotiator
            .choose_mode(&output.modes, output.last_known_mode)
        else {
            info!("Output {} has no usable mode, leaving it unconfigured", name);
            return Vec::new();
        };

        if !self.outputs.begin_configure(handle) {
            return Vec::new();
        }

        if self
            .negotiator
            .commit(&mut *self.backend, handle, chosen)
            .is_err()
        {
            self.outputs.configure_failed(handle);
            return vec![Event::ModeCommitFailed {
                handle,
                mode: chosen.mode,
            }];
        }

        let target = match self.backend.create_render_target(handle, chosen.mode) {
            Ok(target) => target,
            Err(e) => {
                error!("Output {} left inactive: {}", name, e);
                self.backend.release_output(handle);
                self.outputs.configure_failed(handle);
                return vec![Event::RenderTargetFailed { handle }];
            }
        };

        let area = self.layout.place(handle, &name, &chosen.mode);
        let root = self.scene.create_output_root(handle);
        self.schedulers
            .insert(handle, FrameScheduler::new(handle, target.id()));
        self.outputs
            .activate(handle, chosen.mode, area, root, target);

        info!(
            "Output {} active: {} at {},{}",
            name, chosen.mode, area.x, area.y
        );
        vec![Event::OutputActivated {
            handle,
            mode: chosen.mode,
            area,
        }]
    }

    /// Tear an output down: cancel its frames, invalidate its target, drop
    /// its placement and scene subtree, then forget it
    fn remove_output(&mut self, handle: OutputHandle) -> Vec<Event> {
        if let Some(scheduler) = self.schedulers.remove(&handle) {
            if scheduler.in_flight() {
                debug!("Cancelling in-flight frame on {:?}", handle);
            }
        }

        let Some(output) = self.outputs.remove(handle) else {
            debug!("Removal of unknown output {:?}", handle);
            return Vec::new();
        };

        self.layout.remove(handle);
        let released = self.scene.destroy_output_root(handle);
        if !released.is_empty() {
            debug!(
                "Output {} released {} buffer(s)",
                output.name,
                released.len()
            );
        }
        self.backend.release_output(handle);

        info!("Output {} removed", output.name);
        vec![Event::OutputRemoved {
            handle,
            name: output.name,
        }]
    }

    /// Ask for a frame on an active output
    pub fn request_frame(&mut self, handle: OutputHandle) -> FrameOutcome {
        let Self {
            outputs,
            scene,
            schedulers,
            backend,
            ..
        } = self;

        let Some(scheduler) = schedulers.get_mut(&handle) else {
            trace!("No frame scheduler for {:?}", handle);
            return FrameOutcome::Failed;
        };
        let Some(output) = outputs.get_mut(handle) else {
            return FrameOutcome::Failed;
        };
        let (Some(root), Some(target)) = (output.scene_root, output.render_target.as_mut()) else {
            return FrameOutcome::Failed;
        };

        scheduler.request_frame(scene, root, target, &mut **backend)
    }

    pub fn scheduler(&self, handle: OutputHandle) -> Option<&FrameScheduler> {
        self.schedulers.get(&handle)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

fn publish_all(bus: &EventBus<Event>, events: &[Event]) {
    for event in events {
        bus.publish(event);
    }
}

/// The compositor core
///
/// Construct it after the backend's renderer can be created and before the
/// backend starts emitting events; drop or [`shutdown`](Self::shutdown) it
/// before the backend goes away.
pub struct Compositor {
    bus: Rc<EventBus<Event>>,
    state: Rc<RefCell<CompositorState>>,
    subscriptions: Vec<SubscriptionId>,
}

impl Compositor {
    /// Create the compositor and register it for hardware notifications
    pub fn new(mut backend: Box<dyn Backend>, layout: LayoutConfig) -> Result<Self, Error> {
        backend.init_renderer()?;
        info!("Using {} backend", backend.name());

        let bus = Rc::new(EventBus::new());
        let state = Rc::new(RefCell::new(CompositorState::new(backend, layout)));

        let subscriptions = [
            EventKind::OutputAttached,
            EventKind::OutputModesChanged,
            EventKind::OutputDetached,
            EventKind::PresentationComplete,
        ]
        .into_iter()
        .map(|kind| {
            let state = Rc::downgrade(&state);
            let bus_ref = Rc::downgrade(&bus);
            bus.subscribe(kind, move |event| route_hardware_event(&state, &bus_ref, event))
        })
        .collect();

        Ok(Self {
            bus,
            state,
            subscriptions,
        })
    }

    /// Start the backend's event source
    pub fn start(&mut self) -> Result<(), Error> {
        self.state.borrow_mut().backend.start()?;
        Ok(())
    }

    /// Feed a hardware notification into the core
    pub fn dispatch(&self, event: Event) {
        trace!("Dispatching {:?}", event);
        self.bus.publish(&event);
    }

    /// The bus collaborators subscribe to
    pub fn bus(&self) -> &Rc<EventBus<Event>> {
        &self.bus
    }

    /// Shorthand for `bus().subscribe`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + 'static,
    {
        self.bus.subscribe(kind, handler)
    }

    /// A weak handle usable from inside event handlers
    pub fn handle(&self) -> CompositorHandle {
        CompositorHandle {
            state: Rc::downgrade(&self.state),
        }
    }

    pub fn state(&self) -> Ref<'_, CompositorState> {
        self.state.borrow()
    }

    pub fn outputs(&self) -> Ref<'_, OutputRegistry> {
        Ref::map(self.state.borrow(), |s| &s.outputs)
    }

    pub fn layout(&self) -> Ref<'_, OutputLayout> {
        Ref::map(self.state.borrow(), |s| &s.layout)
    }

    pub fn scene(&self) -> Ref<'_, SceneGraph> {
        Ref::map(self.state.borrow(), |s| &s.scene)
    }

    /// Mutable scene access for shell collaborators. Changes show up in
    /// the next frame of every output.
    pub fn scene_mut(&self) -> RefMut<'_, SceneGraph> {
        RefMut::map(self.state.borrow_mut(), |s| &mut s.scene)
    }

    pub fn output_root(&self, handle: OutputHandle) -> Option<NodeId> {
        self.state.borrow().scene.output_root(handle)
    }

    pub fn frame_state(&self, handle: OutputHandle) -> Option<FrameState> {
        self.state
            .borrow()
            .scheduler(handle)
            .map(|s| s.state())
    }

    /// Request a frame for one output; coalesced if one is in flight
    pub fn request_frame(&self, handle: OutputHandle) -> FrameOutcome {
        self.state.borrow_mut().request_frame(handle)
    }

    /// Remove every output and stop listening for hardware events
    pub fn shutdown(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        info!("Shutting down compositor");

        let mut handles: Vec<_> = self.state.borrow().outputs.iter().map(|(h, _)| *h).collect();
        handles.sort();
        for handle in handles {
            let events = self.state.borrow_mut().remove_output(handle);
            publish_all(&self.bus, &events);
        }

        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl BackendEventSink for Compositor {
    fn backend_event(&mut self, event: Event) {
        self.dispatch(event);
    }
}

fn route_hardware_event(
    state: &Weak<RefCell<CompositorState>>,
    bus: &Weak<EventBus<Event>>,
    event: &Event,
) {
    let (Some(state), Some(bus)) = (state.upgrade(), bus.upgrade()) else {
        return;
    };

    let events = state.borrow_mut().handle_hardware_event(event);
    publish_all(&bus, &events);

    // First frame goes out after activation listeners had a chance to
    // populate the output's scene root
    for event in &events {
        if let Event::OutputActivated { handle, .. } = event {
            state.borrow_mut().request_frame(*handle);
        }
    }
}

/// Weak reference to a [`Compositor`], for use inside bus handlers
#[derive(Clone)]
pub struct CompositorHandle {
    state: Weak<RefCell<CompositorState>>,
}

impl CompositorHandle {
    /// Run `f` against the scene graph, if the compositor is still alive
    pub fn with_scene<R>(&self, f: impl FnOnce(&mut SceneGraph) -> R) -> Option<R> {
        let state = self.state.upgrade()?;
        let mut state = state.borrow_mut();
        Some(f(&mut state.scene))
    }

    /// Run `f` against the output layout, if the compositor is still alive
    pub fn with_layout<R>(&self, f: impl FnOnce(&OutputLayout) -> R) -> Option<R> {
        let state = self.state.upgrade()?;
        let state = state.borrow();
        Some(f(&state.layout))
    }

    pub fn output_root(&self, handle: OutputHandle) -> Option<NodeId> {
        let state = self.state.upgrade()?;
        let root = state.borrow().scene.output_root(handle);
        root
    }

    pub fn request_frame(&self, handle: OutputHandle) -> Option<FrameOutcome> {
        let state = self.state.upgrade()?;
        let outcome = state.borrow_mut().request_frame(handle);
        Some(outcome)
    }
}
