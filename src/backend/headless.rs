//! Headless backend
//!
//! Virtual outputs without any display hardware. Presentation is paced by
//! calloop timers that fire one refresh interval after each submission,
//! which is enough to drive the frame scheduler the same way vblank would.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use calloop::timer::{TimeoutAction, Timer};
use calloop::LoopHandle;
use log::{debug, info, trace, warn};

use super::{
    Backend, BackendError, BackendEventSink, OutputDescriptor, OutputHandle,
    OutputStateDescriptor,
};
use crate::compositor::{Mode, ModeInfo};
use crate::event::Event;
use crate::renderer::RenderTarget;

/// Used when an output has not committed a mode with a known refresh rate
const FALLBACK_INTERVAL: Duration = Duration::from_micros(16_667);

#[derive(Debug)]
struct VirtualOutput {
    descriptor: OutputDescriptor,
    committed: Option<OutputStateDescriptor>,
}

#[derive(Debug, Default)]
struct Shared {
    outputs: HashMap<OutputHandle, VirtualOutput>,
    next_handle: u64,
    started: bool,
    frames_presented: u64,
}

impl Shared {
    fn add(&mut self, modes: &[Mode]) -> OutputHandle {
        self.next_handle += 1;
        let handle = OutputHandle(self.next_handle);

        // The first mode is the one the virtual monitor prefers
        let modes = modes
            .iter()
            .enumerate()
            .map(|(i, mode)| {
                if i == 0 {
                    ModeInfo::preferred(*mode)
                } else {
                    ModeInfo::new(*mode)
                }
            })
            .collect();

        self.outputs.insert(
            handle,
            VirtualOutput {
                descriptor: OutputDescriptor {
                    name: format!("HEADLESS-{}", handle.0),
                    make: "Harmony".to_string(),
                    model: "Virtual Display".to_string(),
                    modes,
                    current: None,
                },
                committed: None,
            },
        );
        handle
    }
}

/// Deliver attach notifications for `outputs`, in order, on the next loop
/// iteration. An immediate timer is a real event source, so a loop blocked
/// in `run` wakes up for it.
fn announce<D>(handle: &LoopHandle<'static, D>, outputs: Vec<OutputHandle>)
where
    D: BackendEventSink + 'static,
{
    let result = handle.insert_source(Timer::immediate(), move |_, _, data| {
        for output in &outputs {
            data.backend_event(Event::OutputAttached(*output));
        }
        TimeoutAction::Drop
    });
    if let Err(e) = result {
        warn!("Failed to queue output announcement: {}", e.error);
    }
}

/// Virtual display backend driven by a calloop event loop
pub struct HeadlessBackend<D: BackendEventSink + 'static> {
    shared: Rc<RefCell<Shared>>,
    handle: LoopHandle<'static, D>,
    epoch: Instant,
}

impl<D: BackendEventSink + 'static> HeadlessBackend<D> {
    /// Create a backend with one virtual output per entry of `outputs`.
    /// Each entry lists the modes of that output, preferred first.
    pub fn new(handle: LoopHandle<'static, D>, outputs: &[Vec<Mode>]) -> Self {
        let mut shared = Shared::default();
        for modes in outputs {
            shared.add(modes);
        }

        Self {
            shared: Rc::new(RefCell::new(shared)),
            handle,
            epoch: Instant::now(),
        }
    }

    /// Handle for plugging and unplugging outputs at runtime
    pub fn controller(&self) -> HeadlessController<D> {
        HeadlessController {
            shared: self.shared.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<D: BackendEventSink + 'static> Backend for HeadlessBackend<D> {
    fn name(&self) -> &str {
        "headless"
    }

    fn start(&mut self) -> Result<(), BackendError> {
        let mut shared = self.shared.borrow_mut();
        if shared.started {
            return Ok(());
        }
        shared.started = true;

        let mut handles: Vec<_> = shared.outputs.keys().copied().collect();
        handles.sort();
        info!("Starting headless backend with {} output(s)", handles.len());
        if !handles.is_empty() {
            announce(&self.handle, handles);
        }
        Ok(())
    }

    fn describe_output(&self, handle: OutputHandle) -> Option<OutputDescriptor> {
        self.shared
            .borrow()
            .outputs
            .get(&handle)
            .map(|o| o.descriptor.clone())
    }

    fn commit_output_state(
        &mut self,
        handle: OutputHandle,
        state: &OutputStateDescriptor,
    ) -> Result<(), BackendError> {
        let mut shared = self.shared.borrow_mut();
        let output = shared
            .outputs
            .get_mut(&handle)
            .ok_or(BackendError::UnknownOutput(handle))?;

        let advertised = output.descriptor.modes.iter().any(|m| m.mode == state.mode);
        if !advertised && !state.custom {
            return Err(BackendError::CommitRejected {
                handle,
                mode: state.mode,
            });
        }

        debug!("{}: committed {}", output.descriptor.name, state.mode);
        output.descriptor.current = state.enabled.then_some(state.mode);
        output.committed = Some(*state);
        Ok(())
    }

    fn create_render_target(
        &mut self,
        handle: OutputHandle,
        mode: Mode,
    ) -> Result<RenderTarget, BackendError> {
        let shared = self.shared.borrow();
        let output = shared
            .outputs
            .get(&handle)
            .ok_or(BackendError::UnknownOutput(handle))?;
        if output.committed.map(|c| c.mode) != Some(mode) {
            return Err(BackendError::RenderTarget {
                handle,
                reason: format!("mode {} is not committed", mode),
            });
        }
        Ok(RenderTarget::new(handle, mode.width, mode.height))
    }

    fn submit_frame(
        &mut self,
        handle: OutputHandle,
        target: &RenderTarget,
    ) -> Result<(), BackendError> {
        let interval = {
            let shared = self.shared.borrow();
            let output = shared
                .outputs
                .get(&handle)
                .ok_or(BackendError::UnknownOutput(handle))?;
            output
                .committed
                .and_then(|c| c.mode.frame_interval())
                .unwrap_or(FALLBACK_INTERVAL)
        };

        trace!(
            "{:?}: presenting {} paint command(s) in {:?}",
            handle,
            target.commands().len(),
            interval
        );

        let target_id = target.id();
        let epoch = self.epoch;
        let shared = self.shared.clone();
        self.handle
            .insert_source(Timer::from_duration(interval), move |deadline, _, data| {
                shared.borrow_mut().frames_presented += 1;
                data.backend_event(Event::PresentationComplete {
                    handle,
                    target: target_id,
                    timestamp: deadline.saturating_duration_since(epoch),
                });
                TimeoutAction::Drop
            })
            .map_err(|e| BackendError::Submit {
                handle,
                reason: e.error.to_string(),
            })?;
        Ok(())
    }

    fn release_output(&mut self, handle: OutputHandle) {
        if let Some(output) = self.shared.borrow_mut().outputs.get_mut(&handle) {
            output.committed = None;
            output.descriptor.current = None;
        }
    }
}

/// Runtime hotplug for a [`HeadlessBackend`]
pub struct HeadlessController<D: BackendEventSink + 'static> {
    shared: Rc<RefCell<Shared>>,
    handle: LoopHandle<'static, D>,
}

impl<D: BackendEventSink + 'static> HeadlessController<D> {
    /// Connect a new virtual output. It is announced on the next loop
    /// iteration if the backend has been started.
    pub fn plug_output(&self, modes: &[Mode]) -> OutputHandle {
        let mut shared = self.shared.borrow_mut();
        let output = shared.add(modes);
        if shared.started {
            announce(&self.handle, vec![output]);
        }
        output
    }

    /// Disconnect a virtual output. Its removal is delivered before the
    /// backend forgets about it.
    pub fn unplug_output(&self, output: OutputHandle) {
        if !self.shared.borrow().outputs.contains_key(&output) {
            warn!("Cannot unplug unknown output {:?}", output);
            return;
        }
        let shared = self.shared.clone();
        let result = self
            .handle
            .insert_source(Timer::immediate(), move |_, _, data| {
                data.backend_event(Event::OutputDetached(output));
                shared.borrow_mut().outputs.remove(&output);
                TimeoutAction::Drop
            });
        if let Err(e) = result {
            warn!("Failed to queue removal of {:?}: {}", output, e.error);
        }
    }

    /// Handles of every connected virtual output
    pub fn outputs(&self) -> Vec<OutputHandle> {
        let mut handles: Vec<_> = self.shared.borrow().outputs.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Number of presentation completions delivered so far
    pub fn frames_presented(&self) -> u64 {
        self.shared.borrow().frames_presented
    }
}

impl<D: BackendEventSink + 'static> Clone for HeadlessController<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            handle: self.handle.clone(),
        }
    }
}
