//! Recording backend for unit tests

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::{Backend, BackendError, OutputDescriptor, OutputHandle, OutputStateDescriptor};
use crate::compositor::Mode;
use crate::renderer::{RenderTarget, TargetId};

#[derive(Debug, Clone)]
pub(crate) struct Submission {
    pub handle: OutputHandle,
    pub target: TargetId,
    pub commands: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Recording {
    pub outputs: HashMap<OutputHandle, OutputDescriptor>,
    pub commits: Vec<(OutputHandle, OutputStateDescriptor)>,
    pub submissions: Vec<Submission>,
    pub released: Vec<OutputHandle>,
    pub reject_commits: HashSet<OutputHandle>,
    pub fail_targets: HashSet<OutputHandle>,
    pub fail_submits: HashSet<OutputHandle>,
    pub fail_renderer: bool,
    pub started: bool,
}

impl Recording {
    pub fn submissions_for(&self, handle: OutputHandle) -> usize {
        self.submissions.iter().filter(|s| s.handle == handle).count()
    }

    pub fn last_target(&self, handle: OutputHandle) -> Option<TargetId> {
        self.submissions
            .iter()
            .rev()
            .find(|s| s.handle == handle)
            .map(|s| s.target)
    }
}

/// Backend that accepts everything unless told otherwise and remembers
/// what the core asked of it
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingBackend {
    pub recording: Rc<RefCell<Recording>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_output(&self, handle: OutputHandle, descriptor: OutputDescriptor) {
        self.recording
            .borrow_mut()
            .outputs
            .insert(handle, descriptor);
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn init_renderer(&mut self) -> Result<(), BackendError> {
        if self.recording.borrow().fail_renderer {
            return Err(BackendError::Renderer("no GPU".to_string()));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), BackendError> {
        self.recording.borrow_mut().started = true;
        Ok(())
    }

    fn describe_output(&self, handle: OutputHandle) -> Option<OutputDescriptor> {
        self.recording.borrow().outputs.get(&handle).cloned()
    }

    fn commit_output_state(
        &mut self,
        handle: OutputHandle,
        state: &OutputStateDescriptor,
    ) -> Result<(), BackendError> {
        let mut recording = self.recording.borrow_mut();
        recording.commits.push((handle, *state));
        if recording.reject_commits.contains(&handle) {
            return Err(BackendError::CommitRejected {
                handle,
                mode: state.mode,
            });
        }
        Ok(())
    }

    fn create_render_target(
        &mut self,
        handle: OutputHandle,
        mode: Mode,
    ) -> Result<RenderTarget, BackendError> {
        if self.recording.borrow().fail_targets.contains(&handle) {
            return Err(BackendError::RenderTarget {
                handle,
                reason: "out of memory".to_string(),
            });
        }
        Ok(RenderTarget::new(handle, mode.width, mode.height))
    }

    fn submit_frame(
        &mut self,
        handle: OutputHandle,
        target: &RenderTarget,
    ) -> Result<(), BackendError> {
        let mut recording = self.recording.borrow_mut();
        if recording.fail_submits.contains(&handle) {
            return Err(BackendError::Submit {
                handle,
                reason: "device lost".to_string(),
            });
        }
        recording.submissions.push(Submission {
            handle,
            target: target.id(),
            commands: target.commands().len(),
        });
        Ok(())
    }

    fn release_output(&mut self, handle: OutputHandle) {
        self.recording.borrow_mut().released.push(handle);
    }
}
