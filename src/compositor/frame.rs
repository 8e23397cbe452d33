//! Per-output frame scheduling
//!
//! A frame is rendered and submitted only when the previous one has been
//! presented, so the repaint cadence follows the display's refresh instead
//! of a timer. Requests made while a frame is in flight are coalesced.

use std::time::Duration;

use log::{trace, warn};

use crate::backend::{Backend, OutputHandle};
use crate::compositor::{NodeId, SceneGraph};
use crate::renderer::{RenderTarget, TargetId};

/// Where an output is in its render/present cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    /// Walking the scene into the render target
    Rendering,
    /// Submitted, waiting for the hardware to present it
    WaitingPresent,
}

/// Result of a frame request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A new frame was rendered and handed to the backend
    Submitted,
    /// A frame is already in flight; nothing was done
    Coalesced,
    /// The target is unusable or the backend refused the frame
    Failed,
}

/// Drives render -> submit -> present for one output
#[derive(Debug)]
pub struct FrameScheduler {
    handle: OutputHandle,
    target: TargetId,
    state: FrameState,
    last_presented: Option<Duration>,
    frames_submitted: u64,
    frames_presented: u64,
}

impl FrameScheduler {
    /// Create an idle scheduler bound to one render target
    pub fn new(handle: OutputHandle, target: TargetId) -> Self {
        Self {
            handle,
            target,
            state: FrameState::Idle,
            last_presented: None,
            frames_submitted: 0,
            frames_presented: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    /// Monotonic timestamp of the last completed presentation
    pub fn last_presented(&self) -> Option<Duration> {
        self.last_presented
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn in_flight(&self) -> bool {
        self.state != FrameState::Idle
    }

    /// Render the subtree at `root` into `target` and submit it, unless a
    /// frame is already in flight.
    pub fn request_frame(
        &mut self,
        scene: &SceneGraph,
        root: NodeId,
        target: &mut RenderTarget,
        backend: &mut dyn Backend,
    ) -> FrameOutcome {
        if self.state != FrameState::Idle {
            trace!("{:?}: frame already in flight, coalescing", self.handle);
            return FrameOutcome::Coalesced;
        }
        if !target.is_valid() || target.id() != self.target {
            warn!("{:?}: refusing to render into stale target", self.handle);
            return FrameOutcome::Failed;
        }
        debug_assert_eq!(
            self.frames_submitted, self.frames_presented,
            "second frame in flight on {:?}",
            self.handle
        );

        self.state = FrameState::Rendering;
        scene.render_into(root, target);

        match backend.submit_frame(self.handle, target) {
            Ok(()) => {
                self.state = FrameState::WaitingPresent;
                self.frames_submitted += 1;
                trace!(
                    "{:?}: submitted frame {}",
                    self.handle,
                    self.frames_submitted
                );
                FrameOutcome::Submitted
            }
            Err(e) => {
                warn!("{:?}: frame submission failed: {}", self.handle, e);
                self.state = FrameState::Idle;
                FrameOutcome::Failed
            }
        }
    }

    /// Handle a presentation-complete notification. Returns `true` if it
    /// finished this scheduler's in-flight frame; anything else (a stale
    /// target, nothing in flight) is ignored.
    pub fn presentation_complete(&mut self, target: TargetId, timestamp: Duration) -> bool {
        if target != self.target {
            trace!(
                "{:?}: ignoring completion for stale target {:?}",
                self.handle,
                target
            );
            return false;
        }
        if self.state != FrameState::WaitingPresent {
            trace!(
                "{:?}: ignoring completion while {:?}",
                self.handle,
                self.state
            );
            return false;
        }

        self.state = FrameState::Idle;
        self.frames_presented += 1;
        match self.last_presented {
            Some(previous) if timestamp < previous => {
                warn!(
                    "{:?}: presentation time went backwards ({:?} < {:?})",
                    self.handle, timestamp, previous
                );
            }
            _ => self.last_presented = Some(timestamp),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingBackend;
    use crate::compositor::{NodeKind, Size};

    fn setup() -> (SceneGraph, NodeId, RenderTarget, FrameScheduler) {
        let handle = OutputHandle(1);
        let mut scene = SceneGraph::new();
        let root = scene.create_output_root(handle);
        let rect = scene.create_node(NodeKind::Rect {
            size: Size {
                width: 10,
                height: 10,
            },
            color: [1.0; 4],
        });
        scene.attach_node(root, rect).unwrap();
        let target = RenderTarget::new(handle, 100, 100);
        let scheduler = FrameScheduler::new(handle, target.id());
        (scene, root, target, scheduler)
    }

    #[test]
    fn test_request_frame_submits_once() {
        let (scene, root, mut target, mut scheduler) = setup();
        let mut backend = RecordingBackend::new();

        assert_eq!(
            scheduler.request_frame(&scene, root, &mut target, &mut backend),
            FrameOutcome::Submitted
        );
        assert_eq!(scheduler.state(), FrameState::WaitingPresent);
        assert_eq!(target.commands().len(), 1);

        // Coalesced while waiting
        for _ in 0..3 {
            assert_eq!(
                scheduler.request_frame(&scene, root, &mut target, &mut backend),
                FrameOutcome::Coalesced
            );
        }
        assert_eq!(scheduler.frames_submitted(), 1);
        assert_eq!(backend.recording.borrow().submissions.len(), 1);
    }

    #[test]
    fn test_completion_returns_to_idle() {
        let (scene, root, mut target, mut scheduler) = setup();
        let mut backend = RecordingBackend::new();
        scheduler.request_frame(&scene, root, &mut target, &mut backend);

        assert!(scheduler.presentation_complete(target.id(), Duration::from_millis(16)));
        assert_eq!(scheduler.state(), FrameState::Idle);
        assert_eq!(scheduler.last_presented(), Some(Duration::from_millis(16)));

        // A duplicate completion is ignored
        assert!(!scheduler.presentation_complete(target.id(), Duration::from_millis(17)));
        assert_eq!(scheduler.frames_presented(), 1);

        assert_eq!(
            scheduler.request_frame(&scene, root, &mut target, &mut backend),
            FrameOutcome::Submitted
        );
        assert_eq!(scheduler.frames_submitted(), 2);
    }

    #[test]
    fn test_stale_target_completion_is_ignored() {
        let (scene, root, mut target, mut scheduler) = setup();
        let mut backend = RecordingBackend::new();
        scheduler.request_frame(&scene, root, &mut target, &mut backend);

        assert!(!scheduler.presentation_complete(TargetId(u64::MAX), Duration::ZERO));
        assert_eq!(scheduler.state(), FrameState::WaitingPresent);
    }

    #[test]
    fn test_invalid_target_is_not_rendered() {
        let (scene, root, mut target, mut scheduler) = setup();
        let mut backend = RecordingBackend::new();
        target.invalidate();

        assert_eq!(
            scheduler.request_frame(&scene, root, &mut target, &mut backend),
            FrameOutcome::Failed
        );
        assert_eq!(scheduler.state(), FrameState::Idle);
        assert!(backend.recording.borrow().submissions.is_empty());
    }

    #[test]
    fn test_submit_failure_allows_retry() {
        let (scene, root, mut target, mut scheduler) = setup();
        let mut backend = RecordingBackend::new();
        backend
            .recording
            .borrow_mut()
            .fail_submits
            .insert(OutputHandle(1));

        assert_eq!(
            scheduler.request_frame(&scene, root, &mut target, &mut backend),
            FrameOutcome::Failed
        );
        assert_eq!(scheduler.state(), FrameState::Idle);

        backend.recording.borrow_mut().fail_submits.clear();
        assert_eq!(
            scheduler.request_frame(&scene, root, &mut target, &mut backend),
            FrameOutcome::Submitted
        );
    }

    #[test]
    fn test_timestamps_stay_monotonic() {
        let (scene, root, mut target, mut scheduler) = setup();
        let mut backend = RecordingBackend::new();

        scheduler.request_frame(&scene, root, &mut target, &mut backend);
        scheduler.presentation_complete(target.id(), Duration::from_millis(50));
        scheduler.request_frame(&scene, root, &mut target, &mut backend);
        assert!(scheduler.presentation_complete(target.id(), Duration::from_millis(40)));

        assert_eq!(scheduler.last_presented(), Some(Duration::from_millis(50)));
        assert_eq!(scheduler.state(), FrameState::Idle);
    }
}
