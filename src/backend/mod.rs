//! Backend module
//!
//! This module contains the hardware side of the compositor:
//! - The [`Backend`] trait the core drives outputs through
//! - Event loop integration with calloop
//! - A headless backend that paces frames with timers

pub mod event_loop;
pub mod headless;
#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

use crate::compositor::{Mode, ModeInfo};
use crate::event::Event;
use crate::renderer::RenderTarget;

pub use event_loop::EventLoop;
pub use headless::{HeadlessBackend, HeadlessController};

/// Hardware handle of an output, assigned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputHandle(pub u64);

/// What the hardware reports about an output
#[derive(Debug, Clone, Default)]
pub struct OutputDescriptor {
    /// Connector name (e.g., "DP-1")
    pub name: String,
    pub make: String,
    pub model: String,
    /// Advertised modes, in enumeration order
    pub modes: Vec<ModeInfo>,
    /// The mode the hardware is driving right now, if any
    pub current: Option<Mode>,
}

/// State submitted to an output in one atomic commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputStateDescriptor {
    pub enabled: bool,
    pub mode: Mode,
    /// `mode` is not one of the advertised modes
    pub custom: bool,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("output {0:?} is not known to the backend")]
    UnknownOutput(OutputHandle),
    #[error("output {handle:?} rejected mode {mode}")]
    CommitRejected { handle: OutputHandle, mode: Mode },
    #[error("failed to allocate render target for {handle:?}: {reason}")]
    RenderTarget {
        handle: OutputHandle,
        reason: String,
    },
    #[error("failed to submit frame to {handle:?}: {reason}")]
    Submit {
        handle: OutputHandle,
        reason: String,
    },
    #[error("failed to create renderer: {0}")]
    Renderer(String),
    #[error("event loop error: {0}")]
    EventLoop(String),
}

/// Receiver of hardware notifications inside the event loop
pub trait BackendEventSink {
    fn backend_event(&mut self, event: Event);
}

/// Display hardware as seen by the core.
///
/// Backends report `OutputAttached`, `OutputModesChanged`, `OutputDetached`
/// and `PresentationComplete` through the event loop; the core calls back
/// into the methods below.
pub trait Backend {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Create the rendering and allocation context. Failure is fatal.
    fn init_renderer(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Start emitting hardware events
    fn start(&mut self) -> Result<(), BackendError>;

    /// Describe an attached output
    fn describe_output(&self, handle: OutputHandle) -> Option<OutputDescriptor>;

    /// Apply `state` atomically. Nothing changes on error.
    fn commit_output_state(
        &mut self,
        handle: OutputHandle,
        state: &OutputStateDescriptor,
    ) -> Result<(), BackendError>;

    /// Allocate a render target matching a committed mode
    fn create_render_target(
        &mut self,
        handle: OutputHandle,
        mode: Mode,
    ) -> Result<RenderTarget, BackendError>;

    /// Queue a rendered frame for presentation. The backend answers with
    /// `PresentationComplete` for `target.id()` once it is on screen.
    fn submit_frame(
        &mut self,
        handle: OutputHandle,
        target: &RenderTarget,
    ) -> Result<(), BackendError>;

    /// The core no longer uses this output
    fn release_output(&mut self, _handle: OutputHandle) {}
}
