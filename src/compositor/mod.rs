//! Compositor core module
//!
//! This module contains the output lifecycle and frame scheduling logic:
//! - Output registry and lifecycle state machine
//! - Mode negotiation
//! - Virtual output layout
//! - Scene graph
//! - Per-output frame scheduling
//! - The compositor context wiring them to the event bus

pub mod frame;
pub mod layout;
pub mod mode;
pub mod output;
pub mod scene;
pub mod state;

pub use frame::{FrameOutcome, FrameScheduler, FrameState};
pub use layout::{LayoutConfig, OutputLayout, Rect};
pub use mode::{ChosenMode, Mode, ModeFlags, ModeInfo, ModeNegotiator, ModeParseError};
pub use output::{Output, OutputLifecycle, OutputRegistry};
pub use scene::{BufferId, BufferRef, NodeId, NodeKind, SceneError, SceneGraph, SceneNode, Size};
pub use state::{Compositor, CompositorHandle, CompositorState};
