//! Event routing
//!
//! Hardware notifications and core lifecycle notifications both travel
//! over a single [`EventBus<Event>`].

mod bus;

use std::time::Duration;

use crate::backend::OutputHandle;
use crate::compositor::{Mode, Rect};
use crate::renderer::TargetId;

pub use bus::{BusEvent, EventBus, SubscriptionId};

/// Event discriminant used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OutputAttached,
    OutputModesChanged,
    OutputDetached,
    PresentationComplete,
    OutputActivated,
    ModeCommitFailed,
    RenderTargetFailed,
    OutputRemoved,
    FrameDone,
}

/// Everything that flows over the compositor's bus
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Hardware: a new output was connected
    OutputAttached(OutputHandle),
    /// Hardware: the set of supported modes of an output changed
    OutputModesChanged(OutputHandle),
    /// Hardware: an output is about to go away
    OutputDetached(OutputHandle),
    /// Hardware: a submitted frame reached the screen
    PresentationComplete {
        handle: OutputHandle,
        target: TargetId,
        timestamp: Duration,
    },
    /// Core: an output committed a mode and has a place in the layout
    OutputActivated {
        handle: OutputHandle,
        mode: Mode,
        area: Rect,
    },
    /// Core: the hardware rejected a mode; the output stays inactive
    ModeCommitFailed { handle: OutputHandle, mode: Mode },
    /// Core: no render target could be allocated for an output
    RenderTargetFailed { handle: OutputHandle },
    /// Core: an output was torn down
    OutputRemoved { handle: OutputHandle, name: String },
    /// Core: repaint done for one output
    FrameDone {
        handle: OutputHandle,
        timestamp: Duration,
    },
}

impl BusEvent for Event {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            Event::OutputAttached(_) => EventKind::OutputAttached,
            Event::OutputModesChanged(_) => EventKind::OutputModesChanged,
            Event::OutputDetached(_) => EventKind::OutputDetached,
            Event::PresentationComplete { .. } => EventKind::PresentationComplete,
            Event::OutputActivated { .. } => EventKind::OutputActivated,
            Event::ModeCommitFailed { .. } => EventKind::ModeCommitFailed,
            Event::RenderTargetFailed { .. } => EventKind::RenderTargetFailed,
            Event::OutputRemoved { .. } => EventKind::OutputRemoved,
            Event::FrameDone { .. } => EventKind::FrameDone,
        }
    }
}

impl Event {
    /// The output this event concerns
    pub fn handle(&self) -> OutputHandle {
        match self {
            Event::OutputAttached(handle)
            | Event::OutputModesChanged(handle)
            | Event::OutputDetached(handle) => *handle,
            Event::PresentationComplete { handle, .. }
            | Event::OutputActivated { handle, .. }
            | Event::ModeCommitFailed { handle, .. }
            | Event::RenderTargetFailed { handle }
            | Event::OutputRemoved { handle, .. }
            | Event::FrameDone { handle, .. } => *handle,
        }
    }

    /// Whether this event originates from the hardware backend
    pub fn is_hardware(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::OutputAttached
                | EventKind::OutputModesChanged
                | EventKind::OutputDetached
                | EventKind::PresentationComplete
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_and_handle() {
        let handle = OutputHandle(4);
        let event = Event::PresentationComplete {
            handle,
            target: TargetId(1),
            timestamp: Duration::from_millis(16),
        };
        assert_eq!(event.kind(), EventKind::PresentationComplete);
        assert_eq!(event.handle(), handle);
        assert!(event.is_hardware());

        let removed = Event::OutputRemoved {
            handle,
            name: "HEADLESS-1".to_string(),
        };
        assert_eq!(removed.kind(), EventKind::OutputRemoved);
        assert!(!removed.is_hardware());
    }
}
