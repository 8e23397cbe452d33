//! Harmony - output lifecycle and frame scheduling for a minimal compositor
//!
//! Harmony discovers display outputs as they come and go, negotiates a
//! mode for each, places them in a shared virtual layout and drives a
//! render/present loop per output in lockstep with the display refresh.
//!
//! # Architecture
//!
//! - **Event bus**: typed, synchronous publish/subscribe between the
//!   hardware backend and the core
//! - **Compositor core**: output registry, mode negotiation, layout, scene
//!   graph and frame schedulers
//! - **Backend**: the display hardware contract, a calloop event loop and a
//!   headless implementation
//! - **Renderer**: render targets carrying the paint list handed to the GPU
//!
//! # Example
//!
//! ```no_run
//! use harmony::backend::{EventLoop, HeadlessBackend};
//! use harmony::compositor::{Compositor, LayoutConfig, Mode};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut event_loop = EventLoop::<Compositor>::new()?;
//! let backend = HeadlessBackend::new(
//!     event_loop.handle(),
//!     &[vec![Mode::new(1920, 1080, 60_000)]],
//! );
//! let mut compositor = Compositor::new(Box::new(backend), LayoutConfig::default())?;
//! compositor.start()?;
//! event_loop.run(&mut compositor)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod compositor;
pub mod config;
pub mod event;
pub mod renderer;

use thiserror::Error;

/// Compositor startup failures
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Backend(#[from] backend::BackendError),
}
