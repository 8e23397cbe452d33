//! Harmony - output lifecycle and frame scheduling core
//!
//! This is the entry point: it brings up the event loop and a headless
//! backend, constructs the compositor core, then runs until stopped.

use calloop::timer::{TimeoutAction, Timer};
use log::{info, warn};

use harmony::backend::{EventLoop, HeadlessBackend};
use harmony::compositor::{Compositor, Mode, NodeKind, Size};
use harmony::config::Config;
use harmony::event::{Event, EventKind};

const BACKGROUND: [f32; 4] = [0.12, 0.12, 0.14, 1.0];

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    info!("Starting Harmony compositor");

    let mut event_loop = EventLoop::<Compositor>::new()?;

    let outputs: Vec<Vec<Mode>> = config.outputs.iter().map(|mode| vec![*mode]).collect();
    let backend = HeadlessBackend::new(event_loop.handle(), &outputs);
    let controller = backend.controller();

    let mut compositor = Compositor::new(Box::new(backend), config.layout_config())?;

    // Give every output a background so frames carry something to paint
    let handle = compositor.handle();
    compositor.subscribe(EventKind::OutputActivated, move |event| {
        let Event::OutputActivated {
            handle: output,
            mode,
            ..
        } = event
        else {
            return;
        };
        let Some(root) = handle.output_root(*output) else {
            return;
        };
        handle.with_scene(|scene| {
            let background = scene.create_node(NodeKind::Rect {
                size: Size {
                    width: mode.width,
                    height: mode.height,
                },
                color: BACKGROUND,
            });
            if let Err(e) = scene.attach_node(root, background) {
                warn!("Failed to attach background: {}", e);
            }
        });
    });

    compositor.start()?;

    if let Some(after) = config.exit_after {
        let signal = event_loop.signal();
        event_loop
            .handle()
            .insert_source(Timer::from_duration(after), move |_, _, _| {
                info!("Exit timer expired");
                signal.stop();
                TimeoutAction::Drop
            })
            .map_err(|e| anyhow::anyhow!("failed to arm exit timer: {}", e.error))?;
    }

    event_loop.run(&mut compositor)?;

    info!("Presented {} frame(s)", controller.frames_presented());
    compositor.shutdown();
    Ok(())
}
