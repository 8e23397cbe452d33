//! Virtual output layout
//!
//! Every active output owns one rectangle in a shared coordinate space.
//! New outputs are packed left to right unless configuration pins them to
//! a fixed position. Removing an output never moves the others.

use std::collections::HashMap;

use log::debug;

use crate::backend::OutputHandle;
use crate::compositor::Mode;

/// A rectangle in layout coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge
    pub fn right(&self) -> i32 {
        self.x
            .saturating_add(i32::try_from(self.width).unwrap_or(i32::MAX))
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i32 {
        self.y
            .saturating_add(i32::try_from(self.height).unwrap_or(i32::MAX))
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Layout settings coming from configuration
#[derive(Debug, Clone, Default)]
pub struct LayoutConfig {
    /// Fixed origins keyed by output name
    pub placements: HashMap<String, (i32, i32)>,
}

impl LayoutConfig {
    pub fn with_placement(mut self, name: impl Into<String>, x: i32, y: i32) -> Self {
        self.placements.insert(name.into(), (x, y));
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    area: Rect,
    explicit: bool,
}

/// Maps outputs to their rectangle in the virtual layout
#[derive(Debug, Default)]
pub struct OutputLayout {
    config: LayoutConfig,
    placements: HashMap<OutputHandle, Placement>,
    /// Insertion order, used for deterministic iteration
    order: Vec<OutputHandle>,
}

impl OutputLayout {
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            config,
            placements: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Place an output sized by `mode`.
    ///
    /// Explicit positions from the configuration are stored as given; the
    /// caller is responsible for keeping them disjoint. Otherwise the
    /// output goes to the right of everything already placed, at y = 0.
    /// Placing an output twice replaces its previous rectangle.
    pub fn place(&mut self, handle: OutputHandle, name: &str, mode: &Mode) -> Rect {
        self.remove(handle);

        let (area, explicit) = match self.config.placements.get(name) {
            Some(&(x, y)) => (Rect::new(x, y, mode.width, mode.height), true),
            None => {
                let x = self
                    .placements
                    .values()
                    .map(|p| p.area.right())
                    .max()
                    .unwrap_or(0);
                (Rect::new(x, 0, mode.width, mode.height), false)
            }
        };

        debug!(
            "Placed output {} at {},{} {}x{}{}",
            name,
            area.x,
            area.y,
            area.width,
            area.height,
            if explicit { " (explicit)" } else { "" }
        );

        self.placements.insert(handle, Placement { area, explicit });
        self.order.push(handle);
        area
    }

    /// Drop an output's rectangle. Remaining outputs keep their positions.
    pub fn remove(&mut self, handle: OutputHandle) -> Option<Rect> {
        let placement = self.placements.remove(&handle)?;
        self.order.retain(|h| *h != handle);
        Some(placement.area)
    }

    pub fn get(&self, handle: OutputHandle) -> Option<Rect> {
        self.placements.get(&handle).map(|p| p.area)
    }

    /// Whether the output's position came from configuration
    pub fn is_explicit(&self, handle: OutputHandle) -> bool {
        self.placements
            .get(&handle)
            .map(|p| p.explicit)
            .unwrap_or(false)
    }

    /// The output containing a layout point. When explicit placements
    /// overlap, the earliest placed output wins.
    pub fn output_at(&self, x: i32, y: i32) -> Option<OutputHandle> {
        self.iter()
            .find(|(_, area)| area.contains(x, y))
            .map(|(handle, _)| handle)
    }

    /// Translate a layout point into output-local coordinates
    pub fn to_output_local(&self, handle: OutputHandle, x: i32, y: i32) -> Option<(i32, i32)> {
        self.get(handle)
            .map(|area| (x.saturating_sub(area.x), y.saturating_sub(area.y)))
    }

    /// Bounding box of every placed output
    pub fn extents(&self) -> Option<Rect> {
        let mut areas = self.placements.values().map(|p| p.area);
        let first = areas.next()?;
        let (x0, y0, x1, y1) = areas.fold(
            (first.x, first.y, first.right(), first.bottom()),
            |(x0, y0, x1, y1), a| (x0.min(a.x), y0.min(a.y), x1.max(a.right()), y1.max(a.bottom())),
        );
        Some(Rect::new(x0, y0, x1.abs_diff(x0), y1.abs_diff(y0)))
    }

    /// Placements in the order they were made
    pub fn iter(&self) -> impl Iterator<Item = (OutputHandle, Rect)> + '_ {
        self.order
            .iter()
            .filter_map(move |h| self.placements.get(h).map(|p| (*h, p.area)))
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}
