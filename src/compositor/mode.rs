//! Display modes and mode negotiation
//!
//! A [`Mode`] is an immutable (width, height, refresh) triple. The
//! [`ModeNegotiator`] picks one mode out of what the hardware advertises
//! and commits it to the output in a single state submission.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use log::{debug, warn};
use thiserror::Error;

use crate::backend::{Backend, BackendError, OutputHandle, OutputStateDescriptor};

/// An output mode (resolution + refresh rate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Refresh rate in mHz (e.g., 60000 for 60Hz)
    pub refresh: u32,
}

impl Mode {
    pub const fn new(width: u32, height: u32, refresh: u32) -> Self {
        Self {
            width,
            height,
            refresh,
        }
    }

    /// Duration of one refresh cycle, if the refresh rate is known
    pub fn frame_interval(&self) -> Option<std::time::Duration> {
        if self.refresh == 0 {
            return None;
        }
        Some(std::time::Duration::from_nanos(
            1_000_000_000_000 / u64::from(self.refresh),
        ))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.refresh % 1000 == 0 {
            write!(f, "{}x{}@{}", self.width, self.height, self.refresh / 1000)
        } else {
            write!(
                f,
                "{}x{}@{}.{:03}",
                self.width,
                self.height,
                self.refresh / 1000,
                self.refresh % 1000
            )
        }
    }
}

/// Error parsing a mode string such as `1920x1080@60`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeParseError {
    #[error("missing 'x' between width and height in {0:?}")]
    MissingSeparator(String),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("mode dimensions must be non-zero in {0:?}")]
    ZeroSize(String),
}

impl FromStr for Mode {
    type Err = ModeParseError;

    /// Parses `WIDTHxHEIGHT[@HZ]`. Fractional rates such as `59.94` are
    /// accepted; a missing rate defaults to 60Hz.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (size, rate) = match s.split_once('@') {
            Some((size, rate)) => (size, Some(rate)),
            None => (s, None),
        };
        let (w, h) = size
            .split_once('x')
            .ok_or_else(|| ModeParseError::MissingSeparator(s.to_string()))?;

        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| ModeParseError::InvalidNumber(v.to_string()))
        };
        let width = parse(w)?;
        let height = parse(h)?;
        if width == 0 || height == 0 {
            return Err(ModeParseError::ZeroSize(s.to_string()));
        }

        let refresh = match rate {
            Some(rate) => {
                let hz = rate
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ModeParseError::InvalidNumber(rate.to_string()))?;
                if !hz.is_finite() || hz < 0.0 || hz > f64::from(u32::MAX / 1000) {
                    return Err(ModeParseError::InvalidNumber(rate.to_string()));
                }
                (hz * 1000.0).round() as u32
            }
            None => 60_000,
        };

        Ok(Mode::new(width, height, refresh))
    }
}

bitflags! {
    /// Flags attached to an advertised mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u32 {
        /// The mode the hardware is currently driving
        const CURRENT = 0x1;
        /// The mode the hardware recommends
        const PREFERRED = 0x2;
    }
}

/// A mode as advertised by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeInfo {
    pub mode: Mode,
    pub flags: ModeFlags,
}

impl ModeInfo {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            flags: ModeFlags::empty(),
        }
    }

    pub fn preferred(mode: Mode) -> Self {
        Self {
            mode,
            flags: ModeFlags::PREFERRED,
        }
    }

    pub fn is_preferred(&self) -> bool {
        self.flags.contains(ModeFlags::PREFERRED)
    }
}

/// Outcome of mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChosenMode {
    pub mode: Mode,
    /// The mode was not in the advertised list
    pub custom: bool,
}

/// Picks and commits display modes
#[derive(Debug, Default)]
pub struct ModeNegotiator;

impl ModeNegotiator {
    pub fn new() -> Self {
        Self
    }

    /// Choose a mode from the advertised candidates.
    ///
    /// The preferred mode wins. Without one, the last enumerated candidate
    /// is used. With no candidates at all, `last_known` (what the hardware
    /// was driving before we saw it) is reused as a custom mode. If none of
    /// these exist the output is left unconfigured.
    pub fn choose_mode(
        &self,
        candidates: &[ModeInfo],
        last_known: Option<Mode>,
    ) -> Option<ChosenMode> {
        if let Some(info) = candidates.iter().find(|m| m.is_preferred()) {
            return Some(ChosenMode {
                mode: info.mode,
                custom: false,
            });
        }

        if let Some(info) = candidates.last() {
            debug!("No preferred mode, falling back to {}", info.mode);
            return Some(ChosenMode {
                mode: info.mode,
                custom: false,
            });
        }

        last_known.map(|mode| {
            debug!("No advertised modes, using custom mode {}", mode);
            ChosenMode { mode, custom: true }
        })
    }

    /// Submit `enabled = true, mode = chosen` to the output in one commit
    pub fn commit(
        &self,
        backend: &mut dyn Backend,
        handle: OutputHandle,
        chosen: ChosenMode,
    ) -> Result<(), BackendError> {
        let state = OutputStateDescriptor {
            enabled: true,
            mode: chosen.mode,
            custom: chosen.custom,
        };
        backend.commit_output_state(handle, &state).inspect_err(|e| {
            warn!("Output {:?} rejected mode {}: {}", handle, chosen.mode, e);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FHD: Mode = Mode::new(1920, 1080, 60_000);
    const HD: Mode = Mode::new(1280, 720, 60_000);

    #[test]
    fn test_preferred_mode_wins() {
        let negotiator = ModeNegotiator::new();
        let candidates = [ModeInfo::preferred(FHD), ModeInfo::new(HD)];
        let chosen = negotiator.choose_mode(&candidates, None).unwrap();
        assert_eq!(chosen.mode, FHD);
        assert!(!chosen.custom);
    }

    #[test]
    fn test_preferred_mode_not_first() {
        let negotiator = ModeNegotiator::new();
        let candidates = [ModeInfo::new(FHD), ModeInfo::preferred(HD)];
        assert_eq!(negotiator.choose_mode(&candidates, None).unwrap().mode, HD);
    }

    #[test]
    fn test_no_preferred_uses_last_candidate() {
        let negotiator = ModeNegotiator::new();
        let candidates = [ModeInfo::new(FHD), ModeInfo::new(HD)];
        assert_eq!(negotiator.choose_mode(&candidates, None).unwrap().mode, HD);
    }

    #[test]
    fn test_empty_candidates_use_last_known_as_custom() {
        let negotiator = ModeNegotiator::new();
        let chosen = negotiator.choose_mode(&[], Some(HD)).unwrap();
        assert_eq!(chosen.mode, HD);
        assert!(chosen.custom);
    }

    #[test]
    fn test_nothing_to_choose() {
        let negotiator = ModeNegotiator::new();
        assert!(negotiator.choose_mode(&[], None).is_none());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("1920x1080@60".parse::<Mode>(), Ok(FHD));
        assert_eq!("1280x720".parse::<Mode>(), Ok(HD));
        assert_eq!(
            "2560x1440@59.951".parse::<Mode>().unwrap().refresh,
            59_951
        );
        assert!(matches!(
            "1920-1080".parse::<Mode>(),
            Err(ModeParseError::MissingSeparator(_))
        ));
        assert!(matches!(
            "0x1080@60".parse::<Mode>(),
            Err(ModeParseError::ZeroSize(_))
        ));
        assert!(matches!(
            "axb@60".parse::<Mode>(),
            Err(ModeParseError::InvalidNumber(_))
        ));
        assert!(matches!(
            "800x600@1e12".parse::<Mode>(),
            Err(ModeParseError::InvalidNumber(_))
        ));
        assert_eq!(
            "800x600@4294967".parse::<Mode>().unwrap().refresh,
            4_294_967_000
        );
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(FHD.to_string(), "1920x1080@60");
        assert_eq!(Mode::new(800, 600, 59_940).to_string(), "800x600@59.940");
    }

    #[test]
    fn test_frame_interval() {
        let interval = FHD.frame_interval().unwrap();
        assert_eq!(interval.as_micros(), 16_666);
        assert!(Mode::new(1, 1, 0).frame_interval().is_none());
    }

    #[test]
    fn test_mode_flags() {
        let info = ModeInfo {
            mode: FHD,
            flags: ModeFlags::CURRENT | ModeFlags::PREFERRED,
        };
        assert!(info.is_preferred());
        assert_eq!(info.flags.bits(), 3);
    }
}
