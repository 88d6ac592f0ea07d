//! Keyboard lighting description.

use std::fmt::{self, Display, Formatter};

use clap::ValueEnum;

/// Lighting effect supported by the keyboard firmware.
#[derive(ValueEnum, Default, PartialEq, Eq, Debug, Copy, Clone)]
pub enum LightingMode {
    Wave,
    Spectrum,
    Breathing,
    Rolling,
    Curve,
    Scan,
    Custom,
    Radiation,
    Ripples,
    #[value(name = "single_key")]
    SingleKey,
    #[default]
    Static,
}

impl LightingMode {
    /// Parse a mode name, ignoring case.
    ///
    /// Names which do not match any mode fall back to [`LightingMode::Static`].
    pub fn from_name(name: &str) -> Self {
        <Self as ValueEnum>::from_str(name.trim(), true).unwrap_or_default()
    }
}

impl Display for LightingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => write!(f, "{:?}", self),
        }
    }
}

/// RGB color.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Self = Self { r: 0xff, g: 0xff, b: 0xff };
}

/// Effect speed, from 0 (fastest) to 4 (slowest).
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Speed(u8);

impl Speed {
    pub const MAX: u8 = 4;

    /// Create a speed, capping it at the slowest supported value.
    pub fn new(speed: u64) -> Self {
        Self(speed.min(Self::MAX as u64) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self(Self::MAX)
    }
}

/// LED brightness, from 1 (dimmest) to 4 (brightest).
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Brightness(u8);

impl Brightness {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 4;

    /// Create a brightness, clamping it to the supported range.
    pub fn new(brightness: i64) -> Self {
        Self(brightness.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self(Self::MAX)
    }
}

/// Lighting requested for a single command.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct Lighting {
    pub mode: LightingMode,
    pub color: Rgb,
    pub speed: Speed,
    pub brightness: Brightness,

    /// Let the firmware pick colors, ignoring `color`.
    pub random_colors: bool,
}
