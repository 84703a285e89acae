use crate::controls::GridIndex;
use num_derive::FromPrimitive;
use std::fmt;
use std::str::FromStr;

/// 24-bit colour as computed by the engine. The wire side quantizes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(0xff, 0xff, 0xff);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_black(self) -> bool {
        self == Self::BLACK
    }

    /// Scales every channel by `percent` (0..=100), rounding to nearest.
    pub fn scaled(self, percent: u8) -> Self {
        let p = u32::from(percent.min(100));
        let f = |c: u8| ((u32::from(c) * p + 50) / 100) as u8;
        Self::new(f(self.r), f(self.g), f(self.b))
    }

    /// Linear blend, `t` clamped to 0..=1.
    pub fn lerp(self, other: Rgb, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        let f = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8;
        Self::new(f(self.r, other.r), f(self.g, other.g), f(self.b, other.b))
    }

    /// `hue` in turns (wraps), `saturation` and `value` in 0..=1.
    pub fn from_hsv(hue: f64, saturation: f64, value: f64) -> Self {
        let h = hue.rem_euclid(1.0) * 6.0;
        let s = saturation.clamp(0.0, 1.0);
        let v = value.clamp(0.0, 1.0);
        let c = v * s;
        let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
        let m = v - c;
        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let f = |c: f64| ((c + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::new(f(r), f(g), f(b))
    }

    /// Returns (hue in turns, saturation, value).
    pub fn to_hsv(self) -> (f64, f64, f64) {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;
        let hue = if delta == 0.0 {
            0.0
        } else if max == r {
            ((g - b) / delta).rem_euclid(6.0) / 6.0
        } else if max == g {
            ((b - r) / delta + 2.0) / 6.0
        } else {
            ((r - g) / delta + 4.0) / 6.0
        };
        let saturation = if max == 0.0 { 0.0 } else { delta / max };
        (hue, saturation, max)
    }

    pub fn distance_sq(self, other: Rgb) -> u32 {
        let d = |a: u8, b: u8| {
            let x = i32::from(a) - i32::from(b);
            (x * x) as u32
        };
        d(self.r, other.r) + d(self.g, other.g) + d(self.b, other.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = String;

    /// Accepts `#RRGGBB` or `RRGGBB`, or the name of a palette colour.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(color) = PadColors::from_name(s) {
            return Ok(color.rgb());
        }
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid colour {s:?} (expected #RRGGBB or a palette name)"));
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
        Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

/// Subset of the device's velocity palette with published RGB values.
/// Discriminants are the Note On velocities that select each colour.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum PadColors {
    Off = 0,
    Dim = 1,
    Gray = 2,
    White = 3,
    LightRed = 4,
    Red = 5,
    DarkRed = 6,
    VeryDarkRed = 7,
    LightOrange = 8,
    Orange = 9,
    DarkOrange = 10,
    Brown = 11,
    LightYellow = 12,
    Yellow = 13,
    DarkYellow = 14,
    VeryDarkYellow = 15,
    LightLime = 16,
    Lime = 17,
    DarkLime = 18,
    VeryDarkLime = 19,
    LightGreen = 20,
    Green = 21,
    DarkGreen = 22,
    VeryDarkGreen = 23,
    LightBlue = 44,
    Blue = 45,
    DarkBlue = 46,
    VeryDarkBlue = 47,
}

impl PadColors {
    pub const ALL: [PadColors; 28] = [
        PadColors::Off,
        PadColors::Dim,
        PadColors::Gray,
        PadColors::White,
        PadColors::LightRed,
        PadColors::Red,
        PadColors::DarkRed,
        PadColors::VeryDarkRed,
        PadColors::LightOrange,
        PadColors::Orange,
        PadColors::DarkOrange,
        PadColors::Brown,
        PadColors::LightYellow,
        PadColors::Yellow,
        PadColors::DarkYellow,
        PadColors::VeryDarkYellow,
        PadColors::LightLime,
        PadColors::Lime,
        PadColors::DarkLime,
        PadColors::VeryDarkLime,
        PadColors::LightGreen,
        PadColors::Green,
        PadColors::DarkGreen,
        PadColors::VeryDarkGreen,
        PadColors::LightBlue,
        PadColors::Blue,
        PadColors::DarkBlue,
        PadColors::VeryDarkBlue,
    ];

    pub fn from_velocity(velocity: u8) -> Option<Self> {
        num::FromPrimitive::from_u8(velocity)
    }

    pub fn velocity(self) -> u8 {
        self as u8
    }

    pub fn rgb(self) -> Rgb {
        match self {
            PadColors::Off => Rgb::new(0x00, 0x00, 0x00),
            PadColors::Dim => Rgb::new(0x1E, 0x1E, 0x1E),
            PadColors::Gray => Rgb::new(0x7F, 0x7F, 0x7F),
            PadColors::White => Rgb::new(0xFF, 0xFF, 0xFF),
            PadColors::LightRed => Rgb::new(0xFF, 0x4C, 0x4C),
            PadColors::Red => Rgb::new(0xFF, 0x00, 0x00),
            PadColors::DarkRed => Rgb::new(0x59, 0x00, 0x00),
            PadColors::VeryDarkRed => Rgb::new(0x19, 0x00, 0x00),
            PadColors::LightOrange => Rgb::new(0xFF, 0xBD, 0x6C),
            PadColors::Orange => Rgb::new(0xFF, 0x54, 0x00),
            PadColors::DarkOrange => Rgb::new(0x59, 0x1D, 0x00),
            PadColors::Brown => Rgb::new(0x27, 0x1B, 0x00),
            PadColors::LightYellow => Rgb::new(0xFF, 0xFF, 0x4C),
            PadColors::Yellow => Rgb::new(0xFF, 0xFF, 0x00),
            PadColors::DarkYellow => Rgb::new(0x59, 0x59, 0x00),
            PadColors::VeryDarkYellow => Rgb::new(0x19, 0x19, 0x00),
            PadColors::LightLime => Rgb::new(0x88, 0xFF, 0x4C),
            PadColors::Lime => Rgb::new(0x54, 0xFF, 0x00),
            PadColors::DarkLime => Rgb::new(0x1D, 0x59, 0x00),
            PadColors::VeryDarkLime => Rgb::new(0x14, 0x2B, 0x00),
            PadColors::LightGreen => Rgb::new(0x4C, 0xFF, 0x4C),
            PadColors::Green => Rgb::new(0x00, 0xFF, 0x00),
            PadColors::DarkGreen => Rgb::new(0x00, 0x59, 0x00),
            PadColors::VeryDarkGreen => Rgb::new(0x00, 0x19, 0x00),
            PadColors::LightBlue => Rgb::new(0x4C, 0x4C, 0xFF),
            PadColors::Blue => Rgb::new(0x00, 0x00, 0xFF),
            PadColors::DarkBlue => Rgb::new(0x00, 0x00, 0x59),
            PadColors::VeryDarkBlue => Rgb::new(0x00, 0x00, 0x19),
        }
    }

    /// Case-insensitive lookup, underscores and dashes ignored
    /// (`"light_blue"`, `"LightBlue"` and `"LIGHT-BLUE"` all match).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|c| format!("{c:?}").to_ascii_lowercase() == wanted)
    }

    /// Nearest palette entry by squared RGB distance. Ties go to the lower
    /// velocity, so the result only depends on the input colour.
    pub fn nearest(rgb: Rgb) -> Self {
        let mut best = PadColors::Off;
        let mut best_distance = u32::MAX;
        for color in Self::ALL {
            let distance = color.rgb().distance_sq(rgb);
            if distance < best_distance {
                best = color;
                best_distance = distance;
            }
        }
        best
    }
}

/// The seven pad brightness levels. The discriminant is the MIDI channel
/// that selects the level on a palette Note On.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
#[repr(u8)]
pub enum Brightness {
    Percent10 = 0,
    Percent25 = 1,
    Percent50 = 2,
    Percent65 = 3,
    Percent75 = 4,
    Percent90 = 5,
    Percent100 = 6,
}

impl Brightness {
    pub const ALL: [Brightness; 7] = [
        Brightness::Percent10,
        Brightness::Percent25,
        Brightness::Percent50,
        Brightness::Percent65,
        Brightness::Percent75,
        Brightness::Percent90,
        Brightness::Percent100,
    ];

    pub fn percent(self) -> u8 {
        match self {
            Brightness::Percent10 => 10,
            Brightness::Percent25 => 25,
            Brightness::Percent50 => 50,
            Brightness::Percent65 => 65,
            Brightness::Percent75 => 75,
            Brightness::Percent90 => 90,
            Brightness::Percent100 => 100,
        }
    }

    pub fn channel(self) -> u8 {
        self as u8
    }

    pub fn from_channel(channel: u8) -> Option<Self> {
        num::FromPrimitive::from_u8(channel)
    }

    /// Level for a raw channel number, clamped into 0..=6. Effects use this
    /// to express brightness the way the hardware counts it.
    pub fn level(channel: i32) -> Self {
        Self::from_channel(channel.clamp(0, 6) as u8).unwrap_or(Brightness::Percent100)
    }

    /// Nearest level to `percent`, or `None` outside 10..=100.
    pub fn from_percent(percent: u8) -> Option<Self> {
        if !(10..=100).contains(&percent) {
            return None;
        }
        Some(Self::quantize(percent))
    }

    /// Nearest level for any non-zero percentage. Ties go to the brighter level.
    pub fn quantize(percent: u8) -> Self {
        let mut best = Brightness::Percent10;
        for level in Self::ALL {
            if level.percent().abs_diff(percent) <= best.percent().abs_diff(percent) {
                best = level;
            }
        }
        best
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Brightness::Percent100
    }
}

impl fmt::Display for Brightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// One pad's computed colour for the current tick. Produced by the
/// animation engine, consumed by the dispatcher, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameCommand {
    pub index: GridIndex,
    pub rgb: Rgb,
    /// 0..=100. Zero means dark regardless of `rgb`.
    pub brightness: u8,
}

impl FrameCommand {
    pub fn off(index: GridIndex) -> Self {
        Self {
            index,
            rgb: Rgb::BLACK,
            brightness: 0,
        }
    }

    pub fn is_dark(&self) -> bool {
        self.brightness == 0 || self.rgb.is_black()
    }
}

/// LED value for the single-colour side buttons.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SideLed {
    #[default]
    Off,
    On,
    Blink,
}

impl SideLed {
    pub fn velocity(self) -> u8 {
        match self {
            SideLed::Off => 0,
            SideLed::On => 1,
            SideLed::Blink => 2,
        }
    }
}
