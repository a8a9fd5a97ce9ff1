use std::fmt;
use std::str::FromStr;

use serde::{de::Error as DeError, Deserialize, Deserializer};

/// 8-bit RGBA color used for brush strokes and overlay fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const RED: Self = Self::new(255, 0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}{:02x}",
            self.r, self.g, self.b, self.a
        )
    }
}

/// Accepts `#rgb`, `#rrggbb` and `#rrggbbaa` (the leading `#` is optional).
impl FromStr for Rgba {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex = value.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid color '{value}': expected hex digits"));
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|error| format!("invalid color '{value}': {error}"))
        };

        match hex.len() {
            3 => {
                let mut out = [0_u8; 3];
                for (index, slot) in out.iter_mut().enumerate() {
                    let nibble = channel(index..index + 1)?;
                    *slot = nibble * 17;
                }
                Ok(Self::new(out[0], out[1], out[2], 255))
            }
            6 => Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?, 255)),
            8 => Ok(Self::new(
                channel(0..2)?,
                channel(2..4)?,
                channel(4..6)?,
                channel(6..8)?,
            )),
            other => Err(format!(
                "invalid color '{value}': expected 3, 6 or 8 hex digits, got {other}"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
