use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// A machine axis that can be calibrated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown axis '{0}', expected 'x' or 'y'")]
pub struct ParseAxisError(pub String);

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::X, Axis::Y];

    /// Upper-case G-code letter.
    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
        }
    }

    /// Axis selector used by the firmware's sweep command.
    pub fn sweep_code(self) -> u8 {
        match self {
            Axis::X => 1,
            Axis::Y => 2,
        }
    }

    /// Parameter letters of the set-shaper command: frequency, damping and
    /// vibration tolerance.
    pub fn shaper_letters(self) -> [char; 3] {
        match self {
            Axis::X => ['A', 'I', 'Q'],
            Axis::Y => ['B', 'J', 'R'],
        }
    }

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Axis {
    type Err = ParseAxisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "x" | "X" => Ok(Axis::X),
            "y" | "Y" => Ok(Axis::Y),
            other => Err(ParseAxisError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_either_case() {
        assert_eq!("x".parse::<Axis>(), Ok(Axis::X));
        assert_eq!("Y".parse::<Axis>(), Ok(Axis::Y));
        assert!("z".parse::<Axis>().is_err());
    }
}
