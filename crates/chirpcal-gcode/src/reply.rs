use crate::lexer::{LexError, Token, TokenKind, lex};
use chirpcal_core::Axis;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

const AXIS_CONFIG_MARKER: &str = "FTMCFG";
const SWEEP_COMPLETE_MARKER: &str = "profile ran to completion";
const FIRMWARE_NAME: &str = "FIRMWARE_NAME";

#[derive(Debug, Error, PartialEq)]
pub enum ReplyError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("steps-per-unit report is missing the {axis} value")]
    MissingStepsPerUnit { axis: char },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Position {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StepsPerUnit {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl StepsPerUnit {
    pub fn for_axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }
}

/// Telemetry the calibration cares about. Anything else is `Other`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    AxisConfig(BTreeMap<String, String>),
    SweepComplete,
    Firmware(BTreeMap<String, String>),
    StepsPerUnit(StepsPerUnit),
    HomingRequired { axes: Vec<char> },
    Position(Position),
    Other,
}

impl Reply {
    pub fn parse(line: &str) -> Result<Reply, ReplyError> {
        let line = line.trim();
        if line.contains("M494") {
            if line.contains(AXIS_CONFIG_MARKER) {
                return Ok(Reply::AxisConfig(fields(line)?));
            }
            if line.contains(SWEEP_COMPLETE_MARKER) {
                return Ok(Reply::SweepComplete);
            }
        }

        if line.contains("NAME:") || line.starts_with("NAME.") {
            let fields = fields(line)?;
            if fields.contains_key(FIRMWARE_NAME) {
                return Ok(Reply::Firmware(fields));
            }
        }

        let tokens = lex(line).collect::<Result<Vec<_>, _>>()?;
        if let Some(steps) = steps_per_unit(&tokens)? {
            return Ok(Reply::StepsPerUnit(steps));
        }
        if let Some(axes) = homing_required(line) {
            return Ok(Reply::HomingRequired { axes });
        }
        if line.contains("X:") {
            if let Some(position) = position(line)? {
                return Ok(Reply::Position(position));
            }
        }
        Ok(Reply::Other)
    }

    /// Travel length reported for `axis` in an axis configuration block.
    pub fn axis_length(&self, axis: Axis) -> Option<f64> {
        let Reply::AxisConfig(fields) = self else {
            return None;
        };
        fields
            .get(&format!("{}_MAX_LENGTH", axis.letter()))
            .and_then(|v| leading_number(v))
    }
}

/// `KEY:value` pairs of a line. A value runs up to the next key; the first
/// occurrence of a key wins.
pub fn fields(line: &str) -> Result<BTreeMap<String, String>, LexError> {
    let mut keys = Vec::new();
    for token in lex(line) {
        let token = token?;
        if let TokenKind::Key(key) = token.kind {
            keys.push((key, token.start, token.end));
        }
    }

    let mut fields = BTreeMap::new();
    for (i, (key, _, value_start)) in keys.iter().enumerate() {
        let value_end = keys.get(i + 1).map_or(line.len(), |(_, next, _)| *next);
        fields
            .entry(key.clone())
            .or_insert_with(|| line[*value_start..value_end].trim().to_string());
    }
    Ok(fields)
}

fn steps_per_unit(tokens: &[Token]) -> Result<Option<StepsPerUnit>, ReplyError> {
    let Some(at) = tokens.iter().position(|t| {
        matches!(t.kind, TokenKind::Word { letter: 'M', value } if value == 92.0)
    }) else {
        return Ok(None);
    };
    let word = |wanted: char| {
        tokens[at + 1..].iter().find_map(|t| match t.kind {
            TokenKind::Word { letter, value } if letter == wanted => Some(value),
            _ => None,
        })
    };
    // a bare echo of the query carries no values
    if word('X').is_none() && word('Y').is_none() && word('Z').is_none() {
        return Ok(None);
    }
    let value = |axis: char| word(axis).ok_or(ReplyError::MissingStepsPerUnit { axis });
    Ok(Some(StepsPerUnit {
        x: value('X')?,
        y: value('Y')?,
        z: value('Z')?,
    }))
}

fn homing_required(line: &str) -> Option<Vec<char>> {
    let rest = line.strip_prefix("echo:")?.trim_start().strip_prefix("Home ")?;
    let axes = rest.strip_suffix("First")?.trim();
    if axes.is_empty() || !axes.chars().all(|c| c.is_ascii_alphabetic() || c == ' ') {
        return None;
    }
    Some(axes.chars().filter(|c| !c.is_whitespace()).collect())
}

fn position(line: &str) -> Result<Option<Position>, ReplyError> {
    let fields = fields(line)?;
    let axis = |key: &str| fields.get(key).and_then(|v| leading_number(v));
    let position = Position {
        x: axis("X"),
        y: axis("Y"),
        z: axis("Z"),
    };
    Ok(position.x.is_some().then_some(position))
}

fn leading_number(value: &str) -> Option<f64> {
    value.split_whitespace().next()?.parse().ok()
}
