//! Topic Codec - mapping between panel controls and the wire
//!
//! Every topic the panel touches follows one grammar:
//!
//! ```text
//! <base>/<switch|dimmer|select|text|number>/<index>/<set|val>
//! ```
//!
//! `set` topics carry commands authored by this panel, `val` topics carry state
//! reported by the device. Payloads are always UTF-8 text. Nothing outside this
//! module builds topic strings or parses payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Index used for locally authored commands and their echoed confirmation
pub const COMMAND_INDEX: u32 = 1;

/// Index the device uses to report externally authored state
pub const REPORTED_INDEX: u32 = 2;

/// Tokens offered by the select control. The codec itself treats select
/// payloads as opaque strings.
pub const SELECT_OPTIONS: [&str; 5] = ["0", "1", "2", "3", "4"];

/// Semantic kind of a panel control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlType {
    Switch,
    Dimmer,
    Select,
    Text,
    Number,
}

impl ControlType {
    pub const ALL: [ControlType; 5] = [
        ControlType::Switch,
        ControlType::Dimmer,
        ControlType::Select,
        ControlType::Text,
        ControlType::Number,
    ];

    /// Topic segment for this control type
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::Switch => "switch",
            ControlType::Dimmer => "dimmer",
            ControlType::Select => "select",
            ControlType::Text => "text",
            ControlType::Number => "number",
        }
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlType {
    type Err = ();

    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        ControlType::ALL
            .into_iter()
            .find(|control| control.as_str() == segment)
            .ok_or(())
    }
}

/// Last topic segment: who authors the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Command written by this panel
    Set,
    /// State report read by this panel
    Val,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Set => "set",
            Direction::Val => "val",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        match segment {
            "set" => Ok(Direction::Set),
            "val" => Ok(Direction::Val),
            _ => Err(()),
        }
    }
}

/// Typed value of a control
///
/// The dimmer domain is nominally 0..=100 but decoding does not enforce it;
/// consumers clamp for display (see [`ControlValue::display_level`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ControlValue {
    Switch(bool),
    Dimmer(i64),
    Select(String),
    Text(String),
    Number(f64),
}

impl ControlValue {
    pub fn control_type(&self) -> ControlType {
        match self {
            ControlValue::Switch(_) => ControlType::Switch,
            ControlValue::Dimmer(_) => ControlType::Dimmer,
            ControlValue::Select(_) => ControlType::Select,
            ControlValue::Text(_) => ControlType::Text,
            ControlValue::Number(_) => ControlType::Number,
        }
    }

    /// Dimmer value from continuous slider input, truncated toward zero
    pub fn dimmer_from_slider(position: f64) -> Self {
        ControlValue::Dimmer(position.trunc() as i64)
    }

    /// Dimmer level clamped to 0..=100 for progress-style widgets
    pub fn display_level(&self) -> Option<u8> {
        match self {
            ControlValue::Dimmer(level) => Some((*level).clamp(0, 100) as u8),
            _ => None,
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&encode_value(self))
    }
}

/// Classified position of a topic within the panel schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicAddress {
    pub control: ControlType,
    pub index: u32,
    pub direction: Direction,
}

impl TopicAddress {
    pub fn new(control: ControlType, index: u32, direction: Direction) -> Self {
        Self {
            control,
            index,
            direction,
        }
    }

    /// Full topic string under `base`
    pub fn to_topic(&self, base: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            base, self.control, self.index, self.direction
        )
    }
}

/// Payload did not match the declared control type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid switch payload {0:?}, expected \"1\" or \"0\"")]
    InvalidSwitch(String),

    #[error("invalid dimmer payload {0:?}, expected an integer")]
    InvalidDimmer(String),

    #[error("invalid number payload {0:?}, expected a decimal number")]
    InvalidNumber(String),
}

/// Topic outside the panel schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized topic {topic:?}: {reason}")]
pub struct Unrecognized {
    pub topic: String,
    pub reason: &'static str,
}

/// Normalises an operator-supplied base topic (no trailing separator)
pub fn normalize_base(base: &str) -> &str {
    base.trim().trim_end_matches('/')
}

/// Topic a command for `control` at `index` is published on
pub fn encode_command_topic(base: &str, control: ControlType, index: u32) -> String {
    TopicAddress::new(control, index, Direction::Set).to_topic(base)
}

/// Wire payload for a value
pub fn encode_value(value: &ControlValue) -> String {
    match value {
        ControlValue::Switch(on) => String::from(if *on { "1" } else { "0" }),
        ControlValue::Dimmer(level) => level.to_string(),
        ControlValue::Select(token) => token.clone(),
        ControlValue::Text(text) => text.clone(),
        ControlValue::Number(number) => number.to_string(),
    }
}

/// Parses a payload according to `control`
///
/// Numeric payloads tolerate surrounding whitespace; switch payloads must be
/// exactly `"1"` or `"0"`.
pub fn decode_value(control: ControlType, payload: &[u8]) -> Result<ControlValue, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;

    match control {
        ControlType::Switch => match text {
            "1" => Ok(ControlValue::Switch(true)),
            "0" => Ok(ControlValue::Switch(false)),
            other => Err(DecodeError::InvalidSwitch(other.to_string())),
        },
        ControlType::Dimmer => text
            .trim()
            .parse::<i64>()
            .map(ControlValue::Dimmer)
            .map_err(|_| DecodeError::InvalidDimmer(text.to_string())),
        ControlType::Number => text
            .trim()
            .parse::<f64>()
            .map(ControlValue::Number)
            .map_err(|_| DecodeError::InvalidNumber(text.to_string())),
        ControlType::Select => Ok(ControlValue::Select(text.to_string())),
        ControlType::Text => Ok(ControlValue::Text(text.to_string())),
    }
}

/// Strips `base` from `topic` and validates the remaining three segments
pub fn classify_topic(topic: &str, base: &str) -> Result<TopicAddress, Unrecognized> {
    let unrecognized = |reason| Unrecognized {
        topic: topic.to_string(),
        reason,
    };

    let rest = topic
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| unrecognized("outside base topic"))?;

    let mut segments = rest.split('/');
    let (Some(control), Some(index), Some(direction), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(unrecognized("expected <type>/<index>/<direction>"));
    };

    let control = control
        .parse::<ControlType>()
        .map_err(|_| unrecognized("unknown control type"))?;
    let canonical =
        !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) && !index.starts_with('0');
    let index = index
        .parse::<u32>()
        .ok()
        .filter(|_| canonical)
        .ok_or_else(|| unrecognized("index is not a positive integer"))?;
    let direction = direction
        .parse::<Direction>()
        .map_err(|_| unrecognized("unknown direction"))?;

    Ok(TopicAddress::new(control, index, direction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_topic_uses_set_direction() {
        assert_eq!(
            encode_command_topic("home/panel", ControlType::Dimmer, COMMAND_INDEX),
            "home/panel/dimmer/1/set"
        );
    }

    #[test]
    fn encodes_each_control_type() {
        assert_eq!(encode_value(&ControlValue::Switch(true)), "1");
        assert_eq!(encode_value(&ControlValue::Switch(false)), "0");
        assert_eq!(encode_value(&ControlValue::Dimmer(73)), "73");
        assert_eq!(encode_value(&ControlValue::Select("3".into())), "3");
        assert_eq!(encode_value(&ControlValue::Text("hello".into())), "hello");
        assert_eq!(encode_value(&ControlValue::Number(21.5)), "21.5");
    }

    #[test]
    fn slider_positions_truncate() {
        assert_eq!(ControlValue::dimmer_from_slider(72.9), ControlValue::Dimmer(72));
        assert_eq!(ControlValue::dimmer_from_slider(0.4), ControlValue::Dimmer(0));
        assert_eq!(encode_value(&ControlValue::dimmer_from_slider(49.99)), "49");
    }

    #[test]
    fn decoded_values_survive_reencoding() {
        let values = [
            ControlValue::Switch(true),
            ControlValue::Switch(false),
            ControlValue::Dimmer(0),
            ControlValue::Dimmer(100),
            ControlValue::Select("4".into()),
            ControlValue::Text("Grüße, panel".into()),
            ControlValue::Text(String::new()),
            ControlValue::Number(-3.25),
            ControlValue::Number(1e-7),
        ];

        for value in values {
            let payload = encode_value(&value);
            let decoded = decode_value(value.control_type(), payload.as_bytes());
            assert_eq!(decoded, Ok(value));
        }
    }

    #[test]
    fn switch_rejects_anything_but_one_or_zero() {
        for payload in ["true", "on", " 1", "2", ""] {
            assert_eq!(
                decode_value(ControlType::Switch, payload.as_bytes()),
                Err(DecodeError::InvalidSwitch(payload.to_string()))
            );
        }
    }

    #[test]
    fn dimmer_accepts_out_of_range_integers() {
        assert_eq!(
            decode_value(ControlType::Dimmer, b"150"),
            Ok(ControlValue::Dimmer(150))
        );
        assert_eq!(
            decode_value(ControlType::Dimmer, b"-5"),
            Ok(ControlValue::Dimmer(-5))
        );
        assert_eq!(ControlValue::Dimmer(150).display_level(), Some(100));
        assert_eq!(ControlValue::Dimmer(-5).display_level(), Some(0));
    }

    #[test]
    fn malformed_numeric_payloads_are_decode_errors() {
        assert!(matches!(
            decode_value(ControlType::Dimmer, b"12.5"),
            Err(DecodeError::InvalidDimmer(_))
        ));
        assert!(matches!(
            decode_value(ControlType::Dimmer, b"abc"),
            Err(DecodeError::InvalidDimmer(_))
        ));
        assert_eq!(
            decode_value(ControlType::Number, b"abc"),
            Err(DecodeError::InvalidNumber("abc".into()))
        );
    }

    #[test]
    fn non_utf8_payloads_are_rejected_for_every_type() {
        for control in ControlType::ALL {
            assert_eq!(
                decode_value(control, &[0xff, 0xfe]),
                Err(DecodeError::InvalidUtf8)
            );
        }
    }

    #[test]
    fn classifies_schema_topics() {
        assert_eq!(
            classify_topic("test/topic/switch/2/val", "test/topic"),
            Ok(TopicAddress::new(ControlType::Switch, 2, Direction::Val))
        );
        assert_eq!(
            classify_topic("test/topic/text/1/set", "test/topic"),
            Ok(TopicAddress::new(ControlType::Text, 1, Direction::Set))
        );
    }

    #[test]
    fn rejects_topics_outside_schema() {
        let base = "test/topic";
        for topic in [
            "other/switch/2/val",
            "test/topicx/switch/2/val",
            "test/topic/switch/2",
            "test/topic/switch/2/val/extra",
            "test/topic/fan/2/val",
            "test/topic/switch/0/val",
            "test/topic/switch/x/val",
            "test/topic/switch/2/get",
            "test/topic/switch/02/val",
            "test/topic/switch/+2/val",
            "test/topic/switch/-2/val",
            "test/topic/switch//val",
        ] {
            assert!(classify_topic(topic, base).is_err(), "{topic} accepted");
        }
    }

    #[test]
    fn base_normalisation_strips_trailing_separator() {
        assert_eq!(normalize_base("test/topic/"), "test/topic");
        assert_eq!(normalize_base(" home/panel "), "home/panel");
    }
}
