//! Structured events decoded from the device stream

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Down,
    Up,
}

/// Key state report
///
/// `state` is the bitmask of currently asserted key slots. At most one of
/// `down_index` / `up_index` is set; both absent means a state-only report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub state: i64,
    pub down_index: Option<i64>,
    pub up_index: Option<i64>,
}

impl KeyEvent {
    pub fn down(state: i64, index: i64) -> Self {
        Self {
            state,
            down_index: Some(index),
            up_index: None,
        }
    }

    pub fn up(state: i64, index: i64) -> Self {
        Self {
            state,
            down_index: None,
            up_index: Some(index),
        }
    }

    pub fn state_only(state: i64) -> Self {
        Self {
            state,
            down_index: None,
            up_index: None,
        }
    }

    /// The edge carried by this report, if any
    pub fn edge(&self) -> Option<(Edge, i64)> {
        match (self.down_index, self.up_index) {
            (Some(index), _) => Some((Edge::Down, index)),
            (None, Some(index)) => Some((Edge::Up, index)),
            (None, None) => None,
        }
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.edge() {
            Some((Edge::Down, index)) => write!(f, "ks={:#b} kd={}", self.state, index),
            Some((Edge::Up, index)) => write!(f, "ks={:#b} ku={}", self.state, index),
            None => write!(f, "ks={:#b}", self.state),
        }
    }
}

/// One instantaneous analog reading (knob position)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogSample {
    pub value: i64,
}

/// A decoded device record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Key(KeyEvent),
    Analog(AnalogSample),
    /// Well-formed or malformed record that matches no known shape
    Unrecognized { raw: String },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Key(key) => write!(f, "Key {}", key),
            Event::Analog(sample) => write!(f, "Analog p={}", sample.value),
            Event::Unrecognized { raw } => write!(f, "Unrecognized {}", raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_extraction() {
        assert_eq!(KeyEvent::down(4, 2).edge(), Some((Edge::Down, 2)));
        assert_eq!(KeyEvent::up(0, 2).edge(), Some((Edge::Up, 2)));
        assert_eq!(KeyEvent::state_only(6).edge(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(KeyEvent::down(4, 2).to_string(), "ks=0b100 kd=2");
        assert_eq!(
            Event::Analog(AnalogSample { value: 42 }).to_string(),
            "Analog p=42"
        );
    }
}
